//! # Per-Identity Locks
//!
//! Pessimistic, in-process locks scoped to a single case, agent session or
//! telephony session. Every mutating queue, schedule and matching operation
//! holds the lock of the case it touches for the whole critical section.
//!
//! When a case and an agent session are both locked, the case is always locked
//! first. A telephony session lock is never held together with another lock.
//!
//! Locks are taken before a unit of work begins and released after it
//! commits. Entries are removed from the registry once nobody holds or waits
//! for them.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::types::{AgentSessionId, CaseId, TelephonySessionId};

/// Identity a lock is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Case(CaseId),
    TelephonySession(TelephonySessionId),
    AgentSession(AgentSessionId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Case(id) => write!(f, "case:{}", id),
            LockKey::TelephonySession(id) => write!(f, "telephony-session:{}", id),
            LockKey::AgentSession(id) => write!(f, "agent-session:{}", id),
        }
    }
}

type LockMap = DashMap<LockKey, Arc<Mutex<()>>>;

/// Registry of per-identity locks, cheap to clone
#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: Arc<LockMap>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: LockKey) -> LockGuard {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        trace!("🔒 Acquired {}", key);

        LockGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    pub async fn lock_case(&self, case_id: CaseId) -> LockGuard {
        self.lock(LockKey::Case(case_id)).await
    }

    pub async fn lock_agent_session(&self, agent_session_id: AgentSessionId) -> LockGuard {
        self.lock(LockKey::AgentSession(agent_session_id)).await
    }

    pub async fn lock_telephony_session(&self, telephony_session_id: TelephonySessionId) -> LockGuard {
        self.lock(LockKey::TelephonySession(telephony_session_id)).await
    }

    /// Identities currently held or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one identity, released on drop
pub struct LockGuard {
    key: LockKey,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        trace!("🔓 Released {}", self.key);
    }
}
