//! Debounced background matching pass

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::matcher::CaseAssignmentMatcher;

/// Coalesces matching-pass requests into background passes
///
/// Requests made while a pass is pending or running collapse into a single
/// follow-up pass.
pub struct MatchingPassRunner {
    matcher: Arc<CaseAssignmentMatcher>,
    notify: Notify,
    debounce: Duration,
}

impl MatchingPassRunner {
    pub fn new(matcher: Arc<CaseAssignmentMatcher>, debounce: Duration) -> Self {
        Self {
            matcher,
            notify: Notify::new(),
            debounce,
        }
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            info!("🚀 Matching pass runner started (debounce: {:?})", runner.debounce);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = runner.notify.notified() => {
                        if !runner.debounce.is_zero() {
                            tokio::time::sleep(runner.debounce).await;
                        }
                        match runner.matcher.assign_cases_to_agents().await {
                            Ok(report) => debug!(
                                "Background matching pass: {} assigned, {} skipped, {} failed",
                                report.assignments.len(),
                                report.skipped,
                                report.failed
                            ),
                            Err(e) => error!("❌ Background matching pass failed: {}", e),
                        }
                    }
                }
            }
            info!("🛑 Matching pass runner stopped");
        })
    }
}
