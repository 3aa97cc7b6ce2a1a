//! # SQLite Store (sqlx)
//!
//! [`SqliteStore`] implements the repository traits on top of sqlx with
//! SQLite. The schema ships as embedded migrations and is applied on connect.
//!
//! ## Invariants enforced by the schema
//!
//! - one active session per agent (`uq_agent_sessions_active_agent`)
//! - one current log entry per session (`uq_agent_session_log_entries_current`)
//! - one active queue entry and one active schedule entry per case
//!
//! All of them are partial unique indexes over `deleted_at IS NULL`, so
//! tombstoned history never conflicts with new rows. A violation of the
//! active-session index is reported as
//! [`CaseEngineError::DuplicateActiveSession`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sc_case_engine::database::SqliteStore;
//! use sc_case_engine::store::Store;
//!
//! # async fn example() -> sc_case_engine::error::Result<()> {
//! let store = SqliteStore::connect_url("sqlite://service-center.db").await?;
//! let tx = store.begin().await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, error, info};

use crate::agent::{AgentSession, AgentSessionLogEntry};
use crate::config::DatabaseConfig;
use crate::error::{CaseEngineError, Result};
use crate::queue::{CaseQueueEntry, CaseScheduleEntry};
use crate::store::{
    AgentSessionRepository, CaseQueueRepository, CaseRepository, CaseScheduleRepository, Store, StoreTx,
    TelephonySessionRepository,
};
use crate::telephony::{ChannelEvent, ChannelEventKind, TelephonySession};
use crate::types::{
    AgentId, AgentSessionId, Case, CaseId, ChannelId, InternalPhoneId, LogEntryId, QueueEntryId,
    ScheduleEntryId, TelephonySessionId, WorkGroupId,
};

const SESSION_SELECT: &str = "
    SELECT s.id, s.agent_id, s.internal_phone_id, s.priority, s.assign_cases_automatically,
           s.work_groups, s.created_at, s.deleted_at,
           l.id AS log_id, l.status AS log_status, l.case_id AS log_case_id,
           l.telephony_session_id AS log_telephony_session_id,
           l.created_at AS log_created_at, l.deleted_at AS log_deleted_at
    FROM agent_sessions s
    JOIN agent_session_log_entries l ON l.id = s.log_entry_id";

const CASE_SELECT: &str = "
    SELECT id, case_type, work_group_id, contact_method, status, assigned_agent_id,
           telephony_session_id, started_at, closed_at, garbage_reason
    FROM cases";

const QUEUE_SELECT: &str = "
    SELECT id, case_id, work_group_id, automatically_assign, created_at, deleted_at
    FROM case_queue_entries";

const SCHEDULE_SELECT: &str = "
    SELECT id, case_id, due_at, created_at, deleted_at
    FROM case_schedule_entries";

const TELEPHONY_SELECT: &str = "
    SELECT id, provider_reference, forwarded, created_at, ended_at
    FROM telephony_sessions";

/// Store backed by a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database and apply pending migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("🗄️ Opening SQLite store: {}", config.url);

        let options = SqliteConnectOptions::from_str(&config.url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!("✅ SQLite store ready (WAL mode enabled)");
        Ok(store)
    }

    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(&DatabaseConfig {
            url: url.to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("📋 Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => {
                debug!("💚 Database health check passed");
                true
            }
            Err(e) => {
                error!("❌ Database health check failed: {}", e);
                false
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn parse_value<T>(column: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| CaseEngineError::database(format!("invalid {} '{}': {}", column, raw, e)))
}

fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    parse_value(column, &raw)
}

fn parse_optional_column<T>(row: &SqliteRow, column: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| parse_value(column, &raw)).transpose()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn session_write_error(err: sqlx::Error, agent_id: &AgentId) -> CaseEngineError {
    if is_unique_violation(&err) {
        CaseEngineError::DuplicateActiveSession {
            agent_id: agent_id.clone(),
        }
    } else {
        err.into()
    }
}

fn conflict_or(err: sqlx::Error, message: impl FnOnce() -> String) -> CaseEngineError {
    if is_unique_violation(&err) {
        CaseEngineError::conflict(message())
    } else {
        err.into()
    }
}

fn case_from_row(row: &SqliteRow) -> Result<Case> {
    Ok(Case {
        id: parse_column(row, "id")?,
        case_type: parse_column(row, "case_type")?,
        work_group_id: WorkGroupId::from(row.try_get::<String, _>("work_group_id")?),
        contact_method: parse_column(row, "contact_method")?,
        status: parse_column(row, "status")?,
        assigned_agent_id: row.try_get::<Option<String>, _>("assigned_agent_id")?.map(AgentId::from),
        telephony_session_id: parse_optional_column(row, "telephony_session_id")?,
        started_at: row.try_get("started_at")?,
        closed_at: row.try_get("closed_at")?,
        garbage_reason: row.try_get("garbage_reason")?,
    })
}

fn log_entry_from_row(row: &SqliteRow) -> Result<AgentSessionLogEntry> {
    Ok(AgentSessionLogEntry {
        id: parse_column(row, "id")?,
        agent_session_id: parse_column(row, "agent_session_id")?,
        status: parse_column(row, "status")?,
        case_id: parse_optional_column(row, "case_id")?,
        telephony_session_id: parse_optional_column(row, "telephony_session_id")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<AgentSession> {
    let id: AgentSessionId = parse_column(row, "id")?;
    let work_groups: String = row.try_get("work_groups")?;

    Ok(AgentSession {
        id,
        agent_id: AgentId::from(row.try_get::<String, _>("agent_id")?),
        internal_phone_id: InternalPhoneId::from(row.try_get::<String, _>("internal_phone_id")?),
        priority: row.try_get("priority")?,
        assign_cases_automatically: row.try_get("assign_cases_automatically")?,
        work_groups: serde_json::from_str(&work_groups)?,
        log_entry: AgentSessionLogEntry {
            id: parse_column(row, "log_id")?,
            agent_session_id: id,
            status: parse_column(row, "log_status")?,
            case_id: parse_optional_column(row, "log_case_id")?,
            telephony_session_id: parse_optional_column(row, "log_telephony_session_id")?,
            created_at: row.try_get("log_created_at")?,
            deleted_at: row.try_get("log_deleted_at")?,
        },
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn queue_entry_from_row(row: &SqliteRow) -> Result<CaseQueueEntry> {
    Ok(CaseQueueEntry {
        id: parse_column(row, "id")?,
        case_id: parse_column(row, "case_id")?,
        work_group_id: WorkGroupId::from(row.try_get::<String, _>("work_group_id")?),
        automatically_assign: row.try_get("automatically_assign")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn schedule_entry_from_row(row: &SqliteRow) -> Result<CaseScheduleEntry> {
    Ok(CaseScheduleEntry {
        id: parse_column(row, "id")?,
        case_id: parse_column(row, "case_id")?,
        due_at: row.try_get("due_at")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn channel_event_from_row(row: &SqliteRow) -> Result<ChannelEvent> {
    let sequence: i64 = row.try_get("sequence")?;
    let kind: String = row.try_get("kind")?;

    Ok(ChannelEvent {
        sequence: u64::try_from(sequence)
            .map_err(|_| CaseEngineError::database(format!("invalid event sequence {}", sequence)))?,
        channel_id: ChannelId::from(row.try_get::<String, _>("channel_id")?),
        occurred_at: row.try_get("occurred_at")?,
        kind: serde_json::from_str::<ChannelEventKind>(&kind)?,
    })
}

impl SqliteTx {
    async fn fetch_cases(&mut self, sql: &str, bind: Option<String>) -> Result<Vec<Case>> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&mut *self.tx).await?;
        rows.iter().map(case_from_row).collect()
    }

    async fn fetch_sessions(&mut self, filter: &str, bind: Option<String>) -> Result<Vec<AgentSession>> {
        let sql = format!("{} {} ORDER BY s.created_at, s.id", SESSION_SELECT, filter);
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&mut *self.tx).await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn load_telephony_session(&mut self, row: SqliteRow) -> Result<TelephonySession> {
        let id: TelephonySessionId = parse_column(&row, "id")?;
        let events = sqlx::query(
            "SELECT sequence, channel_id, occurred_at, kind
             FROM telephony_channel_events
             WHERE telephony_session_id = ?
             ORDER BY sequence",
        )
        .bind(id.to_string())
        .fetch_all(&mut *self.tx)
        .await?
        .iter()
        .map(channel_event_from_row)
        .collect::<Result<Vec<_>>>()?;

        Ok(TelephonySession {
            id,
            provider_reference: row.try_get("provider_reference")?,
            forwarded: row.try_get("forwarded")?,
            created_at: row.try_get("created_at")?,
            ended_at: row.try_get("ended_at")?,
            events,
        })
    }
}

#[async_trait]
impl CaseRepository for SqliteTx {
    async fn insert_case(&mut self, case: &Case) -> Result<()> {
        sqlx::query(
            "INSERT INTO cases (id, case_type, work_group_id, contact_method, status, assigned_agent_id,
                                telephony_session_id, started_at, closed_at, garbage_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(case.id.to_string())
        .bind(case.case_type.as_str())
        .bind(case.work_group_id.0.as_str())
        .bind(case.contact_method.as_str())
        .bind(case.status.as_str())
        .bind(case.assigned_agent_id.as_ref().map(|agent| agent.to_string()))
        .bind(case.telephony_session_id.map(|id| id.to_string()))
        .bind(case.started_at)
        .bind(case.closed_at)
        .bind(case.garbage_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or(e, || format!("Case {} already exists", case.id)))?;
        Ok(())
    }

    async fn update_case(&mut self, case: &Case) -> Result<()> {
        let result = sqlx::query(
            "UPDATE cases
             SET case_type = ?, work_group_id = ?, contact_method = ?, status = ?, assigned_agent_id = ?,
                 telephony_session_id = ?, closed_at = ?, garbage_reason = ?
             WHERE id = ?",
        )
        .bind(case.case_type.as_str())
        .bind(case.work_group_id.0.as_str())
        .bind(case.contact_method.as_str())
        .bind(case.status.as_str())
        .bind(case.assigned_agent_id.as_ref().map(|agent| agent.to_string()))
        .bind(case.telephony_session_id.map(|id| id.to_string()))
        .bind(case.closed_at)
        .bind(case.garbage_reason.as_deref())
        .bind(case.id.to_string())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CaseEngineError::not_found(format!("Case {}", case.id)));
        }
        Ok(())
    }

    async fn find_case(&mut self, case_id: CaseId) -> Result<Option<Case>> {
        let sql = format!("{} WHERE id = ?", CASE_SELECT);
        let row = sqlx::query(&sql)
            .bind(case_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(case_from_row).transpose()
    }

    async fn find_cases_by_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Vec<Case>> {
        let sql = format!("{} WHERE telephony_session_id = ? ORDER BY started_at, id", CASE_SELECT);
        self.fetch_cases(&sql, Some(telephony_session_id.to_string())).await
    }

    async fn find_unfulfilled_cases(&mut self) -> Result<Vec<Case>> {
        let sql = format!("{} WHERE status = 'open' ORDER BY started_at, id", CASE_SELECT);
        self.fetch_cases(&sql, None).await
    }
}

#[async_trait]
impl AgentSessionRepository for SqliteTx {
    async fn insert_agent_session(&mut self, session: &AgentSession) -> Result<()> {
        let work_groups = serde_json::to_string(&session.work_groups)?;

        sqlx::query(
            "INSERT INTO agent_sessions (id, agent_id, internal_phone_id, priority, assign_cases_automatically,
                                         work_groups, log_entry_id, created_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.agent_id.0.as_str())
        .bind(session.internal_phone_id.0.as_str())
        .bind(session.priority)
        .bind(session.assign_cases_automatically)
        .bind(work_groups)
        .bind(session.log_entry.id.to_string())
        .bind(session.created_at)
        .bind(session.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| session_write_error(e, &session.agent_id))?;

        self.insert_log_entry(&session.log_entry).await
    }

    async fn update_agent_session(&mut self, session: &AgentSession) -> Result<()> {
        let work_groups = serde_json::to_string(&session.work_groups)?;

        let result = sqlx::query(
            "UPDATE agent_sessions
             SET internal_phone_id = ?, priority = ?, assign_cases_automatically = ?, work_groups = ?,
                 log_entry_id = ?, deleted_at = ?
             WHERE id = ?",
        )
        .bind(session.internal_phone_id.0.as_str())
        .bind(session.priority)
        .bind(session.assign_cases_automatically)
        .bind(work_groups)
        .bind(session.log_entry.id.to_string())
        .bind(session.deleted_at)
        .bind(session.id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| session_write_error(e, &session.agent_id))?;

        if result.rows_affected() == 0 {
            return Err(CaseEngineError::not_found(format!("Agent session {}", session.id)));
        }
        Ok(())
    }

    async fn find_agent_session(&mut self, agent_session_id: AgentSessionId) -> Result<Option<AgentSession>> {
        Ok(self
            .fetch_sessions("WHERE s.id = ?", Some(agent_session_id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn find_active_session_by_agent(&mut self, agent_id: &AgentId) -> Result<Option<AgentSession>> {
        Ok(self
            .fetch_sessions("WHERE s.deleted_at IS NULL AND s.agent_id = ?", Some(agent_id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn find_active_session_by_case(&mut self, case_id: CaseId) -> Result<Option<AgentSession>> {
        Ok(self
            .fetch_sessions("WHERE s.deleted_at IS NULL AND l.case_id = ?", Some(case_id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn find_active_sessions_by_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Vec<AgentSession>> {
        self.fetch_sessions(
            "WHERE s.deleted_at IS NULL AND l.telephony_session_id = ?",
            Some(telephony_session_id.to_string()),
        )
        .await
    }

    async fn list_active_sessions(&mut self) -> Result<Vec<AgentSession>> {
        self.fetch_sessions("WHERE s.deleted_at IS NULL", None).await
    }

    async fn insert_log_entry(&mut self, entry: &AgentSessionLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_session_log_entries (id, agent_session_id, status, case_id, telephony_session_id,
                                                    created_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.agent_session_id.to_string())
        .bind(entry.status.as_str())
        .bind(entry.case_id.map(|id| id.to_string()))
        .bind(entry.telephony_session_id.map(|id| id.to_string()))
        .bind(entry.created_at)
        .bind(entry.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!("Agent session {} already has a current log entry", entry.agent_session_id)
            })
        })?;
        Ok(())
    }

    async fn tombstone_log_entry(&mut self, entry_id: LogEntryId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE agent_session_log_entries SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(at)
            .bind(entry_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_log_entries(&mut self, agent_session_id: AgentSessionId) -> Result<Vec<AgentSessionLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, agent_session_id, status, case_id, telephony_session_id, created_at, deleted_at
             FROM agent_session_log_entries
             WHERE agent_session_id = ?",
        )
        .bind(agent_session_id.to_string())
        .fetch_all(&mut *self.tx)
        .await?;

        let mut entries = rows.iter().map(log_entry_from_row).collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| (entry.created_at, entry.deleted_at.is_none(), entry.id));
        Ok(entries)
    }
}

#[async_trait]
impl CaseQueueRepository for SqliteTx {
    async fn insert_queue_entry(&mut self, entry: &CaseQueueEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO case_queue_entries (id, case_id, work_group_id, automatically_assign, created_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.case_id.to_string())
        .bind(entry.work_group_id.0.as_str())
        .bind(entry.automatically_assign)
        .bind(entry.created_at)
        .bind(entry.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or(e, || format!("Case {} is already queued", entry.case_id)))?;
        Ok(())
    }

    async fn find_active_queue_entry(&mut self, case_id: CaseId) -> Result<Option<CaseQueueEntry>> {
        let sql = format!("{} WHERE case_id = ? AND deleted_at IS NULL", QUEUE_SELECT);
        let row = sqlx::query(&sql)
            .bind(case_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(queue_entry_from_row).transpose()
    }

    async fn find_queue_entries_by_case(&mut self, case_id: CaseId) -> Result<Vec<CaseQueueEntry>> {
        let sql = format!("{} WHERE case_id = ?", QUEUE_SELECT);
        let rows = sqlx::query(&sql)
            .bind(case_id.to_string())
            .fetch_all(&mut *self.tx)
            .await?;
        let mut entries = rows.iter().map(queue_entry_from_row).collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        Ok(entries)
    }

    async fn list_active_queue_entries(&mut self) -> Result<Vec<CaseQueueEntry>> {
        let sql = format!("{} WHERE deleted_at IS NULL", QUEUE_SELECT);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        let mut entries = rows.iter().map(queue_entry_from_row).collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        Ok(entries)
    }

    async fn tombstone_queue_entry(&mut self, entry_id: QueueEntryId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE case_queue_entries SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(at)
            .bind(entry_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CaseScheduleRepository for SqliteTx {
    async fn insert_schedule_entry(&mut self, entry: &CaseScheduleEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO case_schedule_entries (id, case_id, due_at, created_at, deleted_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.case_id.to_string())
        .bind(entry.due_at)
        .bind(entry.created_at)
        .bind(entry.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or(e, || format!("Case {} is already scheduled", entry.case_id)))?;
        Ok(())
    }

    async fn update_schedule_entry(&mut self, entry: &CaseScheduleEntry) -> Result<()> {
        let result = sqlx::query("UPDATE case_schedule_entries SET due_at = ?, deleted_at = ? WHERE id = ?")
            .bind(entry.due_at)
            .bind(entry.deleted_at)
            .bind(entry.id.to_string())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CaseEngineError::not_found(format!("Schedule entry {}", entry.id)));
        }
        Ok(())
    }

    async fn find_active_schedule_entry(&mut self, case_id: CaseId) -> Result<Option<CaseScheduleEntry>> {
        let sql = format!("{} WHERE case_id = ? AND deleted_at IS NULL", SCHEDULE_SELECT);
        let row = sqlx::query(&sql)
            .bind(case_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(schedule_entry_from_row).transpose()
    }

    async fn list_active_schedule_entries(&mut self) -> Result<Vec<CaseScheduleEntry>> {
        let sql = format!("{} WHERE deleted_at IS NULL", SCHEDULE_SELECT);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        let mut entries = rows.iter().map(schedule_entry_from_row).collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| (entry.due_at, entry.id));
        Ok(entries)
    }

    async fn tombstone_schedule_entry(&mut self, entry_id: ScheduleEntryId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE case_schedule_entries SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(at)
            .bind(entry_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TelephonySessionRepository for SqliteTx {
    async fn insert_telephony_session(&mut self, session: &TelephonySession) -> Result<()> {
        sqlx::query(
            "INSERT INTO telephony_sessions (id, provider_reference, forwarded, created_at, ended_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.provider_reference.as_deref())
        .bind(session.forwarded)
        .bind(session.created_at)
        .bind(session.ended_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or(e, || format!("Telephony session {} already exists", session.id)))?;

        for event in &session.events {
            self.append_channel_event(session.id, event).await?;
        }
        Ok(())
    }

    async fn update_telephony_session(&mut self, session: &TelephonySession) -> Result<()> {
        let result = sqlx::query(
            "UPDATE telephony_sessions SET provider_reference = ?, forwarded = ?, ended_at = ? WHERE id = ?",
        )
        .bind(session.provider_reference.as_deref())
        .bind(session.forwarded)
        .bind(session.ended_at)
        .bind(session.id.to_string())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CaseEngineError::not_found(format!("Telephony session {}", session.id)));
        }
        Ok(())
    }

    async fn find_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Option<TelephonySession>> {
        let sql = format!("{} WHERE id = ?", TELEPHONY_SELECT);
        let row = sqlx::query(&sql)
            .bind(telephony_session_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => Ok(Some(self.load_telephony_session(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_telephony_session_by_provider_reference(
        &mut self,
        provider_reference: &str,
    ) -> Result<Option<TelephonySession>> {
        let sql = format!("{} WHERE provider_reference = ? ORDER BY created_at DESC LIMIT 1", TELEPHONY_SELECT);
        let row = sqlx::query(&sql)
            .bind(provider_reference)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => Ok(Some(self.load_telephony_session(row).await?)),
            None => Ok(None),
        }
    }

    async fn append_channel_event(
        &mut self,
        telephony_session_id: TelephonySessionId,
        event: &ChannelEvent,
    ) -> Result<()> {
        let sequence = i64::try_from(event.sequence)
            .map_err(|_| CaseEngineError::internal(format!("event sequence {} out of range", event.sequence)))?;
        let kind = serde_json::to_string(&event.kind)?;

        sqlx::query(
            "INSERT INTO telephony_channel_events (telephony_session_id, sequence, channel_id, occurred_at, kind)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(telephony_session_id.to_string())
        .bind(sequence)
        .bind(event.channel_id.0.as_str())
        .bind(event.occurred_at)
        .bind(kind)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!(
                    "Telephony session {} already has event #{}",
                    telephony_session_id, event.sequence
                )
            })
        })?;
        Ok(())
    }
}
