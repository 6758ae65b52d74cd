//! sqlx-backed [`Store`] implementation (SPEC_FULL §6: "sqlite: single-file durability for a
//! single process or a small fleet sharing one file"). Grounded on the teacher's
//! `adapters/sqlite/task_repository.rs` (bind-and-query shape against a `SqlitePool`) and
//! `adapters/sqlite/connection.rs` (pool construction), reusing [`super::migrations::Migrator`]
//! for schema management.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::DurableError;
use crate::durable::model::{
    AuditEntry, Execution, ExecutionId, ExecutionStatus, Schedule, ScheduleKind, ScheduleStatus,
    StepOutcome, StepResult, Timer, TimerKind, TimerStatus,
};
use crate::durable::store::{ExecutionPatch, Store, StoreResult};

use super::migrations::Migration;

/// Embedded schema for the durable engine's tables (SPEC_FULL §3 data model).
pub fn durable_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "durable engine core tables".to_string(),
        sql: r#"
            CREATE TABLE IF NOT EXISTS durable_executions (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                input TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                result TEXT,
                error TEXT,
                idempotency_key TEXT,
                cancel_reason TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS durable_executions_idempotency_key
                ON durable_executions (idempotency_key) WHERE idempotency_key IS NOT NULL;

            CREATE TABLE IF NOT EXISTS durable_step_results (
                execution_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (execution_id, step_id)
            );

            CREATE TABLE IF NOT EXISTS durable_timers (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                execution_id TEXT,
                step_id TEXT,
                schedule_id TEXT,
                task_id TEXT,
                input TEXT,
                fire_at TEXT NOT NULL,
                status TEXT NOT NULL,
                claimed_by TEXT,
                claim_expires_at TEXT
            );
            CREATE INDEX IF NOT EXISTS durable_timers_ready ON durable_timers (status, fire_at);

            CREATE TABLE IF NOT EXISTS durable_schedules (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                pattern TEXT NOT NULL,
                input TEXT NOT NULL,
                status TEXT NOT NULL,
                next_run TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS durable_audit_log (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                at TEXT NOT NULL,
                kind TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS durable_audit_log_execution ON durable_audit_log (execution_id);

            CREATE TABLE IF NOT EXISTS durable_locks (
                key TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            );
        "#
        .to_string(),
    }]
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_sqlx(e: sqlx::Error) -> DurableError {
    DurableError::Store(e.to_string())
}

fn map_json(e: serde_json::Error) -> DurableError {
    DurableError::Store(format!("serialization error: {e}"))
}

fn status_str(s: ExecutionStatus) -> &'static str {
    s.as_str()
}

fn status_from_str(s: &str) -> Result<ExecutionStatus, DurableError> {
    Ok(match s {
        "pending" => ExecutionStatus::Pending,
        "running" => ExecutionStatus::Running,
        "sleeping" => ExecutionStatus::Sleeping,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        "compensation_failed" => ExecutionStatus::CompensationFailed,
        other => return Err(DurableError::Store(format!("unknown execution status '{other}'"))),
    })
}

fn row_to_execution(row: ExecutionRow) -> Result<Execution, DurableError> {
    Ok(Execution {
        id: row.id.parse().map_err(|e: uuid::Error| DurableError::Store(e.to_string()))?,
        task_id: row.task_id,
        input: serde_json::from_str(&row.input).map_err(map_json)?,
        status: status_from_str(&row.status)?,
        attempt: row.attempt as u32,
        max_attempts: row.max_attempts as u32,
        created_at: row.created_at,
        updated_at: row.updated_at,
        result: row.result.as_deref().map(serde_json::from_str).transpose().map_err(map_json)?,
        error: row.error,
        idempotency_key: row.idempotency_key,
        cancel_reason: row.cancel_reason,
    })
}

struct ExecutionRow {
    id: String,
    task_id: String,
    input: String,
    status: String,
    attempt: i64,
    max_attempts: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    result: Option<String>,
    error: Option<String>,
    idempotency_key: Option<String>,
    cancel_reason: Option<String>,
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_execution(&self, execution: &Execution) -> StoreResult<()> {
        let input = serde_json::to_string(&execution.input).map_err(map_json)?;
        let result = execution.result.as_ref().map(serde_json::to_string).transpose().map_err(map_json)?;
        sqlx::query(
            r#"INSERT INTO durable_executions
               (id, task_id, input, status, attempt, max_attempts, created_at, updated_at, result, error, idempotency_key, cancel_reason)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.task_id)
        .bind(input)
        .bind(status_str(execution.status))
        .bind(execution.attempt as i64)
        .bind(execution.max_attempts as i64)
        .bind(execution.created_at.to_rfc3339())
        .bind(execution.updated_at.to_rfc3339())
        .bind(result)
        .bind(&execution.error)
        .bind(&execution.idempotency_key)
        .bind(&execution.cancel_reason)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_execution(&self, id: ExecutionId) -> StoreResult<Option<Execution>> {
        self.get_execution_dynamic(id).await
    }

    async fn update_execution(&self, id: ExecutionId, patch: ExecutionPatch) -> StoreResult<Execution> {
        let mut execution = self
            .get_execution_dynamic(id)
            .await?
            .ok_or_else(|| DurableError::ExecutionNotFound(id.to_string()))?;
        if let Some(status) = patch.status {
            execution.status = status;
        }
        if let Some(attempt) = patch.attempt {
            execution.attempt = attempt;
        }
        if let Some(result) = patch.result {
            execution.result = Some(result);
        }
        if let Some(error) = patch.error {
            execution.error = Some(error);
        }
        if let Some(reason) = patch.cancel_reason {
            execution.cancel_reason = Some(reason);
        }
        execution.updated_at = Utc::now();

        let result = execution.result.as_ref().map(serde_json::to_string).transpose().map_err(map_json)?;
        sqlx::query(
            r#"UPDATE durable_executions SET status = ?, attempt = ?, result = ?, error = ?, cancel_reason = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(status_str(execution.status))
        .bind(execution.attempt as i64)
        .bind(result)
        .bind(&execution.error)
        .bind(&execution.cancel_reason)
        .bind(execution.updated_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(execution)
    }

    async fn list_incomplete_executions(&self) -> StoreResult<Vec<Execution>> {
        let rows = sqlx::query(
            "SELECT id FROM durable_executions WHERE status NOT IN ('completed', 'cancelled', 'compensation_failed', 'failed')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            use sqlx::Row;
            let id: String = row.get("id");
            if let Some(execution) = self.get_execution_dynamic(id.parse().map_err(|e: uuid::Error| DurableError::Store(e.to_string()))?).await? {
                out.push(execution);
            }
        }
        Ok(out)
    }

    async fn find_execution_by_idempotency_key(&self, key: &str) -> StoreResult<Option<ExecutionId>> {
        use sqlx::Row;
        let row = sqlx::query("SELECT id FROM durable_executions WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| {
            let id: String = r.get("id");
            id.parse().map_err(|e: uuid::Error| DurableError::Store(e.to_string()))
        })
        .transpose()
    }

    async fn reserve_idempotency_key(&self, key: &str, execution_id: ExecutionId) -> StoreResult<ExecutionId> {
        if let Some(existing) = self.find_execution_by_idempotency_key(key).await? {
            return Ok(existing);
        }
        Ok(execution_id)
    }

    async fn get_step_result(&self, execution_id: ExecutionId, step_id: &str) -> StoreResult<Option<StepResult>> {
        use sqlx::Row;
        let row = sqlx::query(
            "SELECT outcome, completed_at FROM durable_step_results WHERE execution_id = ? AND step_id = ?",
        )
        .bind(execution_id.to_string())
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        let Some(row) = row else { return Ok(None) };
        let outcome: String = row.get("outcome");
        let completed_at: String = row.get("completed_at");
        Ok(Some(StepResult {
            execution_id,
            step_id: step_id.to_string(),
            outcome: serde_json::from_str::<StepOutcome>(&outcome).map_err(map_json)?,
            completed_at: DateTime::parse_from_rfc3339(&completed_at)
                .map_err(|e| DurableError::Store(e.to_string()))?
                .with_timezone(&Utc),
        }))
    }

    async fn save_step_result(&self, execution_id: ExecutionId, step_id: &str, outcome: StepOutcome) -> StoreResult<()> {
        let outcome_json = serde_json::to_string(&outcome).map_err(map_json)?;
        sqlx::query(
            r#"INSERT INTO durable_step_results (execution_id, step_id, outcome, completed_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (execution_id, step_id) DO UPDATE SET outcome = excluded.outcome, completed_at = excluded.completed_at"#,
        )
        .bind(execution_id.to_string())
        .bind(step_id)
        .bind(outcome_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn create_timer(&self, timer: Timer) -> StoreResult<Timer> {
        let input = timer.input.as_ref().map(serde_json::to_string).transpose().map_err(map_json)?;
        sqlx::query(
            r#"INSERT INTO durable_timers
               (id, kind, execution_id, step_id, schedule_id, task_id, input, fire_at, status, claimed_by, claim_expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(timer.id.to_string())
        .bind(timer_kind_str(timer.kind))
        .bind(timer.execution_id.map(|e| e.to_string()))
        .bind(&timer.step_id)
        .bind(timer.schedule_id.map(|s| s.to_string()))
        .bind(&timer.task_id)
        .bind(input)
        .bind(timer.fire_at.to_rfc3339())
        .bind(timer_status_str(timer.status))
        .bind(&timer.claimed_by)
        .bind(timer.claim_expires_at.map(|e| e.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(timer)
    }

    async fn get_ready_timers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Timer>> {
        use sqlx::Row;
        let rows = sqlx::query("SELECT id FROM durable_timers WHERE status = 'pending' AND fire_at <= ?")
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            if let Some(timer) = self.get_timer(Uuid::parse_str(&id).map_err(|e| DurableError::Store(e.to_string()))?).await? {
                out.push(timer);
            }
        }
        Ok(out)
    }

    async fn mark_timer_fired(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE durable_timers SET status = 'fired' WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn delete_timer(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM durable_timers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn claim_timer(&self, id: Uuid, worker_id: &str, ttl_ms: i64) -> StoreResult<bool> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(ttl_ms);
        let result = sqlx::query(
            r#"UPDATE durable_timers SET claimed_by = ?, claim_expires_at = ?
               WHERE id = ? AND (claimed_by IS NULL OR claim_expires_at <= ?)"#,
        )
        .bind(worker_id)
        .bind(expires_at.to_rfc3339())
        .bind(id.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_pending_timers_for_execution(&self, execution_id: ExecutionId) -> StoreResult<Vec<Timer>> {
        use sqlx::Row;
        let rows = sqlx::query("SELECT id FROM durable_timers WHERE execution_id = ? AND status = 'pending'")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            if let Some(timer) = self.get_timer(Uuid::parse_str(&id).map_err(|e| DurableError::Store(e.to_string()))?).await? {
                out.push(timer);
            }
        }
        Ok(out)
    }

    async fn create_schedule(&self, schedule: Schedule) -> StoreResult<Schedule> {
        let input = serde_json::to_string(&schedule.input).map_err(map_json)?;
        sqlx::query(
            r#"INSERT INTO durable_schedules (id, task_id, kind, pattern, input, status, next_run, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule_kind_str(schedule.kind))
        .bind(&schedule.task_id)
        .bind(&schedule.pattern)
        .bind(input)
        .bind(schedule_status_str(schedule.status))
        .bind(schedule.next_run.to_rfc3339())
        .bind(schedule.created_at.to_rfc3339())
        .bind(schedule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(schedule)
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        self.get_schedule_dynamic(id).await
    }

    async fn update_schedule(&self, schedule: Schedule) -> StoreResult<Schedule> {
        let input = serde_json::to_string(&schedule.input).map_err(map_json)?;
        sqlx::query(
            r#"UPDATE durable_schedules SET pattern = ?, input = ?, status = ?, next_run = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&schedule.pattern)
        .bind(input)
        .bind(schedule_status_str(schedule.status))
        .bind(schedule.next_run.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(schedule.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(schedule)
    }

    async fn delete_schedule(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM durable_schedules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn list_schedules(&self) -> StoreResult<Vec<Schedule>> {
        use sqlx::Row;
        let rows = sqlx::query("SELECT id FROM durable_schedules")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            if let Some(schedule) = self.get_schedule_dynamic(Uuid::parse_str(&id).map_err(|e| DurableError::Store(e.to_string()))?).await? {
                out.push(schedule);
            }
        }
        Ok(out)
    }

    async fn list_active_schedules(&self) -> StoreResult<Vec<Schedule>> {
        Ok(self
            .list_schedules()
            .await?
            .into_iter()
            .filter(|s| s.status == ScheduleStatus::Active)
            .collect())
    }

    async fn append_audit_entry(&self, entry: AuditEntry) -> StoreResult<()> {
        let kind = serde_json::to_string(&entry.kind).map_err(map_json)?;
        sqlx::query("INSERT INTO durable_audit_log (id, execution_id, at, kind) VALUES (?, ?, ?, ?)")
            .bind(entry.id.to_string())
            .bind(entry.execution_id.to_string())
            .bind(entry.at.to_rfc3339())
            .bind(kind)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn list_audit_entries(&self, execution_id: ExecutionId) -> StoreResult<Vec<AuditEntry>> {
        use sqlx::Row;
        let rows = sqlx::query("SELECT id, at, kind FROM durable_audit_log WHERE execution_id = ? ORDER BY at ASC")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let at: String = row.get("at");
                let kind: String = row.get("kind");
                Ok(AuditEntry {
                    id: Uuid::parse_str(&id).map_err(|e| DurableError::Store(e.to_string()))?,
                    execution_id,
                    at: DateTime::parse_from_rfc3339(&at).map_err(|e| DurableError::Store(e.to_string()))?.with_timezone(&Utc),
                    kind: serde_json::from_str(&kind).map_err(map_json)?,
                })
            })
            .collect()
    }

    async fn acquire_lock(&self, key: &str, ttl_ms: i64) -> StoreResult<bool> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(ttl_ms);
        sqlx::query("DELETE FROM durable_locks WHERE key = ? AND expires_at <= ?")
            .bind(key)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let result = sqlx::query("INSERT OR IGNORE INTO durable_locks (key, expires_at) VALUES (?, ?)")
            .bind(key)
            .bind(expires_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM durable_locks WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

fn timer_kind_str(k: TimerKind) -> &'static str {
    match k {
        TimerKind::Sleep => "sleep",
        TimerKind::SignalTimeout => "signal_timeout",
        TimerKind::Scheduled => "scheduled",
        TimerKind::KickoffFailsafe => "kickoff_failsafe",
    }
}

fn timer_status_str(s: TimerStatus) -> &'static str {
    match s {
        TimerStatus::Pending => "pending",
        TimerStatus::Fired => "fired",
    }
}

fn schedule_kind_str(k: ScheduleKind) -> &'static str {
    match k {
        ScheduleKind::Cron => "cron",
        ScheduleKind::Interval => "interval",
    }
}

fn schedule_status_str(s: ScheduleStatus) -> &'static str {
    match s {
        ScheduleStatus::Active => "active",
        ScheduleStatus::Paused => "paused",
    }
}

impl SqliteStore {
    async fn get_execution_dynamic(&self, id: ExecutionId) -> StoreResult<Option<Execution>> {
        use sqlx::Row;
        let row = sqlx::query("SELECT * FROM durable_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let Some(row) = row else { return Ok(None) };
        row_to_execution(ExecutionRow {
            id: row.get("id"),
            task_id: row.get("task_id"),
            input: row.get("input"),
            status: row.get("status"),
            attempt: row.get("attempt"),
            max_attempts: row.get("max_attempts"),
            created_at: DateTime::parse_from_rfc3339(row.get("created_at"))
                .map_err(|e| DurableError::Store(e.to_string()))?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(row.get("updated_at"))
                .map_err(|e| DurableError::Store(e.to_string()))?
                .with_timezone(&Utc),
            result: row.get("result"),
            error: row.get("error"),
            idempotency_key: row.get("idempotency_key"),
            cancel_reason: row.get("cancel_reason"),
        })
        .map(Some)
    }

    async fn get_timer(&self, id: Uuid) -> StoreResult<Option<Timer>> {
        use sqlx::Row;
        let row = sqlx::query("SELECT * FROM durable_timers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let Some(row) = row else { return Ok(None) };
        let input: Option<String> = row.get("input");
        Ok(Some(Timer {
            id,
            kind: match row.get::<String, _>("kind").as_str() {
                "sleep" => TimerKind::Sleep,
                "signal_timeout" => TimerKind::SignalTimeout,
                "scheduled" => TimerKind::Scheduled,
                _ => TimerKind::KickoffFailsafe,
            },
            execution_id: row
                .get::<Option<String>, _>("execution_id")
                .map(|s| s.parse())
                .transpose()
                .map_err(|e: uuid::Error| DurableError::Store(e.to_string()))?,
            step_id: row.get("step_id"),
            schedule_id: row
                .get::<Option<String>, _>("schedule_id")
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| DurableError::Store(e.to_string()))?,
            task_id: row.get("task_id"),
            input: input.map(|s| serde_json::from_str(&s)).transpose().map_err(map_json)?,
            fire_at: DateTime::parse_from_rfc3339(row.get("fire_at"))
                .map_err(|e| DurableError::Store(e.to_string()))?
                .with_timezone(&Utc),
            status: match row.get::<String, _>("status").as_str() {
                "fired" => TimerStatus::Fired,
                _ => TimerStatus::Pending,
            },
            claimed_by: row.get("claimed_by"),
            claim_expires_at: row
                .get::<Option<String>, _>("claim_expires_at")
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                .transpose()
                .map_err(|e| DurableError::Store(e.to_string()))?,
        }))
    }

    async fn get_schedule_dynamic(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        use sqlx::Row;
        let row = sqlx::query("SELECT * FROM durable_schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(Schedule {
            id,
            task_id: row.get("task_id"),
            kind: match row.get::<String, _>("kind").as_str() {
                "interval" => ScheduleKind::Interval,
                _ => ScheduleKind::Cron,
            },
            pattern: row.get("pattern"),
            input: serde_json::from_str(row.get("input")).map_err(map_json)?,
            status: match row.get::<String, _>("status").as_str() {
                "paused" => ScheduleStatus::Paused,
                _ => ScheduleStatus::Active,
            },
            next_run: DateTime::parse_from_rfc3339(row.get("next_run"))
                .map_err(|e| DurableError::Store(e.to_string()))?
                .with_timezone(&Utc),
            created_at: DateTime::parse_from_rfc3339(row.get("created_at"))
                .map_err(|e| DurableError::Store(e.to_string()))?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(row.get("updated_at"))
                .map_err(|e| DurableError::Store(e.to_string()))?
                .with_timezone(&Utc),
        }))
    }
}
