//! `Store`: the persistence contract every durable adapter (memory, sqlite, ...) must
//! implement (SPEC_FULL §6). Grounded on `domain/ports.rs`'s async-trait repository
//! contract style (`TaskRepository`, `GoalRepository`, ...), generalized to the durable
//! engine's execution/step/timer/schedule/audit/idempotency surface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DurableError;

use super::model::{Execution, ExecutionId, Schedule, StepOutcome, StepResult, Timer};

pub type StoreResult<T> = Result<T, DurableError>;

/// Durable persistence contract (SPEC_FULL §6). Every adapter (in-memory, sqlite, and the
/// feature-gated Redis/RabbitMQ queue/bus companions) is built against this trait so
/// `DurableService` never depends on a concrete backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_execution(&self, execution: &Execution) -> StoreResult<()>;
    async fn get_execution(&self, id: ExecutionId) -> StoreResult<Option<Execution>>;
    async fn update_execution(&self, id: ExecutionId, patch: ExecutionPatch) -> StoreResult<Execution>;
    async fn list_incomplete_executions(&self) -> StoreResult<Vec<Execution>>;
    /// Looks up the execution id previously reserved for an idempotency key, if any
    /// (SPEC_FULL §3 invariant 7, §4.6: `start()` idempotency).
    async fn find_execution_by_idempotency_key(&self, key: &str) -> StoreResult<Option<ExecutionId>>;
    /// Atomically reserves `key` for `execution_id` if unclaimed; returns the execution id
    /// that ended up owning the key (the caller's, or an existing one if another start()
    /// raced and won first).
    async fn reserve_idempotency_key(&self, key: &str, execution_id: ExecutionId) -> StoreResult<ExecutionId>;

    async fn get_step_result(&self, execution_id: ExecutionId, step_id: &str) -> StoreResult<Option<StepResult>>;
    async fn save_step_result(&self, execution_id: ExecutionId, step_id: &str, outcome: StepOutcome) -> StoreResult<()>;

    async fn create_timer(&self, timer: Timer) -> StoreResult<Timer>;
    async fn get_ready_timers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Timer>>;
    async fn mark_timer_fired(&self, id: Uuid) -> StoreResult<()>;
    async fn delete_timer(&self, id: Uuid) -> StoreResult<()>;
    /// Claims a timer for `worker_id` with a lease of `ttl_ms`, returning `true` if the
    /// claim succeeded (SPEC_FULL §3 invariant 6, §4.6: "claim/TTL ensures
    /// at-most-one worker advances it").
    async fn claim_timer(&self, id: Uuid, worker_id: &str, ttl_ms: i64) -> StoreResult<bool>;
    /// Timers belonging to this execution that have not yet fired (used by `waitForSignal`
    /// timeout cleanup, SPEC_FULL §8 scenario 5).
    async fn get_pending_timers_for_execution(&self, execution_id: ExecutionId) -> StoreResult<Vec<Timer>>;

    async fn create_schedule(&self, schedule: Schedule) -> StoreResult<Schedule>;
    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>>;
    async fn update_schedule(&self, schedule: Schedule) -> StoreResult<Schedule>;
    async fn delete_schedule(&self, id: Uuid) -> StoreResult<()>;
    async fn list_schedules(&self) -> StoreResult<Vec<Schedule>>;
    async fn list_active_schedules(&self) -> StoreResult<Vec<Schedule>>;

    /// Optional: append-only audit trail (SPEC_FULL §6). Adapters that don't support audit
    /// return `Ok(())` / `Ok(vec![])`; `DurableContext::note` swallows the error either way.
    async fn append_audit_entry(&self, entry: super::model::AuditEntry) -> StoreResult<()> {
        let _ = entry;
        Ok(())
    }
    async fn list_audit_entries(&self, execution_id: ExecutionId) -> StoreResult<Vec<super::model::AuditEntry>> {
        let _ = execution_id;
        Ok(vec![])
    }

    /// Optional: cooperative distributed lock, used by adapters that need mutual exclusion
    /// beyond timer claim/TTL (SPEC_FULL §6).
    async fn acquire_lock(&self, _key: &str, _ttl_ms: i64) -> StoreResult<bool> {
        Ok(true)
    }
    async fn release_lock(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }
}

/// A partial update to an [`Execution`] (SPEC_FULL §6: `updateExecution(id, patch)`).
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<super::model::ExecutionStatus>,
    pub attempt: Option<u32>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub cancel_reason: Option<String>,
}

impl ExecutionPatch {
    pub fn status(status: super::model::ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_cancel_reason(mut self, reason: impl Into<String>) -> Self {
        self.cancel_reason = Some(reason.into());
        self
    }
}
