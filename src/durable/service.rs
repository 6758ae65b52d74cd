//! `DurableService`: `start`/`wait`/`signal`/`cancelExecution`/schedule management, and the
//! `processExecution` state-machine algorithm (SPEC_FULL §4.6). Grounded on the teacher's
//! `services/workflow_engine.rs` (`WorkflowEngine::advance`/`handle_phase_complete` persisted
//! state-machine loop) and `services/task_schedule_service.rs` (cron/interval validation,
//! enable/disable-by-id shape).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::context::AsyncContext;
use crate::domain::errors::{DurableError, RuntimeError};

use super::bus::EventBus;
use super::context::{DurableContext, DurableOutcome, ImplicitStepIdPolicy};
use super::model::{AuditKind, Execution, ExecutionId, ExecutionStatus, Schedule, ScheduleKind, ScheduleStatus, Timer};
use super::queue::{Queue, QueueMessage};
use super::retry::backoff_delay;
use super::store::{ExecutionPatch, Store};

/// Message `type` used for queue-mode execute dispatches (SPEC_FULL §4.6 "Queue mode").
pub const EXECUTE_MESSAGE_TYPE: &str = "durable.execute";

/// Grace period before a queue-mode execute's failsafe kickoff timer fires, re-driving the
/// execution from the poller if the queue message was lost (SPEC_FULL §4.6 "Queue mode").
const FAILSAFE_DELAY_SECS: i64 = 60;

/// A durable task's body (SPEC_FULL §4.6): receives its input and a bound
/// [`DurableContext`] (retrieved inside the body via `durable_context()`), returns the final
/// result or a [`DurableOutcome`] signal.
pub type DurableTaskFn = Arc<
    dyn Fn(Value) -> crate::domain::definitions::BoxFuture<'static, Result<Value, DurableOutcome>>
        + Send
        + Sync,
>;

/// `durable.use()` inside a task body (SPEC_FULL §4.6). Errors if called outside
/// [`DurableService::process_execution`]'s bound scope.
pub fn durable_context() -> Result<Arc<DurableContext>, crate::domain::errors::ContextError> {
    DURABLE_CONTEXT.use_context()
}

static DURABLE_CONTEXT: once_context::Lazy<AsyncContext<DurableContext>> =
    once_context::Lazy::new(|| AsyncContext::new("durable.context"));

/// Thin lazy-static shim so [`DURABLE_CONTEXT`] can hold one process-wide
/// [`AsyncContext`] id without pulling in a dedicated crate for a single value.
mod once_context {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        init: fn() -> T,
        cell: OnceLock<T>,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self { init, cell: OnceLock::new() }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

/// Config knobs for a [`DurableService`] (SPEC_FULL §4.6, §6).
#[derive(Debug, Clone)]
pub struct DurableConfig {
    pub default_max_attempts: u32,
    pub audit_enabled: bool,
    pub implicit_step_id_policy: ImplicitStepIdPolicy,
    pub base_retry_delay_ms: u64,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            audit_enabled: true,
            implicit_step_id_policy: ImplicitStepIdPolicy::Allow,
            base_retry_delay_ms: 200,
        }
    }
}

/// Coordinates a registry of durable task bodies against a [`Store`] and optional
/// [`EventBus`] (SPEC_FULL §4.6). One `DurableService` typically backs one process; many
/// processes can share one `Store` for horizontal scaling (SPEC_FULL §6).
pub struct DurableService {
    store: Arc<dyn Store>,
    bus: Option<Arc<dyn EventBus>>,
    queue: Option<Arc<dyn Queue>>,
    tasks: std::collections::HashMap<String, DurableTaskFn>,
    config: DurableConfig,
}

impl DurableService {
    pub fn new(store: Arc<dyn Store>, bus: Option<Arc<dyn EventBus>>, config: DurableConfig) -> Self {
        Self {
            store,
            bus,
            queue: None,
            tasks: std::collections::HashMap::new(),
            config,
        }
    }

    /// Switches this service into "Queue mode" (SPEC_FULL §4.6): `start()` enqueues an
    /// execute message and arms a failsafe kickoff timer instead of driving
    /// [`Self::process_execution`] in-process, so a separate `Worker` pool does the work.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn register_task(&mut self, task_id: impl Into<String>, body: DurableTaskFn) {
        self.tasks.insert(task_id.into(), body);
    }

    /// `start(taskId, input, {idempotencyKey?, maxAttempts?})` (SPEC_FULL §4.6). Returns the
    /// same execution id for a repeated idempotency key rather than creating a duplicate
    /// execution (SPEC_FULL §3 invariant 7).
    pub async fn start(
        &self,
        task_id: &str,
        input: Value,
        idempotency_key: Option<String>,
        max_attempts: Option<u32>,
    ) -> Result<ExecutionId, DurableError> {
        if let Some(ref key) = idempotency_key {
            if let Some(existing) = self.store.find_execution_by_idempotency_key(key).await? {
                let prior = self
                    .store
                    .get_execution(existing)
                    .await?
                    .ok_or_else(|| DurableError::ExecutionNotFound(existing.to_string()))?;
                if prior.input != input {
                    return Err(DurableError::IdempotencyConflict { key: key.clone() });
                }
                return Ok(existing);
            }
        }

        let execution = Execution::new(
            task_id,
            input,
            max_attempts.unwrap_or(self.config.default_max_attempts),
            idempotency_key.clone(),
        );
        let id = execution.id;
        self.store.save_execution(&execution).await?;

        if let Some(key) = idempotency_key {
            let winner = self.store.reserve_idempotency_key(&key, id).await?;
            if winner != id {
                return Ok(winner);
            }
        }

        self.kick_off(id).await?;
        Ok(id)
    }

    /// `startAndWait` (SPEC_FULL §4.6): convenience for `start` followed by `wait`.
    pub async fn start_and_wait(
        &self,
        task_id: &str,
        input: Value,
        idempotency_key: Option<String>,
        max_attempts: Option<u32>,
        poll_interval: StdDuration,
    ) -> Result<Value, DurableError> {
        let id = self.start(task_id, input, idempotency_key, max_attempts).await?;
        self.wait(id, poll_interval).await
    }

    /// `wait(id)` (SPEC_FULL §4.6): polls until the execution reaches a terminal status.
    pub async fn wait(&self, id: ExecutionId, poll_interval: StdDuration) -> Result<Value, DurableError> {
        loop {
            let execution = self
                .store
                .get_execution(id)
                .await?
                .ok_or_else(|| DurableError::ExecutionNotFound(id.to_string()))?;
            match execution.status {
                ExecutionStatus::Completed => return Ok(execution.result.unwrap_or(Value::Null)),
                ExecutionStatus::Failed if execution.attempt >= execution.max_attempts => {
                    return Err(DurableError::Store(execution.error.unwrap_or_default()));
                }
                ExecutionStatus::Cancelled => {
                    return Err(DurableError::Cancelled {
                        execution_id: id.to_string(),
                        reason: execution.cancel_reason.unwrap_or_default(),
                    });
                }
                ExecutionStatus::CompensationFailed => {
                    return Err(DurableError::CompensationFailed {
                        execution_id: id.to_string(),
                        message: execution.error.unwrap_or_default(),
                    });
                }
                _ => tokio::time::sleep(poll_interval).await,
            }
        }
    }

    /// `cancelExecution(id, reason)` (SPEC_FULL §4.6). Takes effect the next time the
    /// execution is driven through [`Self::process_execution`] (at its next suspension
    /// point or retry), matching cooperative cancellation semantics.
    pub async fn cancel_execution(&self, id: ExecutionId, reason: impl Into<String>) -> Result<(), DurableError> {
        self.store
            .update_execution(id, ExecutionPatch::status(ExecutionStatus::Cancelled).with_cancel_reason(reason))
            .await?;
        Ok(())
    }

    /// `signal(event, payload, {executionId?})` (SPEC_FULL §4.6): delivers a payload to a
    /// `waitForSignal` call. `execution_id` pins the delivery to a single waiting execution;
    /// without it the caller is expected to have scoped `event` to one execution already.
    pub async fn signal(&self, execution_id: ExecutionId, event_id: &str, payload: Value) -> Result<(), DurableError> {
        let pending = self.store.get_pending_timers_for_execution(execution_id).await?;
        let waiting_timer = pending.iter().find(|t| {
            t.kind == super::model::TimerKind::SignalTimeout
                && t.step_id.as_deref().is_some_and(|s| s.starts_with(event_id))
        });

        let step_id = match waiting_timer {
            Some(timer) => timer.step_id.clone().expect("signal_timeout timers always carry a step_id"),
            None => format!("{event_id}:0:__implicit.signal.0"),
        };
        self.store
            .save_step_result(execution_id, &step_id, super::model::StepOutcome::SignalDelivered(payload))
            .await?;

        if let Some(timer) = waiting_timer {
            self.store.delete_timer(timer.id).await?;
        }

        self.kick_off(execution_id).await
    }

    /// `schedule`/`ensureSchedule` (SPEC_FULL §4.6). Materializes the schedule's first
    /// `scheduled` [`Timer`] immediately so the poller has something to pick up — without
    /// this, a newly created schedule has no armed timer and `next_run` never materializes
    /// an `Execution` (SPEC_FULL §4.6: "the poller materializes each due tick as a Timer of
    /// type `scheduled`").
    pub async fn ensure_schedule(
        &self,
        task_id: &str,
        kind: ScheduleKind,
        pattern: &str,
        input: Value,
    ) -> Result<Schedule, DurableError> {
        let next_run = super::poller::compute_next_run(kind, pattern, Utc::now())?;
        let schedule = Schedule {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            kind,
            pattern: pattern.to_string(),
            input,
            status: ScheduleStatus::Active,
            next_run,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let schedule = self.store.create_schedule(schedule).await?;
        self.arm_schedule_timer(&schedule).await?;
        Ok(schedule)
    }

    pub async fn pause_schedule(&self, id: Uuid) -> Result<Schedule, DurableError> {
        let mut schedule = self
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| DurableError::ScheduleNotFound(id.to_string()))?;
        schedule.status = ScheduleStatus::Paused;
        schedule.updated_at = Utc::now();
        self.store.update_schedule(schedule).await
    }

    /// Resuming re-arms a `scheduled` timer: `fire_scheduled` drops the timer for a paused
    /// schedule without re-arming one, so resuming would otherwise leave the schedule
    /// timer-less forever.
    pub async fn resume_schedule(&self, id: Uuid) -> Result<Schedule, DurableError> {
        let mut schedule = self
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| DurableError::ScheduleNotFound(id.to_string()))?;
        schedule.status = ScheduleStatus::Active;
        schedule.next_run = super::poller::compute_next_run(schedule.kind, &schedule.pattern, Utc::now())?;
        schedule.updated_at = Utc::now();
        let schedule = self.store.update_schedule(schedule).await?;
        self.arm_schedule_timer(&schedule).await?;
        Ok(schedule)
    }

    /// Editing a schedule recomputes `next_run`; any previously-armed timer now carries a
    /// stale `fire_at` that `fire_scheduled`'s edit-guard will refuse to act on, so a fresh
    /// timer matching the new `next_run` is armed here.
    pub async fn update_schedule(&self, id: Uuid, pattern: &str, input: Value) -> Result<Schedule, DurableError> {
        let mut schedule = self
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| DurableError::ScheduleNotFound(id.to_string()))?;
        schedule.pattern = pattern.to_string();
        schedule.input = input;
        schedule.next_run = super::poller::compute_next_run(schedule.kind, pattern, Utc::now())?;
        schedule.updated_at = Utc::now();
        let schedule = self.store.update_schedule(schedule).await?;
        if schedule.status == ScheduleStatus::Active {
            self.arm_schedule_timer(&schedule).await?;
        }
        Ok(schedule)
    }

    /// Creates the `scheduled` [`Timer`] for a schedule's current `next_run`.
    async fn arm_schedule_timer(&self, schedule: &Schedule) -> Result<(), DurableError> {
        self.store
            .create_timer(Timer::scheduled(schedule.id, schedule.task_id.clone(), schedule.input.clone(), schedule.next_run))
            .await?;
        Ok(())
    }

    pub async fn remove_schedule(&self, id: Uuid) -> Result<(), DurableError> {
        self.store.delete_schedule(id).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>, DurableError> {
        self.store.list_schedules().await
    }

    /// `recover()` (SPEC_FULL §4.6, §7 "Restart mid-sleep"): re-drives every incomplete
    /// execution through [`Self::process_execution`] on process startup.
    pub async fn recover(&self) -> Result<(), DurableError> {
        for execution in self.store.list_incomplete_executions().await? {
            if execution.status != ExecutionStatus::Sleeping {
                self.process_execution(execution.id).await?;
            }
        }
        Ok(())
    }

    async fn kick_off(&self, id: ExecutionId) -> Result<(), DurableError> {
        let Some(queue) = &self.queue else {
            return self.process_execution(id).await;
        };

        let fire_at = Utc::now() + chrono::Duration::seconds(FAILSAFE_DELAY_SECS);
        self.store.create_timer(Timer::kickoff_failsafe(id, fire_at)).await?;
        queue
            .enqueue(QueueMessage::new(
                EXECUTE_MESSAGE_TYPE,
                serde_json::json!({ "execution_id": id.to_string() }),
                1,
            ))
            .await?;
        Ok(())
    }

    /// The `processExecution` state-machine step (SPEC_FULL §4.6): runs (or resumes) one
    /// attempt, persisting every transition, and retrying with backoff when the task body
    /// fails and attempts remain.
    pub async fn process_execution(&self, id: ExecutionId) -> Result<(), DurableError> {
        let execution = self
            .store
            .get_execution(id)
            .await?
            .ok_or_else(|| DurableError::ExecutionNotFound(id.to_string()))?;

        if execution.status.is_terminal() {
            return Ok(());
        }

        let task = self
            .tasks
            .get(&execution.task_id)
            .ok_or_else(|| DurableError::Store(format!("no durable task registered for '{}'", execution.task_id)))?
            .clone();

        self.transition(id, execution.status, ExecutionStatus::Running).await?;

        let attempt = execution.attempt;
        let ctx = Arc::new(DurableContext::new(
            id,
            attempt,
            self.store.clone(),
            self.bus.clone(),
            self.config.audit_enabled,
            self.config.implicit_step_id_policy,
        ));

        let input = execution.input.clone();
        let outcome = DURABLE_CONTEXT
            .provide((*ctx).clone(), move || async move { task(input).await })
            .await;

        match outcome {
            Ok(value) => {
                self.store
                    .update_execution(id, ExecutionPatch::status(ExecutionStatus::Completed).with_result(value))
                    .await?;
                self.audit(id, AuditKind::ExecutionStatusChanged {
                    from: ExecutionStatus::Running.as_str().to_string(),
                    to: ExecutionStatus::Completed.as_str().to_string(),
                })
                .await;
                Ok(())
            }
            Err(DurableOutcome::Suspended) => {
                self.transition(id, ExecutionStatus::Running, ExecutionStatus::Sleeping).await
            }
            Err(DurableOutcome::Cancelled) => {
                self.transition(id, ExecutionStatus::Running, ExecutionStatus::Cancelled).await
            }
            Err(DurableOutcome::Failed(err)) => self.handle_failure(id, attempt, execution.max_attempts, err).await,
        }
    }

    async fn handle_failure(
        &self,
        id: ExecutionId,
        attempt: u32,
        max_attempts: u32,
        err: RuntimeError,
    ) -> Result<(), DurableError> {
        let next_attempt = attempt + 1;
        if next_attempt >= max_attempts {
            self.store
                .update_execution(
                    id,
                    ExecutionPatch::status(ExecutionStatus::Failed)
                        .with_attempt(next_attempt)
                        .with_error(err.to_string()),
                )
                .await?;
            self.audit(id, AuditKind::ExecutionStatusChanged {
                from: ExecutionStatus::Running.as_str().to_string(),
                to: ExecutionStatus::Failed.as_str().to_string(),
            })
            .await;
            return Ok(());
        }

        self.store
            .update_execution(
                id,
                ExecutionPatch::status(ExecutionStatus::Pending)
                    .with_attempt(next_attempt)
                    .with_error(err.to_string()),
            )
            .await?;
        let delay = backoff_delay(self.config.base_retry_delay_ms, next_attempt);
        tokio::time::sleep(delay).await;
        Box::pin(self.process_execution(id)).await
    }

    async fn transition(&self, id: ExecutionId, from: ExecutionStatus, to: ExecutionStatus) -> Result<(), DurableError> {
        self.store.update_execution(id, ExecutionPatch::status(to)).await?;
        self.audit(id, AuditKind::ExecutionStatusChanged {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
        .await;
        Ok(())
    }

    async fn audit(&self, id: ExecutionId, kind: AuditKind) {
        if self.config.audit_enabled {
            let _ = self.store.append_audit_entry(super::model::AuditEntry::new(id, kind)).await;
        }
    }
}

