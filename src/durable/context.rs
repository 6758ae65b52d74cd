//! `DurableContext`: the API a durable task's `run` function calls through `durable.use()`
//! (SPEC_FULL §4.6). Grounded on the teacher's `services/workflow_engine.rs`
//! persisted-state-machine pattern (`WorkflowEngine::advance`/`handle_phase_complete`),
//! generalized from a fixed phase sequence to arbitrary memoized `step()` calls plus
//! `sleep`/`waitForSignal` suspension.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::errors::{DurableError, RuntimeError, RuntimeErrorKind};

use super::bus::{BusMessage, EventBus, DURABLE_EVENTS_CHANNEL};
use super::model::{AuditEntry, AuditKind, ExecutionId, StepOutcome, Timer};
use super::store::Store;

/// How implicit (caller-omitted) step ids are generated for `sleep`/`emit`/`waitForSignal`
/// (SPEC_FULL §4.6: "Implicit internal step ids").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImplicitStepIdPolicy {
    #[default]
    Allow,
    Warn,
    Error,
}

/// Raised via `?` to unwind a durable task's `run` body back to `processExecution` without
/// it needing to interpret intermediate suspension state itself (SPEC_FULL §9: "model
/// suspension... as a typed signal the runner must catch and interpret").
#[derive(Debug, Clone)]
pub enum DurableOutcome {
    /// The execution must suspend; `processExecution` transitions it to `sleeping` and
    /// returns. The next fire (timer, signal, poller) re-enters `run` from the top, and
    /// already-completed steps replay from the journal instead of re-running.
    Suspended,
    /// `cancelExecution` was observed at a suspension point.
    Cancelled,
    Failed(RuntimeError),
}

impl From<DurableError> for DurableOutcome {
    fn from(e: DurableError) -> Self {
        Self::Failed(RuntimeError {
            kind: RuntimeErrorKind::Task,
            source_id: "durable".to_string(),
            message: e.to_string(),
        })
    }
}

impl From<RuntimeError> for DurableOutcome {
    fn from(e: RuntimeError) -> Self {
        Self::Failed(e)
    }
}

/// What `waitForSignal` observed (SPEC_FULL §4.6).
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Signal(serde_json::Value),
    Timeout,
}

struct Compensation {
    step_id: String,
    down: Arc<
        dyn Fn() -> crate::domain::definitions::BoxFuture<'static, Result<(), RuntimeError>>
            + Send
            + Sync,
    >,
}

/// The durable-execution API available inside a task's `run` function (SPEC_FULL §4.6
/// table). One `DurableContext` is created per `processExecution` attempt and bound via
/// `contextProvider` so `task.run(input)` can call `durable.use()`
/// ([`crate::context::AsyncContext`]).
#[derive(Clone)]
pub struct DurableContext {
    pub execution_id: ExecutionId,
    pub attempt: u32,
    store: Arc<dyn Store>,
    bus: Option<Arc<dyn EventBus>>,
    audit_enabled: bool,
    implicit_policy: ImplicitStepIdPolicy,
    implicit_counter: Arc<std::sync::atomic::AtomicU64>,
    compensations: Arc<Mutex<Vec<Compensation>>>,
}

impl DurableContext {
    pub fn new(
        execution_id: ExecutionId,
        attempt: u32,
        store: Arc<dyn Store>,
        bus: Option<Arc<dyn EventBus>>,
        audit_enabled: bool,
        implicit_policy: ImplicitStepIdPolicy,
    ) -> Self {
        Self {
            execution_id,
            attempt,
            store,
            bus,
            audit_enabled,
            implicit_policy,
            implicit_counter: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            compensations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn implicit_id(&self, prefix: &str) -> String {
        let n = self.implicit_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        match self.implicit_policy {
            ImplicitStepIdPolicy::Error => {
                panic!("implicit internal step ids are disabled (determinism.implicitInternalStepIds = error); pass an explicit stepId to {prefix}");
            }
            ImplicitStepIdPolicy::Warn => {
                tracing::warn!(prefix, n, "using an implicit internal step id; pass an explicit stepId for clarity");
            }
            ImplicitStepIdPolicy::Allow => {}
        }
        format!("__implicit.{prefix}.{n}")
    }

    /// `step(id, fn)` (SPEC_FULL §4.6). Memoized: a stored result for `(executionId, id)`
    /// is returned without calling `f` again (SPEC_FULL §3 invariant 5).
    pub async fn step<F, Fut, T>(&self, id: &str, f: F) -> Result<T, DurableOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
        T: Serialize + DeserializeOwned,
    {
        if let Some(existing) = self.store.get_step_result(self.execution_id, id).await? {
            if let StepOutcome::Value(v) = existing.outcome {
                return serde_json::from_value(v).map_err(|e| {
                    DurableOutcome::Failed(RuntimeError {
                        kind: RuntimeErrorKind::Task,
                        source_id: id.to_string(),
                        message: format!("failed to replay step '{id}': {e}"),
                    })
                });
            }
        }

        let value = f().await.map_err(DurableOutcome::Failed)?;
        let json = serde_json::to_value(&value).map_err(|e| {
            DurableOutcome::Failed(RuntimeError {
                kind: RuntimeErrorKind::Task,
                source_id: id.to_string(),
                message: format!("failed to serialize step '{id}' result: {e}"),
            })
        })?;
        self.store
            .save_step_result(self.execution_id, id, StepOutcome::Value(json))
            .await?;
        self.note_internal(AuditKind::StepCompleted { step_id: id.to_string() }).await;
        Ok(value)
    }

    /// `step(id).up(fn).down(fn)` (SPEC_FULL §4.6): like `step`, but also records a
    /// compensation that [`Self::rollback`] can later invoke in reverse completion order.
    pub async fn step_with_compensation<F, Fut, T, C, CFut>(
        &self,
        id: &str,
        up: F,
        down: C,
    ) -> Result<T, DurableOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
        T: Serialize + DeserializeOwned,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Result<(), RuntimeError>> + Send + 'static,
    {
        let value = self.step(id, up).await?;
        let down = Arc::new(down);
        self.compensations.lock().await.push(Compensation {
            step_id: id.to_string(),
            down: Arc::new(move || Box::pin(down())),
        });
        Ok(value)
    }

    /// `sleep(ms, {stepId?})` (SPEC_FULL §4.6). First call persists a sleep marker and a
    /// [`Timer`], then suspends; replay after the timer fires returns normally.
    pub async fn sleep(&self, ms: i64, step_id: Option<&str>) -> Result<(), DurableOutcome> {
        let id = step_id
            .map(str::to_string)
            .unwrap_or_else(|| self.implicit_id("sleep"));

        match self.store.get_step_result(self.execution_id, &id).await? {
            Some(existing) => match existing.outcome {
                StepOutcome::SleepFired => {
                    self.note_internal(AuditKind::SleepCompleted { step_id: id }).await;
                    Ok(())
                }
                _ => Err(DurableOutcome::Suspended),
            },
            None => {
                let fire_at = Utc::now() + ChronoDuration::milliseconds(ms);
                self.store
                    .save_step_result(self.execution_id, &id, StepOutcome::Sleeping)
                    .await?;
                self.store.create_timer(Timer::sleep(self.execution_id, &id, fire_at)).await?;
                self.note_internal(AuditKind::SleepScheduled { step_id: id, fire_at }).await;
                Err(DurableOutcome::Suspended)
            }
        }
    }

    /// `waitForSignal(event, {timeoutMs?})` (SPEC_FULL §4.6).
    pub async fn wait_for_signal(
        &self,
        event_id: &str,
        timeout_ms: Option<i64>,
        step_id: Option<&str>,
    ) -> Result<SignalOutcome, DurableOutcome> {
        let id = step_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}:{}", event_id, self.attempt, self.implicit_id("signal")));

        match self.store.get_step_result(self.execution_id, &id).await? {
            Some(existing) => match existing.outcome {
                StepOutcome::SignalDelivered(payload) => {
                    self.note_internal(AuditKind::SignalDelivered { event_id: event_id.to_string() }).await;
                    Ok(SignalOutcome::Signal(payload))
                }
                StepOutcome::TimedOut => {
                    self.note_internal(AuditKind::SignalTimedOut { event_id: event_id.to_string() }).await;
                    Ok(SignalOutcome::Timeout)
                }
                _ => Err(DurableOutcome::Suspended),
            },
            None => {
                self.store
                    .save_step_result(self.execution_id, &id, StepOutcome::Waiting)
                    .await?;
                self.note_internal(AuditKind::SignalWaiting { event_id: event_id.to_string() }).await;
                if let Some(timeout_ms) = timeout_ms {
                    let fire_at = Utc::now() + ChronoDuration::milliseconds(timeout_ms);
                    self.store
                        .create_timer(Timer::signal_timeout(self.execution_id, &id, fire_at))
                        .await?;
                }
                Err(DurableOutcome::Suspended)
            }
        }
    }

    /// `emit(event, payload)` (SPEC_FULL §4.6): idempotent via an internal step id;
    /// publishes to [`DURABLE_EVENTS_CHANNEL`] exactly once across retries.
    pub async fn emit(&self, event_id: &str, payload: serde_json::Value) -> Result<(), DurableOutcome> {
        let id = format!("__emit.{event_id}.{}", self.implicit_id("emit"));
        let bus = self.bus.clone();
        let event_id_owned = event_id.to_string();
        self.step(&id, move || async move {
            if let Some(bus) = bus {
                bus.publish(DURABLE_EVENTS_CHANNEL, BusMessage::new(event_id_owned, payload))
                    .await
                    .map_err(|e| RuntimeError {
                        kind: RuntimeErrorKind::Task,
                        source_id: "durable.emit".to_string(),
                        message: e.to_string(),
                    })?;
            }
            Ok(())
        })
        .await?;
        self.note_internal(AuditKind::EmitPublished { event_id: event_id.to_string() }).await;
        Ok(())
    }

    /// `note(msg, meta?)` (SPEC_FULL §4.6): no-op when audit is disabled or the store lacks
    /// audit support; failures are swallowed (SPEC_FULL §7).
    pub async fn note(&self, message: impl Into<String>, meta: Option<serde_json::Value>) {
        self.note_internal(AuditKind::Note {
            message: message.into(),
            meta,
        })
        .await;
    }

    async fn note_internal(&self, kind: AuditKind) {
        if !self.audit_enabled {
            return;
        }
        let _ = self.store.append_audit_entry(AuditEntry::new(self.execution_id, kind)).await;
    }

    /// `rollback()` (SPEC_FULL §4.6): walks recorded compensations in reverse completion
    /// order. A throwing compensation surfaces its error to the caller; the execution's
    /// terminal status (`compensation_failed`) is set by [`super::service::DurableService`].
    pub async fn rollback(&self) -> Result<(), DurableError> {
        let compensations = self.compensations.lock().await;
        for entry in compensations.iter().rev() {
            (entry.down)().await.map_err(|e| DurableError::CompensationFailed {
                execution_id: self.execution_id.to_string(),
                message: format!("step '{}': {e}", entry.step_id),
            })?;
        }
        Ok(())
    }
}

/// The deterministic call-order sequence `step` ids must follow across replays is enforced
/// simply by running `run` from the top every time: each `step`/`sleep`/`waitForSignal`
/// call reaches the store in the same order it did previously, so the n-th call always
/// looks up the n-th implicit id (SPEC_FULL §5: "step ids produce a deterministic sequence
/// across replays").
pub fn timer_fire_delay(fire_at: DateTime<Utc>, now: DateTime<Utc>) -> ChronoDuration {
    fire_at - now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;

    fn ctx(store: Arc<dyn Store>) -> DurableContext {
        DurableContext::new(ExecutionId::new(), 0, store, None, true, ImplicitStepIdPolicy::Allow)
    }

    #[tokio::test]
    async fn step_runs_once_and_replays_from_journal() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let c = ctx(store);
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let run = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, RuntimeError>("A".to_string())
            }
        };

        let first = c.step("a", run).await.unwrap();
        let second = c.step("a", run).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sleep_suspends_then_resumes_after_timer_fires() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let c = ctx(store.clone());

        let first = c.sleep(10, Some("s1")).await;
        assert!(matches!(first, Err(DurableOutcome::Suspended)));

        store
            .save_step_result(c.execution_id, "s1", StepOutcome::SleepFired)
            .await
            .unwrap();

        let second = c.sleep(10, Some("s1")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn rollback_walks_compensations_in_reverse() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let c = ctx(store);
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["one", "two"] {
            let order = order.clone();
            let name_owned = name.to_string();
            c.step_with_compensation(
                name,
                || async { Ok::<_, RuntimeError>(()) },
                move || {
                    let order = order.clone();
                    let name_owned = name_owned.clone();
                    async move {
                        order.lock().await.push(name_owned);
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();
        }

        c.rollback().await.unwrap();
        assert_eq!(*order.lock().await, vec!["two".to_string(), "one".to_string()]);
    }
}
