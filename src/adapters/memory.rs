//! In-memory `Store`/`EventBus`/`Queue` adapters (SPEC_FULL §6, Cargo feature `memory`,
//! enabled by default). Grounded on the teacher's `services/event_bus.rs`
//! (`tokio::sync::RwLock`-guarded maps plus `broadcast` fanout) and `services/task_schedule_service.rs`
//! (in-memory schedule bookkeeping), generalized into the durable engine's `Store`/`EventBus`/
//! `Queue` traits so single-process tests and demos need no external dependency.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::errors::DurableError;
use crate::durable::bus::{BusHandler, BusMessage, EventBus};
use crate::durable::model::{Execution, ExecutionId, Schedule, StepOutcome, StepResult, Timer, TimerStatus};
use crate::durable::queue::{Queue, QueueHandler, QueueMessage};
use crate::durable::store::{ExecutionPatch, Store, StoreResult};

/// In-process [`Store`] backed by `HashMap`s behind an `RwLock` (SPEC_FULL §6: "memory:
/// single-process, no external dependency, data lost on restart").
#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
    idempotency_keys: RwLock<HashMap<String, ExecutionId>>,
    step_results: RwLock<HashMap<(ExecutionId, String), StepResult>>,
    timers: RwLock<HashMap<Uuid, Timer>>,
    schedules: RwLock<HashMap<Uuid, Schedule>>,
    audit: RwLock<HashMap<ExecutionId, Vec<crate::durable::model::AuditEntry>>>,
    locks: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_execution(&self, execution: &Execution) -> StoreResult<()> {
        self.executions.write().await.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: ExecutionId) -> StoreResult<Option<Execution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update_execution(&self, id: ExecutionId, patch: ExecutionPatch) -> StoreResult<Execution> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(&id)
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
        Ok(execution.clone())
    }

    async fn list_incomplete_executions(&self) -> StoreResult<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn find_execution_by_idempotency_key(&self, key: &str) -> StoreResult<Option<ExecutionId>> {
        Ok(self.idempotency_keys.read().await.get(key).copied())
    }

    async fn reserve_idempotency_key(&self, key: &str, execution_id: ExecutionId) -> StoreResult<ExecutionId> {
        let mut keys = self.idempotency_keys.write().await;
        Ok(*keys.entry(key.to_string()).or_insert(execution_id))
    }

    async fn get_step_result(&self, execution_id: ExecutionId, step_id: &str) -> StoreResult<Option<StepResult>> {
        Ok(self
            .step_results
            .read()
            .await
            .get(&(execution_id, step_id.to_string()))
            .cloned())
    }

    async fn save_step_result(&self, execution_id: ExecutionId, step_id: &str, outcome: StepOutcome) -> StoreResult<()> {
        self.step_results.write().await.insert(
            (execution_id, step_id.to_string()),
            StepResult {
                execution_id,
                step_id: step_id.to_string(),
                outcome,
                completed_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn create_timer(&self, timer: Timer) -> StoreResult<Timer> {
        self.timers.write().await.insert(timer.id, timer.clone());
        Ok(timer)
    }

    async fn get_ready_timers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Timer>> {
        Ok(self
            .timers
            .read()
            .await
            .values()
            .filter(|t| t.status == TimerStatus::Pending && t.fire_at <= now)
            .cloned()
            .collect())
    }

    async fn mark_timer_fired(&self, id: Uuid) -> StoreResult<()> {
        if let Some(timer) = self.timers.write().await.get_mut(&id) {
            timer.status = TimerStatus::Fired;
        }
        Ok(())
    }

    async fn delete_timer(&self, id: Uuid) -> StoreResult<()> {
        self.timers.write().await.remove(&id);
        Ok(())
    }

    async fn claim_timer(&self, id: Uuid, worker_id: &str, ttl_ms: i64) -> StoreResult<bool> {
        let mut timers = self.timers.write().await;
        let Some(timer) = timers.get_mut(&id) else {
            return Ok(false);
        };
        let now = Utc::now();
        if timer.claimed_by.is_some() && !timer.is_claim_expired(now) {
            return Ok(false);
        }
        timer.claimed_by = Some(worker_id.to_string());
        timer.claim_expires_at = Some(now + chrono::Duration::milliseconds(ttl_ms));
        Ok(true)
    }

    async fn get_pending_timers_for_execution(&self, execution_id: ExecutionId) -> StoreResult<Vec<Timer>> {
        Ok(self
            .timers
            .read()
            .await
            .values()
            .filter(|t| t.execution_id == Some(execution_id) && t.status == TimerStatus::Pending)
            .cloned()
            .collect())
    }

    async fn create_schedule(&self, schedule: Schedule) -> StoreResult<Schedule> {
        self.schedules.write().await.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn update_schedule(&self, schedule: Schedule) -> StoreResult<Schedule> {
        self.schedules.write().await.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn delete_schedule(&self, id: Uuid) -> StoreResult<()> {
        self.schedules.write().await.remove(&id);
        Ok(())
    }

    async fn list_schedules(&self) -> StoreResult<Vec<Schedule>> {
        Ok(self.schedules.read().await.values().cloned().collect())
    }

    async fn list_active_schedules(&self) -> StoreResult<Vec<Schedule>> {
        Ok(self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.status == crate::durable::model::ScheduleStatus::Active)
            .cloned()
            .collect())
    }

    async fn append_audit_entry(&self, entry: crate::durable::model::AuditEntry) -> StoreResult<()> {
        self.audit.write().await.entry(entry.execution_id).or_default().push(entry);
        Ok(())
    }

    async fn list_audit_entries(&self, execution_id: ExecutionId) -> StoreResult<Vec<crate::durable::model::AuditEntry>> {
        Ok(self.audit.read().await.get(&execution_id).cloned().unwrap_or_default())
    }

    async fn acquire_lock(&self, key: &str, ttl_ms: i64) -> StoreResult<bool> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        if let Some(expires) = locks.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        locks.insert(key.to_string(), now + chrono::Duration::milliseconds(ttl_ms));
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> StoreResult<()> {
        self.locks.write().await.remove(key);
        Ok(())
    }
}

/// In-process [`EventBus`] fanning out synchronously to subscribed handlers (SPEC_FULL §6).
#[derive(Default)]
pub struct MemoryEventBus {
    subscribers: RwLock<HashMap<String, Vec<BusHandler>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, channel: &str, message: BusMessage) -> Result<(), DurableError> {
        let subscribers = self.subscribers.read().await;
        if let Some(handlers) = subscribers.get(channel) {
            for handler in handlers {
                handler(message.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> Result<(), DurableError> {
        self.subscribers.write().await.entry(channel.to_string()).or_default().push(handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), DurableError> {
        self.subscribers.write().await.remove(channel);
        Ok(())
    }
}

/// In-process [`Queue`] over a `tokio::sync::mpsc` channel (SPEC_FULL §6). `nack(requeue =
/// true)` re-enqueues up to `max_attempts`; beyond that the message is dropped.
pub struct MemoryQueue {
    sender: tokio::sync::mpsc::UnboundedSender<QueueMessage>,
    receiver: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<QueueMessage>>>,
    in_flight: RwLock<HashMap<Uuid, QueueMessage>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            in_flight: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, message: QueueMessage) -> Result<Uuid, DurableError> {
        let id = message.id;
        self.sender
            .send(message)
            .map_err(|e| DurableError::Queue(e.to_string()))?;
        Ok(id)
    }

    async fn consume(&self, handler: QueueHandler) -> Result<(), DurableError> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| DurableError::Queue("queue already has a consumer".to_string()))?;
        loop {
            let Some(mut message) = receiver.recv().await else {
                break;
            };
            message.attempts += 1;
            self.in_flight.write().await.insert(message.id, message.clone());
            handler(message).await;
        }
        Ok(())
    }

    async fn ack(&self, id: Uuid) -> Result<(), DurableError> {
        self.in_flight.write().await.remove(&id);
        Ok(())
    }

    async fn nack(&self, id: Uuid, requeue: bool) -> Result<(), DurableError> {
        let message = self.in_flight.write().await.remove(&id);
        let Some(message) = message else {
            return Ok(());
        };
        if requeue && message.attempts < message.max_attempts {
            self.sender
                .send(message)
                .map_err(|e| DurableError::Queue(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_round_trips_an_execution() {
        let store = MemoryStore::new();
        let execution = Execution::new("task.a", json!({"x": 1}), 3, None);
        store.save_execution(&execution).await.unwrap();
        let fetched = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(fetched.task_id, "task.a");
    }

    #[tokio::test]
    async fn idempotency_key_reservation_is_first_writer_wins() {
        let store = MemoryStore::new();
        let a = ExecutionId::new();
        let b = ExecutionId::new();
        let first = store.reserve_idempotency_key("key-1", a).await.unwrap();
        let second = store.reserve_idempotency_key("key-1", b).await.unwrap();
        assert_eq!(first, a);
        assert_eq!(second, a);
    }

    #[tokio::test]
    async fn timer_claim_is_exclusive_until_ttl_expires() {
        let store = MemoryStore::new();
        let timer = Timer::sleep(ExecutionId::new(), "s1", Utc::now());
        let timer = store.create_timer(timer).await.unwrap();
        assert!(store.claim_timer(timer.id, "worker-a", 10_000).await.unwrap());
        assert!(!store.claim_timer(timer.id, "worker-b", 10_000).await.unwrap());
    }

    #[tokio::test]
    async fn event_bus_delivers_to_all_subscribers() {
        let bus = MemoryEventBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r1 = received.clone();
        bus.subscribe(
            "ch",
            Arc::new(move |msg| {
                let r1 = r1.clone();
                tokio::spawn(async move { r1.lock().await.push(msg.r#type) });
            }),
        )
        .await
        .unwrap();
        bus.publish("ch", BusMessage::new("hello", json!(null))).await.unwrap();
        tokio::task::yield_now().await;
    }
}
