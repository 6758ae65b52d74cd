//! `Worker`: consumes [`Queue`] execute messages and drives executions through
//! [`DurableService::process_execution`] (SPEC_FULL §4.6 "Queue mode"). Grounded on the
//! teacher's `services/task_queue_service.rs` dispatch loop, generalized from its
//! `Agent`-bound consumer to a queue-message-to-execution-id dispatch.

use std::str::FromStr;
use std::sync::Arc;

use super::model::ExecutionId;
use super::queue::{Queue, QueueMessage};
use super::service::{DurableService, EXECUTE_MESSAGE_TYPE};

/// One consumer of a [`Queue`]'s execute messages. Several `Worker`s can share one `Queue`
/// and one `Store` for horizontal scale-out (SPEC_FULL §6).
pub struct Worker {
    queue: Arc<dyn Queue>,
    service: Arc<DurableService>,
}

impl Worker {
    pub fn new(queue: Arc<dyn Queue>, service: Arc<DurableService>) -> Self {
        Self { queue, service }
    }

    /// Consumes from the queue until the underlying adapter's `consume` loop returns (SPEC_FULL
    /// §4.6: adapter-driven redelivery on nack). Runs until the connection closes or the
    /// process is asked to shut down; intended to be spawned as a background task.
    pub async fn run(self: Arc<Self>) -> Result<(), crate::domain::errors::DurableError> {
        let this = self.clone();
        self.queue
            .clone()
            .consume(Arc::new(move |message: QueueMessage| {
                let this = this.clone();
                Box::pin(async move { this.handle(message).await })
            }))
            .await
    }

    async fn handle(&self, message: QueueMessage) {
        if message.r#type != EXECUTE_MESSAGE_TYPE {
            tracing::warn!(kind = %message.r#type, "worker received an unrecognized queue message type");
            let _ = self.queue.nack(message.id, false).await;
            return;
        }

        let Some(execution_id) = message
            .payload
            .get("execution_id")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| ExecutionId::from_str(s).ok())
        else {
            tracing::error!("dropping queue message with a malformed execution_id");
            let _ = self.queue.nack(message.id, false).await;
            return;
        };

        match self.service.process_execution(execution_id).await {
            Ok(()) => {
                let _ = self.queue.ack(message.id).await;
            }
            Err(e) => {
                tracing::error!(execution_id = %execution_id, error = %e, "queue-dispatched execution attempt failed");
                let requeue = message.attempts < message.max_attempts;
                let _ = self.queue.nack(message.id, requeue).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::adapters::memory::{MemoryQueue, MemoryStore};
    use crate::durable::service::DurableConfig;
    use crate::durable::store::Store;

    #[tokio::test]
    async fn worker_drives_a_queued_execution_to_completion() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());

        let mut service = DurableService::new(store.clone(), None, DurableConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        service.register_task(
            "noop",
            Arc::new(move |_input| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "ok": true }))
                })
            }),
        );
        let service = Arc::new(service.with_queue(queue.clone()));

        let id = service.start("noop", json!({}), None, None).await.unwrap();

        let worker = Arc::new(Worker::new(queue.clone(), service.clone()));
        let handle = tokio::spawn(worker.run());

        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let execution = store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status, crate::durable::model::ExecutionStatus::Completed);
    }
}
