//! `Queue`: work distribution for worker pools (SPEC_FULL §6). Grounded on the teacher's
//! `services/task_queue_service.rs` dispatch pattern and `services/event_bus.rs`'s
//! `tokio::sync::mpsc` worker hookup, generalized to an ack/nack message queue contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DurableError;

/// One unit of work handed to a [`Queue`] (SPEC_FULL §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: Uuid,
    pub r#type: String,
    pub payload: Value,
    pub max_attempts: u32,
    pub attempts: u32,
}

impl QueueMessage {
    pub fn new(r#type: impl Into<String>, payload: Value, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            r#type: r#type.into(),
            payload,
            max_attempts,
            attempts: 0,
        }
    }
}

pub type QueueHandler = std::sync::Arc<
    dyn Fn(QueueMessage) -> crate::domain::definitions::BoxFuture<'static, ()> + Send + Sync,
>;

/// Work distribution for worker pools (SPEC_FULL §6). `nack(id, requeue=true)` re-delivers
/// up to `max_attempts`; beyond that the message is dropped without requeue (SPEC_FULL
/// §4.6: "Queue mode").
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, message: QueueMessage) -> Result<Uuid, DurableError>;
    async fn consume(&self, handler: QueueHandler) -> Result<(), DurableError>;
    async fn ack(&self, id: Uuid) -> Result<(), DurableError>;
    async fn nack(&self, id: Uuid, requeue: bool) -> Result<(), DurableError>;
}
