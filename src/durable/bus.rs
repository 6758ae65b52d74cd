//! Cross-process `EventBus` (SPEC_FULL §6), distinct from the in-process
//! [`crate::events::manager::EventManager`]. Grounded on the teacher's
//! `services/event_bus.rs` broadcast/publish shape, generalized to a channel-addressed
//! pub/sub contract so adapters (memory, Redis, RabbitMQ) can sit behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::DurableError;

/// One message published on a channel (SPEC_FULL §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub r#type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(r#type: impl Into<String>, payload: Value) -> Self {
        Self {
            r#type: r#type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

pub type BusHandler = std::sync::Arc<dyn Fn(BusMessage) + Send + Sync>;

/// The channel durable executions publish to (SPEC_FULL §4.6: `emit` "publishes to the
/// EventBus channel `durable:events`").
pub const DURABLE_EVENTS_CHANNEL: &str = "durable:events";

/// Cross-process pub/sub (SPEC_FULL §6). Handler errors must never abort publishing; this
/// is enforced by adapters catching panics/errors around each handler invocation and
/// routing them to an `on_handler_error` callback instead of propagating.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, channel: &str, message: BusMessage) -> Result<(), DurableError>;
    async fn subscribe(&self, channel: &str, handler: BusHandler) -> Result<(), DurableError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), DurableError>;
}
