//! Redis-backed [`EventBus`] (Cargo feature `redis-adapter`, SPEC_FULL §6: "redis: pub/sub
//! EventBus and a simple list-backed Queue for small multi-worker deployments"). Generalized
//! from the teacher's connection-manager-over-a-pool pattern (`infrastructure/database/connection.rs`)
//! to `redis`'s `ConnectionManager` + `aio::PubSub`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::domain::errors::DurableError;
use crate::durable::bus::{BusHandler, BusMessage, EventBus};

fn map_redis(e: redis::RedisError) -> DurableError {
    DurableError::Bus(e.to_string())
}

/// Publishes via `PUBLISH` and maintains one background `SUBSCRIBE` task per channel,
/// fanning each received message out to every locally registered handler.
pub struct RedisEventBus {
    manager: ConnectionManager,
    client: redis::Client,
    handlers: Arc<RwLock<HashMap<String, Vec<BusHandler>>>>,
    subscriptions: Arc<RwLock<HashMap<String, tokio::task::JoinHandle<()>>>>,
}

impl RedisEventBus {
    pub async fn connect(redis_url: &str) -> Result<Self, DurableError> {
        let client = redis::Client::open(redis_url).map_err(map_redis)?;
        let manager = client.get_connection_manager().await.map_err(map_redis)?;
        Ok(Self {
            manager,
            client,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, channel: &str, message: BusMessage) -> Result<(), DurableError> {
        let payload = serde_json::to_string(&message).map_err(|e| DurableError::Bus(e.to_string()))?;
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, payload).await.map_err(map_redis)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> Result<(), DurableError> {
        self.handlers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(handler);

        if self.subscriptions.read().await.contains_key(channel) {
            return Ok(());
        }

        let client = self.client.clone();
        let handlers = self.handlers.clone();
        let channel_owned = channel.to_string();
        let task = tokio::spawn(async move {
            let Ok(mut pubsub) = client.get_async_pubsub().await else {
                tracing::error!(channel = %channel_owned, "failed to open redis pub/sub connection");
                return;
            };
            if pubsub.subscribe(&channel_owned).await.is_err() {
                tracing::error!(channel = %channel_owned, "failed to subscribe to redis channel");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = futures::StreamExt::next(&mut stream).await {
                let Ok(payload): Result<String, _> = msg.get_payload() else {
                    continue;
                };
                let Ok(message) = serde_json::from_str::<BusMessage>(&payload) else {
                    tracing::warn!(channel = %channel_owned, "dropping malformed durable bus message");
                    continue;
                };
                for handler in handlers.read().await.get(&channel_owned).into_iter().flatten() {
                    handler(message.clone());
                }
            }
        });
        self.subscriptions.write().await.insert(channel.to_string(), task);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), DurableError> {
        self.handlers.write().await.remove(channel);
        if let Some(task) = self.subscriptions.write().await.remove(channel) {
            task.abort();
        }
        Ok(())
    }
}
