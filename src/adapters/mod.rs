//! Infrastructure adapters for external systems.

pub mod memory;
pub mod sqlite;

#[cfg(feature = "redis-adapter")]
pub mod redis;
#[cfg(feature = "rabbitmq-adapter")]
pub mod rabbitmq;
