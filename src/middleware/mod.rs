//! Task and resource middleware chains (SPEC_FULL §4.4).

pub mod manager;

pub use manager::{MiddlewareHandle, MiddlewareManager, Next, ResourceInitializer, TaskHandle, TaskRunner};
