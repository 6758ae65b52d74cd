//! In-process event/interceptor bus (SPEC_FULL §4.3), distinct from the durable engine's
//! cross-process [`crate::durable::bus::EventBus`] trait.

pub mod cycle;
pub mod manager;

pub use manager::{Emission, EventEmitter, EventManager};
