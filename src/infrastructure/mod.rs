//! Ambient infrastructure: structured logging and hierarchical configuration, shared by every
//! core module regardless of which durable/event/registry features a given process uses.

pub mod config;
pub mod logging;
