//! Durable workflow engine: replay-safe step memoization, sleeps, signals, compensations,
//! schedules, and the timer/poller machinery that drives them (SPEC_FULL §4.6).

pub mod bus;
pub mod context;
pub mod model;
pub mod poller;
pub mod queue;
pub mod retry;
pub mod service;
pub mod store;
pub mod worker;

pub use context::{DurableContext, DurableOutcome, ImplicitStepIdPolicy, SignalOutcome};
pub use model::{
    AuditEntry, AuditKind, Execution, ExecutionId, ExecutionStatus, Schedule, ScheduleKind,
    ScheduleStatus, StepOutcome, StepResult, Timer, TimerKind, TimerStatus,
};
pub use poller::Poller;
pub use queue::{Queue, QueueMessage};
pub use service::{durable_context, DurableConfig, DurableService, DurableTaskFn};
pub use worker::Worker;
