//! An application runtime combining three cores sharing one typed definition model:
//!
//! - [`registry`] / [`registry::bootstrap`]: register tasks, resources, events, hooks,
//!   middleware, errors and tags into a [`registry::Registry`], then boot them with
//!   [`registry::bootstrap::Runner`] (sequential or parallel, dependency-ordered,
//!   lock-after-boot, dispose-in-reverse).
//! - [`events`]: an ordered, cycle-safe event/interceptor bus ([`events::EventManager`]) with
//!   per-listener ordering, parallel-batch semantics, and emission/hook interceptors.
//! - [`durable`]: a replay-safe durable workflow engine ([`durable::DurableService`],
//!   [`durable::DurableContext`]) with step memoization, sleeps, signals, compensations,
//!   schedules, and claim/TTL timers, backed by a pluggable [`durable::store::Store`].
//!
//! [`middleware`] holds the task-run and resource-init pipelines shared by the registry core,
//! [`context`] provides async-local value propagation used by both the registry and durable
//! cores, and [`adapters`] implements the durable engine's `Store`/`EventBus`/`Queue` ports
//! against memory, sqlite, and (feature-gated) Redis/RabbitMQ backends.

pub mod adapters;
pub mod context;
pub mod domain;
pub mod durable;
pub mod engine;
pub mod events;
pub mod infrastructure;
pub mod middleware;
pub mod registry;

pub use domain::{
    AsyncContextDef, DefinitionKind, DependencyMap, DependencyRef, ErrorDef, EventDef, HookDef,
    Id, ResourceDef, RunnerError, RunnerResult, TagAccessor, TaskDef, TaskMiddlewareDef,
};
pub use engine::{Engine, ErrorReporter, ReportedError};
pub use events::{EventEmitter, EventManager};
pub use middleware::{MiddlewareHandle, MiddlewareManager, TaskRunner};
pub use registry::bootstrap::{InitMode, RunHandle, RunOptions, Runner};
pub use registry::Registry;
