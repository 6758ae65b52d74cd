//! Error taxonomy for the runtime: one enum per kind named in the error-handling design,
//! aggregated into [`RunnerError`] the way the teacher's `DomainError` aggregates
//! `sqlx::Error`/`serde_json::Error` conversions.

use thiserror::Error;

/// Errors raised while registering definitions with the [`crate::registry::Registry`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("{definition} '{id}' depends on unknown id '{dependency}'")]
    UnknownDependency {
        definition: String,
        id: String,
        dependency: String,
    },

    #[error("task '{task}' declares throws entry '{error_id}' that is not a registered error")]
    InvalidThrows { task: String, error_id: String },

    #[error("middleware '{0}' is already registered as global")]
    MiddlewareAlreadyGlobal(String),

    #[error("override target '{0}' does not exist")]
    OverrideTargetMissing(String),
}

/// Errors raised when a schema-validated input/output/config/payload is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("validation failed for '{id}': {cause}")]
pub struct ValidationError {
    pub id: String,
    pub cause: String,
}

impl ValidationError {
    pub fn new(id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cause: cause.into(),
        }
    }
}

/// A user `run`/`init` function threw. Propagated unchanged to the caller and reported once
/// to the unhandled-error reporter.
#[derive(Debug, Error)]
#[error("runtime error in {kind} '{source_id}': {message}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub source_id: String,
    pub message: String,
}

/// What kind of component raised a [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Init,
    Task,
    Middleware,
    Hook,
    Process,
}

impl std::fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Task => "task",
            Self::Middleware => "middleware",
            Self::Hook => "hook",
            Self::Process => "process",
        };
        f.write_str(s)
    }
}

/// Modification attempted after the Registry/EventManager has been locked post-boot.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("registry is locked; cannot register new definitions")]
    RegistryLocked,
    #[error("event manager is locked; cannot add listeners or interceptors")]
    EventManagerLocked,
}

/// `AsyncContext::use_context()` called outside a `provide` scope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("context '{0}' was not provided in the current task")]
pub struct ContextError(pub String);

/// A re-emission cycle was detected on the async-local emission stack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cycle detected re-emitting event '{event_id}' from source '{source}'")]
pub struct CycleError {
    pub event_id: String,
    pub source: String,
}

/// Errors from the durable execution engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurableError {
    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("timed out waiting for execution '{0}'")]
    WaitTimeout(String),

    #[error("execution '{execution_id}' was cancelled: {reason}")]
    Cancelled { execution_id: String, reason: String },

    #[error("compensation failed for execution '{execution_id}': {message}")]
    CompensationFailed {
        execution_id: String,
        message: String,
    },

    #[error("idempotency conflict for key '{key}': input does not match the first call")]
    IdempotencyConflict { key: String },

    #[error("schedule '{0}' not found")]
    ScheduleNotFound(String),

    #[error("timer '{0}' not found")]
    TimerNotFound(String),

    #[error("invalid cron expression '{expression}': {cause}")]
    InvalidCron { expression: String, cause: String },

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("queue operation failed: {0}")]
    Queue(String),

    #[error("event bus operation failed: {0}")]
    Bus(String),
}

impl DurableError {
    /// Errors that are worth retrying (infra hiccups, contention) rather than surfacing
    /// as a terminal execution failure.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Queue(_) | Self::Bus(_))
    }

    /// Errors that should never be retried regardless of remaining attempts.
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::IdempotencyConflict { .. } | Self::InvalidCron { .. } | Self::Cancelled { .. }
        )
    }
}

/// One failure observed while running a batch of parallel listeners, annotated with which
/// listener produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("listener '{listener_id}' (order {listener_order}) failed: {message}")]
pub struct AnnotatedListenerError {
    pub listener_id: String,
    pub listener_order: i64,
    pub message: String,
}

/// All failures from one parallel batch, per SPEC_FULL §4.3 / §7.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{} listener(s) failed in parallel batch", .0.len())]
pub struct AggregateError(pub Vec<AnnotatedListenerError>);

impl AggregateError {
    pub fn single(err: AnnotatedListenerError) -> Self {
        Self(vec![err])
    }
}

/// Umbrella error aggregating every taxonomy kind, the way the teacher's `DomainError`
/// aggregates `sqlx::Error`/`serde_json::Error` via `#[from]`.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Durable(#[from] DurableError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_error_display() {
        let err = DefinitionError::DuplicateId("taskA".into());
        assert_eq!(err.to_string(), "duplicate id: taskA");
    }

    #[test]
    fn durable_error_is_transient_vs_permanent() {
        assert!(DurableError::Store("disk full".into()).is_transient());
        assert!(!DurableError::Store("disk full".into()).is_permanent());

        let conflict = DurableError::IdempotencyConflict { key: "k".into() };
        assert!(conflict.is_permanent());
        assert!(!conflict.is_transient());
    }

    #[test]
    fn aggregate_error_display_counts_failures() {
        let agg = AggregateError(vec![
            AnnotatedListenerError {
                listener_id: "a".into(),
                listener_order: 0,
                message: "boom".into(),
            },
            AnnotatedListenerError {
                listener_id: "b".into(),
                listener_order: 0,
                message: "bang".into(),
            },
        ]);
        assert_eq!(agg.to_string(), "2 listener(s) failed in parallel batch");
    }

    #[test]
    fn runner_error_from_conversions() {
        let e: RunnerError = LockError::RegistryLocked.into();
        assert!(matches!(e, RunnerError::Lock(LockError::RegistryLocked)));
    }
}
