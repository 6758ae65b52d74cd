//! Domain layer: identifiers, static definitions, tags, and the error taxonomy shared by
//! every core module.

pub mod definitions;
pub mod errors;
pub mod ids;
pub mod tag;

pub use definitions::{
    AsyncContextDef, DefinitionKind, DependencyMap, DependencyRef, ErrorDef, EventDef, HookDef,
    ResourceDef, ResourceDisposeFn, ResourceInitFn, SchemaFn, TaskDef, TaskMiddlewareDef,
    TaskMiddlewareRunFn, TaskRunFn, Throws,
};
pub use errors::{
    AggregateError, AnnotatedListenerError, ContextError, CycleError, DefinitionError,
    DurableError, LockError, RunnerError, RunnerResult, RuntimeError, RuntimeErrorKind,
    ValidationError,
};
pub use ids::Id;
pub use tag::{TagAccessor, TagDef, TagIndex, TaggedMember};
