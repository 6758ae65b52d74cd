//! Static, immutable-after-registration definitions: Task, Resource, Event, Hook,
//! TaskMiddleware, ResourceMiddleware, Error, AsyncContext (SPEC_FULL §3).
//!
//! Inputs, results and configs are carried as `serde_json::Value` at the registry boundary —
//! the same dynamically-typed-payload approach the teacher uses for `EventPayload` and for
//! `task.context.custom` JSON blobs in `workflow_engine.rs` — so the Registry can hold a
//! heterogeneous graph of definitions without a type-erasure scheme keyed on `TypeId`.
//! Callers get type safety back at the edges via `serde::{Serialize, DeserializeOwned}`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::errors::RuntimeError;
use super::ids::Id;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A validator over a JSON value; `Err` carries the human-readable cause used to build a
/// `ValidationError`.
pub type SchemaFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// One dependency map entry: either a reference to another definition, an `optional(..)`
/// wrapper, or a `tag.startup()` marker (SPEC_FULL §4.2).
#[derive(Clone)]
pub enum DependencyRef {
    Resource(Id),
    Task(Id),
    Event(Id),
    Hook(Id),
    TaskMiddleware(Id),
    ResourceMiddleware(Id),
    Tag(Id),
    AsyncContext(Id),
    Error(Id),
    TagStartup(Id),
    Optional(Box<DependencyRef>),
}

impl DependencyRef {
    /// The id this reference points at, regardless of optionality/kind wrapper.
    pub fn target_id(&self) -> &Id {
        match self {
            Self::Resource(id)
            | Self::Task(id)
            | Self::Event(id)
            | Self::Hook(id)
            | Self::TaskMiddleware(id)
            | Self::ResourceMiddleware(id)
            | Self::Tag(id)
            | Self::AsyncContext(id)
            | Self::Error(id)
            | Self::TagStartup(id) => id,
            Self::Optional(inner) => inner.target_id(),
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_))
    }

    pub fn optional(self) -> Self {
        Self::Optional(Box::new(self))
    }
}

pub type DependencyMap = HashMap<String, DependencyRef>;

/// Declared error ids a task may throw ("throws" in SPEC_FULL §3).
pub type Throws = Vec<Id>;

pub type TaskRunFn =
    Arc<dyn Fn(Value, crate::registry::dependency::ResolvedDeps) -> BoxFuture<'static, Result<Value, RuntimeError>> + Send + Sync>;

#[derive(Clone)]
pub struct TaskDef {
    pub id: Id,
    pub dependencies: DependencyMap,
    pub middleware: Vec<Id>,
    pub tags: Vec<Id>,
    pub throws: Throws,
    pub input_schema: Option<SchemaFn>,
    pub result_schema: Option<SchemaFn>,
    pub run: TaskRunFn,
}

impl fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDef").field("id", &self.id).finish_non_exhaustive()
    }
}

pub type ResourceInitFn = Arc<
    dyn Fn(Value, crate::registry::dependency::ResolvedDeps) -> BoxFuture<'static, Result<Value, RuntimeError>>
        + Send
        + Sync,
>;

pub type ResourceDisposeFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), RuntimeError>> + Send + Sync>;

#[derive(Clone)]
pub struct ResourceDef {
    pub id: Id,
    pub dependencies: DependencyMap,
    /// Other definitions registered underneath this resource (SPEC_FULL §4.1: `root.register[]`).
    pub register: Vec<Id>,
    /// ids of definitions this one overrides (replaces `init`/`run` of an existing id).
    pub overrides: Vec<Id>,
    pub middleware: Vec<Id>,
    pub tags: Vec<Id>,
    pub config: Value,
    pub init: ResourceInitFn,
    pub dispose: Option<ResourceDisposeFn>,
    pub result_schema: Option<SchemaFn>,
}

impl fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDef").field("id", &self.id).finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct EventDef {
    pub id: Id,
    pub payload_schema: Option<SchemaFn>,
    pub tags: Vec<Id>,
    /// SPEC_FULL §4.3: batch semantics for `emit`.
    pub parallel: bool,
}

impl fmt::Debug for EventDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDef")
            .field("id", &self.id)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

impl EventDef {
    pub fn excludes_global_hooks(&self) -> bool {
        self.tags.iter().any(|t| t.as_str() == "exclude_from_global_hooks")
    }
}

pub type HookRunFn = Arc<
    dyn Fn(Value, crate::registry::dependency::ResolvedDeps) -> BoxFuture<'static, Result<(), RuntimeError>>
        + Send
        + Sync,
>;

/// An event listener promoted to a first-class component (SPEC_FULL §3).
#[derive(Clone)]
pub struct HookDef {
    pub id: Id,
    pub events: Vec<Id>,
    pub dependencies: DependencyMap,
    pub order: i64,
    pub run: HookRunFn,
}

impl fmt::Debug for HookDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDef")
            .field("id", &self.id)
            .field("events", &self.events)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

pub type TaskMiddlewareRunFn = Arc<
    dyn Fn(
            Value,
            crate::middleware::manager::Next,
            crate::registry::dependency::ResolvedDeps,
        ) -> BoxFuture<'static, Result<Value, RuntimeError>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct TaskMiddlewareDef {
    pub id: Id,
    pub dependencies: DependencyMap,
    pub config: Value,
    pub run: TaskMiddlewareRunFn,
}

impl fmt::Debug for TaskMiddlewareDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMiddlewareDef").field("id", &self.id).finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ResourceMiddlewareDef {
    pub id: Id,
    pub dependencies: DependencyMap,
    pub config: Value,
    pub run: TaskMiddlewareRunFn,
}

impl fmt::Debug for ResourceMiddlewareDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMiddlewareDef").field("id", &self.id).finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct ErrorDef {
    pub id: Id,
}

#[derive(Clone, Debug)]
pub struct AsyncContextDef {
    pub id: Id,
}

/// Any definition kind, used where the Registry needs to reason generically (sanity passes,
/// disposal ordering, tag indexing).
#[derive(Clone, Debug)]
pub enum DefinitionKind {
    Task,
    Resource,
    Event,
    Hook,
    TaskMiddleware,
    ResourceMiddleware,
    Tag,
    Error,
    AsyncContext,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Resource => "resource",
            Self::Event => "event",
            Self::Hook => "hook",
            Self::TaskMiddleware => "task middleware",
            Self::ResourceMiddleware => "resource middleware",
            Self::Tag => "tag",
            Self::Error => "error",
            Self::AsyncContext => "async context",
        };
        f.write_str(s)
    }
}
