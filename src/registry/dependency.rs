//! Resolves a [`DependencyMap`] into typed runtime handles (SPEC_FULL §4.2). Used both when a
//! resource is first initialized and when a task's dependencies are resolved on its first
//! invocation.

use std::collections::HashMap;

use crate::domain::definitions::{DependencyMap, DependencyRef};
use crate::domain::errors::RuntimeError;
use crate::domain::ids::Id;
use crate::domain::tag::TagAccessor;
use crate::engine::Engine;
use crate::events::manager::EventEmitter;
use crate::middleware::manager::{MiddlewareHandle, TaskHandle};

/// One resolved dependency-map entry (SPEC_FULL §4.2 enumerates these cases).
#[derive(Clone)]
pub enum ResolvedValue {
    Resource(serde_json::Value),
    Task(TaskHandle),
    Event(EventEmitter),
    Hook(serde_json::Value),
    TaskMiddlewareManager(MiddlewareHandle),
    ResourceMiddlewareManager(MiddlewareHandle),
    Tag(TagAccessor),
    AsyncContext(Id),
    Error(Id),
    /// An optional dependency whose resource was never registered.
    Missing,
}

impl ResolvedValue {
    pub fn as_resource(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Resource(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&TaskHandle> {
        match self {
            Self::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&TagAccessor> {
        match self {
            Self::Tag(t) => Some(t),
            _ => None,
        }
    }
}

/// A resolved dependency map: same keys as the input [`DependencyMap`], values replaced with
/// runtime handles.
#[derive(Clone, Default)]
pub struct ResolvedDeps(pub HashMap<String, ResolvedValue>);

impl ResolvedDeps {
    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.0.get(key)
    }
}

/// Resolves typed dependency graphs into [`ResolvedDeps`] (SPEC_FULL §4.2).
pub struct DependencyProcessor;

impl DependencyProcessor {
    pub async fn resolve(
        engine: &Engine,
        owner_resource: Option<&Id>,
        map: &DependencyMap,
    ) -> Result<ResolvedDeps, RuntimeError> {
        let mut out = HashMap::with_capacity(map.len());
        for (key, dep) in map {
            let value = Self::resolve_one(engine, owner_resource, dep).await?;
            out.insert(key.clone(), value);
        }
        Ok(ResolvedDeps(out))
    }

    async fn resolve_one(
        engine: &Engine,
        owner_resource: Option<&Id>,
        dep: &DependencyRef,
    ) -> Result<ResolvedValue, RuntimeError> {
        match dep {
            DependencyRef::Optional(inner) => {
                match Box::pin(Self::resolve_one(engine, owner_resource, inner)).await {
                    Ok(v) => Ok(v),
                    Err(_) => Ok(ResolvedValue::Missing),
                }
            }
            DependencyRef::Resource(id) => {
                if engine.registry.resource_def(id.as_str()).await.is_none() {
                    return Ok(ResolvedValue::Missing);
                }
                let value = engine.resource_value(id).await?;
                Ok(ResolvedValue::Resource(value))
            }
            DependencyRef::Task(id) => Ok(ResolvedValue::Task(TaskHandle::new(
                engine.clone(),
                id.clone(),
            ))),
            DependencyRef::Event(id) => Ok(ResolvedValue::Event(EventEmitter::new(
                engine.events.clone(),
                id.clone(),
            ))),
            DependencyRef::Hook(id) => {
                if engine.registry.hook_def(id.as_str()).await.is_none() {
                    return Err(RuntimeError {
                        kind: crate::domain::errors::RuntimeErrorKind::Init,
                        source_id: id.to_string(),
                        message: "hook not registered".to_string(),
                    });
                }
                Ok(ResolvedValue::Hook(serde_json::json!({ "id": id.to_string() })))
            }
            DependencyRef::TaskMiddleware(id) => Ok(ResolvedValue::TaskMiddlewareManager(
                MiddlewareHandle::new_task(engine.clone(), id.clone(), owner_resource.cloned()),
            )),
            DependencyRef::ResourceMiddleware(id) => Ok(ResolvedValue::ResourceMiddlewareManager(
                MiddlewareHandle::new_resource(engine.clone(), id.clone(), owner_resource.cloned()),
            )),
            DependencyRef::Tag(id) | DependencyRef::TagStartup(id) => {
                Ok(ResolvedValue::Tag(engine.registry.tag_accessor(id.as_str()).await))
            }
            DependencyRef::AsyncContext(id) => {
                if engine.registry.async_context_def(id.as_str()).await.is_none() {
                    return Err(RuntimeError {
                        kind: crate::domain::errors::RuntimeErrorKind::Init,
                        source_id: id.to_string(),
                        message: "async context not registered".to_string(),
                    });
                }
                Ok(ResolvedValue::AsyncContext(id.clone()))
            }
            DependencyRef::Error(id) => {
                if engine.registry.error_def(id.as_str()).await.is_none() {
                    return Err(RuntimeError {
                        kind: crate::domain::errors::RuntimeErrorKind::Init,
                        source_id: id.to_string(),
                        message: "error definition not registered".to_string(),
                    });
                }
                Ok(ResolvedValue::Error(id.clone()))
            }
        }
    }
}
