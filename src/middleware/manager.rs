//! MiddlewareManager / TaskRunner / ResourceInitializer (SPEC_FULL §4.4).
//!
//! Grounded on the teacher's `services/command_bus.rs` (typed envelope → dispatch) for the
//! chain-composition shape and `services/hook_executor.rs` (action-list execution with
//! short-circuiting) for the "compose right-to-left, run `next()`" pipeline pattern.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::definitions::{BoxFuture, TaskMiddlewareRunFn};
use crate::domain::errors::{RunnerError, RuntimeError, RuntimeErrorKind, ValidationError};
use crate::domain::ids::Id;
use crate::engine::Engine;
use crate::registry::dependency::DependencyProcessor;

/// The rest of a middleware chain. Calling it runs the next middleware (or, at the bottom,
/// the task's/resource's own `run`/`init`).
#[derive(Clone)]
pub struct Next(pub Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, RuntimeError>> + Send + Sync>);

impl Next {
    pub async fn call(&self, input: serde_json::Value) -> Result<serde_json::Value, RuntimeError> {
        (self.0)(input).await
    }
}

#[derive(Clone)]
struct InterceptorEntry {
    #[allow(dead_code)]
    owner: Option<Id>,
    run: TaskMiddlewareRunFn,
}

/// Owner-scoped interceptors added via a [`MiddlewareHandle`] before the Registry locks
/// (SPEC_FULL §4.4, §9: "owner-aware interceptors").
pub struct MiddlewareManager {
    task_interceptors: RwLock<HashMap<Id, Vec<InterceptorEntry>>>,
    resource_interceptors: RwLock<HashMap<Id, Vec<InterceptorEntry>>>,
}

impl Default for MiddlewareManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self {
            task_interceptors: RwLock::new(HashMap::new()),
            resource_interceptors: RwLock::new(HashMap::new()),
        }
    }

    async fn add_task(&self, task_id: Id, owner: Option<Id>, run: TaskMiddlewareRunFn) {
        self.task_interceptors
            .write()
            .await
            .entry(task_id)
            .or_default()
            .push(InterceptorEntry { owner, run });
    }

    async fn add_resource(&self, resource_id: Id, owner: Option<Id>, run: TaskMiddlewareRunFn) {
        self.resource_interceptors
            .write()
            .await
            .entry(resource_id)
            .or_default()
            .push(InterceptorEntry { owner, run });
    }

    async fn task_interceptors_for(&self, task_id: &str) -> Vec<TaskMiddlewareRunFn> {
        self.task_interceptors
            .read()
            .await
            .get(task_id)
            .map(|v| v.iter().map(|e| e.run.clone()).collect())
            .unwrap_or_default()
    }

    async fn resource_interceptors_for(&self, resource_id: &str) -> Vec<TaskMiddlewareRunFn> {
        self.resource_interceptors
            .read()
            .await
            .get(resource_id)
            .map(|v| v.iter().map(|e| e.run.clone()).collect())
            .unwrap_or_default()
    }
}

/// The owner-aware proxy returned when a resource depends on a task/resource middleware
/// definition (SPEC_FULL §4.2): its `intercept` methods tag the interceptor with the
/// consuming resource's id so later audits can attribute "which resource intercepted which
/// task" (SPEC_FULL §4.4).
#[derive(Clone)]
pub struct MiddlewareHandle {
    engine: Engine,
    #[allow(dead_code)]
    middleware_id: Id,
    owner: Option<Id>,
    kind: MiddlewareHandleKind,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MiddlewareHandleKind {
    Task,
    Resource,
}

impl MiddlewareHandle {
    pub fn new_task(engine: Engine, middleware_id: Id, owner: Option<Id>) -> Self {
        Self {
            engine,
            middleware_id,
            owner,
            kind: MiddlewareHandleKind::Task,
        }
    }

    pub fn new_resource(engine: Engine, middleware_id: Id, owner: Option<Id>) -> Self {
        Self {
            engine,
            middleware_id,
            owner,
            kind: MiddlewareHandleKind::Resource,
        }
    }

    /// Register an interceptor for a specific task id, tagged with this handle's owner.
    pub async fn intercept(&self, task_id: impl Into<Id>, run: TaskMiddlewareRunFn) {
        debug_assert_eq!(self.kind, MiddlewareHandleKind::Task);
        self.engine
            .middleware
            .add_task(task_id.into(), self.owner.clone(), run)
            .await;
    }

    /// Register an interceptor for a specific resource's `init`, tagged with this handle's
    /// owner (`interceptMiddleware` in SPEC_FULL §4.2).
    pub async fn intercept_middleware(&self, resource_id: impl Into<Id>, run: TaskMiddlewareRunFn) {
        debug_assert_eq!(self.kind, MiddlewareHandleKind::Resource);
        self.engine
            .middleware
            .add_resource(resource_id.into(), self.owner.clone(), run)
            .await;
    }
}

/// A callable handle to a registered task, returned when a dependency resolves to a Task
/// definition (SPEC_FULL §4.2).
#[derive(Clone)]
pub struct TaskHandle {
    engine: Engine,
    task_id: Id,
}

impl TaskHandle {
    pub fn new(engine: Engine, task_id: Id) -> Self {
        Self { engine, task_id }
    }

    pub async fn call(&self, input: serde_json::Value) -> Result<serde_json::Value, RunnerError> {
        TaskRunner::run(&self.engine, &self.task_id, input).await
    }
}

/// Executes tasks through their full middleware + interceptor pipeline (SPEC_FULL §4.4).
pub struct TaskRunner;

impl TaskRunner {
    #[instrument(skip(engine, input), fields(task_id = %task_id))]
    pub async fn run(
        engine: &Engine,
        task_id: &Id,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, RunnerError> {
        let task_def = engine
            .registry
            .task(task_id.as_str())
            .await
            .ok_or_else(|| RuntimeError {
                kind: RuntimeErrorKind::Task,
                source_id: task_id.to_string(),
                message: "task not registered".to_string(),
            })?;

        if let Some(schema) = &task_def.input_schema {
            schema(&input).map_err(|cause| ValidationError::new(task_id.to_string(), cause))?;
        }

        let deps = DependencyProcessor::resolve(engine, None, &task_def.dependencies)
            .await
            .map_err(RunnerError::from)?;

        let global = engine.registry.global_task_middlewares().await;
        let mut chain_ids: Vec<Id> = global
            .into_iter()
            .filter(|g| !task_def.middleware.contains(g))
            .collect();
        chain_ids.extend(task_def.middleware.clone());

        let mut middlewares = Vec::with_capacity(chain_ids.len());
        for id in &chain_ids {
            if let Some(def) = engine.registry.task_middleware(id.as_str()).await {
                middlewares.push(def.run.clone());
            }
        }
        middlewares.extend(engine.middleware.task_interceptors_for(task_id.as_str()).await);

        let run_fn = task_def.run.clone();
        let deps_for_base = deps.clone();
        let base: Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, RuntimeError>> + Send + Sync> =
            Arc::new(move |input: serde_json::Value| {
                let run_fn = run_fn.clone();
                let deps = deps_for_base.clone();
                Box::pin(async move { run_fn(input, deps).await })
            });

        let mut next = Next(base);
        for mw in middlewares.into_iter().rev() {
            let inner_next = next.clone();
            let deps_for_mw = deps.clone();
            next = Next(Arc::new(move |input: serde_json::Value| {
                let mw = mw.clone();
                let inner_next = inner_next.clone();
                let deps = deps_for_mw.clone();
                Box::pin(async move { mw(input, inner_next, deps).await })
            }));
        }

        let result = next.call(input).await;

        let result = match result {
            Ok(output) => {
                if let Some(schema) = &task_def.result_schema {
                    schema(&output).map_err(|cause| ValidationError::new(task_id.to_string(), cause))?;
                }
                Ok(output)
            }
            Err(e) => {
                engine.report(RuntimeErrorKind::Task, task_id.as_str(), e.message.clone());
                Err(e)
            }
        };

        Ok(result?)
    }
}

/// Initializes resources through their middleware pipeline (SPEC_FULL §4.1, §4.4). Called
/// lazily the first time a resource is force-initialized (by a dependency resolution, by
/// [`crate::engine::Engine::resource_value`]) or eagerly by
/// [`crate::registry::bootstrap::Runner`] during boot.
pub struct ResourceInitializer;

impl ResourceInitializer {
    #[instrument(skip(engine), fields(resource_id = %resource_id))]
    pub async fn force_init(engine: &Engine, resource_id: &Id) -> Result<serde_json::Value, RuntimeError> {
        if let Some(v) = engine.registry.resource_value(resource_id.as_str()).await {
            return Ok(v);
        }
        let def = engine
            .registry
            .resource_def(resource_id.as_str())
            .await
            .ok_or_else(|| RuntimeError {
                kind: RuntimeErrorKind::Init,
                source_id: resource_id.to_string(),
                message: "resource not registered".to_string(),
            })?;

        let deps = DependencyProcessor::resolve(engine, Some(resource_id), &def.dependencies).await?;

        let global = engine.registry.global_resource_middlewares().await;
        let mut chain_ids: Vec<Id> = global
            .into_iter()
            .filter(|g| !def.middleware.contains(g))
            .collect();
        chain_ids.extend(def.middleware.clone());

        let mut middlewares = Vec::with_capacity(chain_ids.len());
        for id in &chain_ids {
            if let Some(mw) = engine.registry.resource_middleware(id.as_str()).await {
                middlewares.push(mw.run.clone());
            }
        }
        middlewares.extend(
            engine
                .middleware
                .resource_interceptors_for(resource_id.as_str())
                .await,
        );

        let init_fn = def.init.clone();
        let deps_for_base = deps.clone();
        let base: Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, RuntimeError>> + Send + Sync> =
            Arc::new(move |config: serde_json::Value| {
                let init_fn = init_fn.clone();
                let deps = deps_for_base.clone();
                Box::pin(async move { init_fn(config, deps).await })
            });

        let mut next = Next(base);
        for mw in middlewares.into_iter().rev() {
            let inner_next = next.clone();
            let deps_for_mw = deps.clone();
            next = Next(Arc::new(move |input: serde_json::Value| {
                let mw = mw.clone();
                let inner_next = inner_next.clone();
                let deps = deps_for_mw.clone();
                Box::pin(async move { mw(input, inner_next, deps).await })
            }));
        }

        let result = next.call(def.config.clone()).await;
        match result {
            Ok(value) => {
                if let Some(schema) = &def.result_schema {
                    schema(&value).map_err(|cause| RuntimeError {
                        kind: RuntimeErrorKind::Init,
                        source_id: resource_id.to_string(),
                        message: cause,
                    })?;
                }
                engine.registry.mark_resource_initialized(resource_id, value.clone()).await;
                Ok(value)
            }
            Err(e) => {
                engine.report(RuntimeErrorKind::Init, resource_id.as_str(), e.message.clone());
                Err(e)
            }
        }
    }

    pub async fn dispose(engine: &Engine, resource_id: &Id) -> Result<(), RuntimeError> {
        let Some(def) = engine.registry.resource_def(resource_id.as_str()).await else {
            return Ok(());
        };
        if !engine.registry.is_resource_initialized(resource_id.as_str()).await {
            return Ok(());
        }
        if let Some(dispose) = &def.dispose {
            let value = engine
                .registry
                .resource_value(resource_id.as_str())
                .await
                .unwrap_or(serde_json::Value::Null);
            dispose(value).await?;
        }
        engine.registry.mark_resource_disposed(resource_id).await;
        Ok(())
    }
}

/// Builds the `require()` task-middleware (SPEC_FULL §4.5): refuses to run `next()` unless
/// `context_id` is currently provided.
pub fn require_context_middleware(context_id: impl Into<Id>) -> TaskMiddlewareRunFn {
    let context_id: Id = context_id.into();
    Arc::new(move |input, next, _deps| {
        let context_id = context_id.clone();
        Box::pin(async move {
            if !crate::context::is_bound(context_id.as_str()) {
                return Err(RuntimeError {
                    kind: RuntimeErrorKind::Middleware,
                    source_id: context_id.to_string(),
                    message: format!("context '{context_id}' is not provided"),
                });
            }
            next.call(input).await
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definitions::{DependencyMap, ResourceDef, TaskDef};
    use crate::events::manager::EventManager;
    use crate::registry::Registry;
    use std::sync::Arc as StdArc;

    fn test_engine() -> Engine {
        Engine::new(StdArc::new(Registry::new()), StdArc::new(EventManager::new()))
    }

    #[tokio::test]
    async fn task_runner_runs_task_with_no_middleware() {
        let engine = test_engine();
        let task = TaskDef {
            id: "task.echo".into(),
            dependencies: DependencyMap::new(),
            middleware: vec![],
            tags: vec![],
            throws: vec![],
            input_schema: None,
            result_schema: None,
            run: Arc::new(|input, _deps| Box::pin(async move { Ok(input) })),
        };
        engine.registry.register_task(task).await.unwrap();

        let out = TaskRunner::run(&engine, &"task.echo".into(), serde_json::json!({"v": 1}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"v": 1}));
    }

    #[tokio::test]
    async fn task_runner_reports_validation_error_on_bad_input() {
        let engine = test_engine();
        let task = TaskDef {
            id: "task.strict".into(),
            dependencies: DependencyMap::new(),
            middleware: vec![],
            tags: vec![],
            throws: vec![],
            input_schema: Some(StdArc::new(|v| {
                if v.get("required").is_some() {
                    Ok(())
                } else {
                    Err("missing 'required'".to_string())
                }
            })),
            result_schema: None,
            run: Arc::new(|input, _deps| Box::pin(async move { Ok(input) })),
        };
        engine.registry.register_task(task).await.unwrap();

        let err = TaskRunner::run(&engine, &"task.strict".into(), serde_json::json!({})).await;
        assert!(matches!(err, Err(RunnerError::Validation(_))));
    }

    #[tokio::test]
    async fn resource_initializer_initializes_once() {
        let engine = test_engine();
        let calls = StdArc::new(tokio::sync::Mutex::new(0));
        let calls_clone = calls.clone();
        let resource = ResourceDef {
            id: "resource.counter".into(),
            dependencies: DependencyMap::new(),
            register: vec![],
            overrides: vec![],
            middleware: vec![],
            tags: vec![],
            config: serde_json::Value::Null,
            init: StdArc::new(move |_config, _deps| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    let mut c = calls.lock().await;
                    *c += 1;
                    Ok(serde_json::json!({"n": *c}))
                })
            }),
            dispose: None,
            result_schema: None,
        };
        engine.registry.register_resource(resource).await.unwrap();

        let id: Id = "resource.counter".into();
        let first = ResourceInitializer::force_init(&engine, &id).await.unwrap();
        let second = ResourceInitializer::force_init(&engine, &id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(*calls.lock().await, 1);
    }
}
