//! `Runner::run`/`dispose`: boots a root resource, orders resource initialization
//! (sequential topological order, or parallel wave-based rounds), locks the Registry and
//! EventManager, and disposes in reverse (SPEC_FULL §4.1).
//!
//! Grounded on the teacher's `services/dag_executor.rs` wave model ("at each round,
//! execute every task whose dependencies are already satisfied; fail if no task becomes
//! ready and any remain") generalized here from task waves to resource-initialization
//! waves, and on the order in which `main.rs` constructs and wires its services
//! sequentially as the model for the sequential mode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::errors::{DefinitionError, RunnerError};
use crate::domain::ids::Id;
use crate::engine::{Engine, ErrorReporter};
use crate::events::manager::EventManager;
use crate::middleware::manager::ResourceInitializer;
use crate::registry::{detect_resource_cycle, Registry};

/// How resources are initialized during boot (SPEC_FULL §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitMode {
    /// Initialize resources one at a time in dependency-topological order.
    #[default]
    Sequential,
    /// At each round, initialize every resource whose resource-typed dependencies are all
    /// initialized; fail if no resource becomes ready in a round and any remain.
    Parallel,
}

#[derive(Default)]
pub struct RunOptions {
    pub init_mode: InitMode,
    pub error_reporter: Option<Arc<ErrorReporter>>,
}

/// The handle returned by [`Runner::run`] (SPEC_FULL §4.1).
pub struct RunHandle {
    pub engine: Engine,
    root_id: Id,
}

impl RunHandle {
    pub async fn value(&self) -> Option<serde_json::Value> {
        self.engine.registry.resource_value(self.root_id.as_str()).await
    }

    pub async fn get_resource_value(&self, id: &str) -> Option<serde_json::Value> {
        self.engine.registry.resource_value(id).await
    }

    /// Force-initializes a resource that has not yet been initialized, returning its
    /// value (SPEC_FULL §4.1: `getLazyResourceValue`).
    pub async fn get_lazy_resource_value(&self, id: &str) -> Result<serde_json::Value, RunnerError> {
        Ok(self.engine.resource_value(&Id::from(id)).await?)
    }

    /// Disposes every initialized resource in reverse initialization order (SPEC_FULL
    /// §4.1). Falls back to LIFO-by-registration when initialization order could not be
    /// determined (a cycle prevented ordering).
    #[instrument(skip(self))]
    pub async fn dispose(&self) -> Result<(), RunnerError> {
        let mut order = self.engine.registry.init_order().await;
        if order.is_empty() {
            order = self.engine.registry.registration_order().await;
        }
        for id in order.into_iter().rev() {
            if let Err(e) = ResourceInitializer::dispose(&self.engine, &id).await {
                warn!(resource = %id, error = %e, "resource dispose failed");
                self.engine.report(
                    crate::domain::errors::RuntimeErrorKind::Init,
                    id.as_str(),
                    e.to_string(),
                );
            }
        }
        Ok(())
    }
}

/// Boots a root resource graph (SPEC_FULL §4.1).
pub struct Runner;

impl Runner {
    /// `run(root, options)`: walks `root.register[]`, validates, initializes resources,
    /// locks the Registry and EventManager. On any init failure, already-initialized
    /// resources are disposed before the error is returned (SPEC_FULL §4.1: "init failures
    /// in any resource abort boot and trigger disposal of already-initialized resources").
    #[instrument(skip(registry, events, options))]
    pub async fn run(
        root_id: Id,
        registry: Arc<Registry>,
        events: Arc<EventManager>,
        options: RunOptions,
    ) -> Result<RunHandle, RunnerError> {
        registry.validate().await?;
        registry.apply_overrides().await?;

        let mut engine = Engine::new(registry.clone(), events.clone());
        if let Some(reporter) = options.error_reporter {
            engine = engine.with_reporter(reporter);
        }

        let resource_ids = registry.resource_ids().await;
        let init_result = match options.init_mode {
            InitMode::Sequential => Self::init_sequential(&engine, &resource_ids).await,
            InitMode::Parallel => Self::init_parallel(&engine, &resource_ids).await,
        };

        if let Err(e) = init_result {
            let handle = RunHandle {
                engine: engine.clone(),
                root_id: root_id.clone(),
            };
            let _ = handle.dispose().await;
            return Err(e);
        }

        registry.lock();
        events.lock();
        info!(root = %root_id, resources = resource_ids.len(), "runtime booted");

        Ok(RunHandle { engine, root_id })
    }

    async fn init_sequential(engine: &Engine, resource_ids: &[Id]) -> Result<(), RunnerError> {
        let graph = engine.registry.resource_adjacency().await;
        let order = topological_order(&graph, resource_ids)?;
        for id in order {
            ResourceInitializer::force_init(engine, &id).await.map_err(|e| {
                engine.report(crate::domain::errors::RuntimeErrorKind::Init, id.as_str(), e.message.clone());
                RunnerError::from(e)
            })?;
        }
        Ok(())
    }

    async fn init_parallel(engine: &Engine, resource_ids: &[Id]) -> Result<(), RunnerError> {
        let graph = engine.registry.resource_adjacency().await;
        let mut remaining: HashSet<Id> = resource_ids.iter().cloned().collect();
        let mut done: HashSet<Id> = HashSet::new();

        while !remaining.is_empty() {
            let ready: Vec<Id> = remaining
                .iter()
                .filter(|id| {
                    graph
                        .get(*id)
                        .map(|deps| deps.iter().all(|d| done.contains(d)))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                return Err(DefinitionError::UnknownDependency {
                    definition: "runner".to_string(),
                    id: "runner".to_string(),
                    dependency: format!(
                        "no resource became ready this round; remaining={:?} (likely a cycle)",
                        remaining
                    ),
                }
                .into());
            }

            let futures = ready.iter().map(|id| {
                let engine = engine.clone();
                let id = id.clone();
                async move { (id.clone(), ResourceInitializer::force_init(&engine, &id).await) }
            });
            let results = futures::future::join_all(futures).await;
            for (id, result) in results {
                result.map_err(|e| {
                    engine.report(crate::domain::errors::RuntimeErrorKind::Init, id.as_str(), e.message.clone());
                    RunnerError::from(e)
                })?;
                remaining.remove(&id);
                done.insert(id);
            }
        }
        Ok(())
    }
}

/// Topological order derived from the resource adjacency graph; falls back to
/// registration order when a cycle prevents a total order (SPEC_FULL §9: "prefer arena +
/// integer indices... disposal order derives from recorded initialization order, with a
/// topological fallback").
fn topological_order(graph: &HashMap<Id, Vec<Id>>, all_ids: &[Id]) -> Result<Vec<Id>, RunnerError> {
    if let Some(cycle) = detect_resource_cycle(graph) {
        return Err(DefinitionError::UnknownDependency {
            definition: "runner".to_string(),
            id: "runner".to_string(),
            dependency: format!("cycle detected among resources: {:?}", cycle),
        }
        .into());
    }

    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(all_ids.len());

    fn visit(
        node: &Id,
        graph: &HashMap<Id, Vec<Id>>,
        visited: &mut HashSet<Id>,
        order: &mut Vec<Id>,
    ) {
        if visited.contains(node) {
            return;
        }
        visited.insert(node.clone());
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                visit(dep, graph, visited, order);
            }
        }
        order.push(node.clone());
    }

    for id in all_ids {
        visit(id, graph, &mut visited, &mut order);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definitions::{DependencyMap, DependencyRef, ResourceDef};

    fn resource(id: &str, deps: DependencyMap) -> ResourceDef {
        ResourceDef {
            id: id.into(),
            dependencies: deps,
            register: vec![],
            overrides: vec![],
            middleware: vec![],
            tags: vec![],
            config: serde_json::Value::Null,
            init: Arc::new(|_config, _deps| Box::pin(async move { Ok(serde_json::json!({"ok": true})) })),
            dispose: None,
            result_schema: None,
        }
    }

    #[tokio::test]
    async fn sequential_boot_initializes_in_dependency_order() {
        let registry = Arc::new(Registry::new());
        let events = Arc::new(EventManager::new());

        let mut deps_b = DependencyMap::new();
        deps_b.insert("a".into(), DependencyRef::Resource("resource.a".into()));
        registry.register_resource(resource("resource.a", DependencyMap::new())).await.unwrap();
        registry.register_resource(resource("resource.b", deps_b)).await.unwrap();

        let handle = Runner::run(
            "resource.b".into(),
            registry.clone(),
            events.clone(),
            RunOptions::default(),
        )
        .await
        .unwrap();

        let order = handle.engine.registry.init_order().await;
        assert_eq!(order, vec![Id::from("resource.a"), Id::from("resource.b")]);
        assert!(registry.is_locked());
        assert!(events.is_locked());
    }

    #[tokio::test]
    async fn parallel_boot_fails_when_no_resource_becomes_ready() {
        let registry = Arc::new(Registry::new());
        let events = Arc::new(EventManager::new());

        let mut deps_a = DependencyMap::new();
        deps_a.insert("b".into(), DependencyRef::Resource("resource.b".into()));
        let mut deps_b = DependencyMap::new();
        deps_b.insert("a".into(), DependencyRef::Resource("resource.a".into()));
        registry.register_resource(resource("resource.a", deps_a)).await.unwrap();
        registry.register_resource(resource("resource.b", deps_b)).await.unwrap();

        let result = Runner::run(
            "resource.a".into(),
            registry,
            events,
            RunOptions {
                init_mode: InitMode::Parallel,
                error_reporter: None,
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dispose_runs_each_resource_at_most_once_in_reverse_order() {
        let registry = Arc::new(Registry::new());
        let events = Arc::new(EventManager::new());
        let dispose_calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        for name in ["resource.a", "resource.b"] {
            let calls = dispose_calls.clone();
            let mut def = resource(name, DependencyMap::new());
            let name_owned = name.to_string();
            def.dispose = Some(Arc::new(move |_value| {
                let calls = calls.clone();
                let name_owned = name_owned.clone();
                Box::pin(async move {
                    calls.lock().await.push(name_owned);
                    Ok(())
                })
            }));
            registry.register_resource(def).await.unwrap();
        }

        let handle = Runner::run("resource.b".into(), registry, events, RunOptions::default())
            .await
            .unwrap();
        handle.dispose().await.unwrap();
        handle.dispose().await.unwrap();

        let calls = dispose_calls.lock().await;
        assert_eq!(*calls, vec!["resource.a".to_string(), "resource.b".to_string()].into_iter().rev().collect::<Vec<_>>());
    }
}
