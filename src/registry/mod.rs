//! The Registry: holds every definition reachable from the root resource, enforces id
//! uniqueness, computes the tag index, and tracks resource initialization/disposal state
//! (SPEC_FULL §3, §4.1).
//!
//! Grounded on the teacher's `services/dependency_resolver.rs` (cycle detection over a
//! `HashMap<Uuid, Vec<Uuid>>` adjacency map) generalized from task dependencies to resource
//! dependencies, and on `domain/ports.rs`'s repository-contract style for the Store-like
//! "collection of typed records keyed by id" shape.

pub mod bootstrap;
pub mod dependency;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::definitions::{
    AsyncContextDef, DefinitionKind, ErrorDef, EventDef, HookDef, ResourceDef,
    ResourceMiddlewareDef, TaskDef, TaskMiddlewareDef,
};
use crate::domain::errors::{DefinitionError, LockError, RunnerError};
use crate::domain::ids::Id;
use crate::domain::tag::{TagDef, TagIndex};

use std::sync::Arc;

/// Per-resource bookkeeping the Registry owns: the definition, whether it has been
/// initialized, its initialized value, and the per-instance context object (SPEC_FULL §3:
/// `ResourceStoreElement`).
pub struct ResourceSlot {
    pub def: Arc<ResourceDef>,
    pub initialized: bool,
    pub value: Option<serde_json::Value>,
}

/// Lazily-built execution pipeline cache for a task (SPEC_FULL §3: `TaskStoreElement`).
pub struct TaskSlot {
    pub def: Arc<TaskDef>,
}

#[derive(Default)]
struct Definitions {
    tasks: HashMap<Id, TaskSlot>,
    resources: HashMap<Id, ResourceSlot>,
    events: HashMap<Id, Arc<EventDef>>,
    hooks: HashMap<Id, Arc<HookDef>>,
    task_middlewares: HashMap<Id, Arc<TaskMiddlewareDef>>,
    resource_middlewares: HashMap<Id, Arc<ResourceMiddlewareDef>>,
    tags: HashMap<Id, Arc<TagDef>>,
    errors: HashMap<Id, Arc<ErrorDef>>,
    async_contexts: HashMap<Id, Arc<AsyncContextDef>>,
    /// Order definitions were registered in; the LIFO fallback disposal order when a cycle
    /// prevents topological ordering (SPEC_FULL §4.1, §9).
    registration_order: Vec<Id>,
    /// Order resources actually finished initializing; disposal reverses this (SPEC_FULL §4.1).
    init_order: Vec<Id>,
    global_task_middlewares: Vec<Id>,
    global_resource_middlewares: Vec<Id>,
}

/// Holds every definition collected during boot. Locked after `Runner::run` completes
/// initialization; further registration then fails with
/// [`crate::domain::errors::LockError::RegistryLocked`].
pub struct Registry {
    defs: RwLock<Definitions>,
    tag_index: RwLock<TagIndex>,
    locked: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            defs: RwLock::new(Definitions::default()),
            tag_index: RwLock::new(TagIndex::new()),
            locked: AtomicBool::new(false),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    fn check_unlocked(&self) -> Result<(), RunnerError> {
        if self.is_locked() {
            return Err(LockError::RegistryLocked.into());
        }
        Ok(())
    }

    async fn check_duplicate(&self, id: &Id) -> Result<(), DefinitionError> {
        let d = self.defs.read().await;
        let exists = d.tasks.contains_key(id)
            || d.resources.contains_key(id)
            || d.events.contains_key(id)
            || d.hooks.contains_key(id)
            || d.task_middlewares.contains_key(id)
            || d.resource_middlewares.contains_key(id)
            || d.tags.contains_key(id)
            || d.errors.contains_key(id)
            || d.async_contexts.contains_key(id);
        if exists {
            return Err(DefinitionError::DuplicateId(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, def))]
    pub async fn register_task(&self, def: TaskDef) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        let id = def.id.clone();
        let tags = def.tags.clone();
        d.registration_order.push(id.clone());
        d.tasks.insert(id.clone(), TaskSlot { def: Arc::new(def) });
        drop(d);
        self.index_tags(&tags, |idx, tag, cfg| idx.add_task(tag, &id, cfg)).await;
        Ok(())
    }

    #[instrument(skip(self, def))]
    pub async fn register_resource(&self, def: ResourceDef) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        let id = def.id.clone();
        let tags = def.tags.clone();
        d.registration_order.push(id.clone());
        d.resources.insert(
            id.clone(),
            ResourceSlot {
                def: Arc::new(def),
                initialized: false,
                value: None,
            },
        );
        drop(d);
        self.index_tags(&tags, |idx, tag, cfg| idx.add_resource(tag, &id, cfg)).await;
        Ok(())
    }

    #[instrument(skip(self, def))]
    pub async fn register_event(&self, def: EventDef) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        let id = def.id.clone();
        let tags = def.tags.clone();
        d.registration_order.push(id.clone());
        d.events.insert(id.clone(), Arc::new(def));
        drop(d);
        self.index_tags(&tags, |idx, tag, cfg| idx.add_event(tag, &id, cfg)).await;
        Ok(())
    }

    #[instrument(skip(self, def))]
    pub async fn register_hook(&self, def: HookDef) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        let id = def.id.clone();
        d.registration_order.push(id.clone());
        d.hooks.insert(id.clone(), Arc::new(def));
        Ok(())
    }

    #[instrument(skip(self, def))]
    pub async fn register_task_middleware(
        &self,
        def: TaskMiddlewareDef,
        global: bool,
    ) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        let id = def.id.clone();
        d.registration_order.push(id.clone());
        if global {
            if d.global_task_middlewares.contains(&id) {
                return Err(DefinitionError::MiddlewareAlreadyGlobal(id.to_string()).into());
            }
            d.global_task_middlewares.push(id.clone());
        }
        d.task_middlewares.insert(id, Arc::new(def));
        Ok(())
    }

    #[instrument(skip(self, def))]
    pub async fn register_resource_middleware(
        &self,
        def: ResourceMiddlewareDef,
        global: bool,
    ) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        let id = def.id.clone();
        d.registration_order.push(id.clone());
        if global {
            if d.global_resource_middlewares.contains(&id) {
                return Err(DefinitionError::MiddlewareAlreadyGlobal(id.to_string()).into());
            }
            d.global_resource_middlewares.push(id.clone());
        }
        d.resource_middlewares.insert(id, Arc::new(def));
        Ok(())
    }

    pub async fn register_tag(&self, def: TagDef) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        d.registration_order.push(def.id.clone());
        d.tags.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    pub async fn register_error(&self, def: ErrorDef) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        d.registration_order.push(def.id.clone());
        d.errors.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    pub async fn register_async_context(&self, def: AsyncContextDef) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.check_duplicate(&def.id).await?;
        let mut d = self.defs.write().await;
        d.registration_order.push(def.id.clone());
        d.async_contexts.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    async fn index_tags(
        &self,
        tags: &[Id],
        add: impl Fn(&mut TagIndex, &Id, Option<serde_json::Value>),
    ) {
        if tags.is_empty() {
            return;
        }
        let mut idx = self.tag_index.write().await;
        for tag in tags {
            add(&mut idx, tag, None);
        }
    }

    pub async fn tag_accessor(&self, tag_id: &str) -> crate::domain::tag::TagAccessor {
        self.tag_index.read().await.accessor(tag_id)
    }

    pub async fn task(&self, id: &str) -> Option<Arc<TaskDef>> {
        self.defs.read().await.tasks.get(id).map(|s| s.def.clone())
    }

    pub async fn resource_def(&self, id: &str) -> Option<Arc<ResourceDef>> {
        self.defs.read().await.resources.get(id).map(|s| s.def.clone())
    }

    pub async fn event(&self, id: &str) -> Option<Arc<EventDef>> {
        self.defs.read().await.events.get(id).cloned()
    }

    pub async fn hook_def(&self, id: &str) -> Option<Arc<HookDef>> {
        self.defs.read().await.hooks.get(id).cloned()
    }

    pub async fn hooks_for_event(&self, event_id: &str) -> Vec<Arc<HookDef>> {
        self.defs
            .read()
            .await
            .hooks
            .values()
            .filter(|h| h.events.iter().any(|e| e.as_str() == event_id))
            .cloned()
            .collect()
    }

    pub async fn task_middleware(&self, id: &str) -> Option<Arc<TaskMiddlewareDef>> {
        self.defs.read().await.task_middlewares.get(id).cloned()
    }

    pub async fn resource_middleware(&self, id: &str) -> Option<Arc<ResourceMiddlewareDef>> {
        self.defs.read().await.resource_middlewares.get(id).cloned()
    }

    pub async fn global_task_middlewares(&self) -> Vec<Id> {
        self.defs.read().await.global_task_middlewares.clone()
    }

    pub async fn global_resource_middlewares(&self) -> Vec<Id> {
        self.defs.read().await.global_resource_middlewares.clone()
    }

    pub async fn error_def(&self, id: &str) -> Option<Arc<ErrorDef>> {
        self.defs.read().await.errors.get(id).cloned()
    }

    pub async fn async_context_def(&self, id: &str) -> Option<Arc<AsyncContextDef>> {
        self.defs.read().await.async_contexts.get(id).cloned()
    }

    pub async fn resource_ids(&self) -> Vec<Id> {
        self.defs.read().await.resources.keys().cloned().collect()
    }

    pub async fn registration_order(&self) -> Vec<Id> {
        self.defs.read().await.registration_order.clone()
    }

    pub async fn init_order(&self) -> Vec<Id> {
        self.defs.read().await.init_order.clone()
    }

    pub async fn is_resource_initialized(&self, id: &str) -> bool {
        self.defs
            .read()
            .await
            .resources
            .get(id)
            .map(|r| r.initialized)
            .unwrap_or(false)
    }

    pub async fn resource_value(&self, id: &str) -> Option<serde_json::Value> {
        self.defs.read().await.resources.get(id).and_then(|r| r.value.clone())
    }

    pub async fn mark_resource_initialized(&self, id: &Id, value: serde_json::Value) {
        let mut d = self.defs.write().await;
        if let Some(slot) = d.resources.get_mut(id) {
            slot.initialized = true;
            slot.value = Some(value);
        }
        d.init_order.push(id.clone());
    }

    pub async fn mark_resource_disposed(&self, id: &Id) {
        let mut d = self.defs.write().await;
        if let Some(slot) = d.resources.get_mut(id) {
            slot.initialized = false;
        }
    }

    /// Sanity pass (SPEC_FULL §4.1): every dependency referenced by a registered definition
    /// must itself be registered (unless optional), and middlewares must reference registered
    /// middlewares.
    pub async fn validate(&self) -> Result<(), DefinitionError> {
        let d = self.defs.read().await;
        let known_ids = |dep: &crate::domain::definitions::DependencyRef| -> (DefinitionKind, String, bool) {
            use crate::domain::definitions::DependencyRef as R;
            let optional = dep.is_optional();
            let id = dep.target_id().to_string();
            let kind = match dep {
                R::Resource(_) => DefinitionKind::Resource,
                R::Task(_) => DefinitionKind::Task,
                R::Event(_) => DefinitionKind::Event,
                R::Hook(_) => DefinitionKind::Hook,
                R::TaskMiddleware(_) => DefinitionKind::TaskMiddleware,
                R::ResourceMiddleware(_) => DefinitionKind::ResourceMiddleware,
                R::Tag(_) => DefinitionKind::Tag,
                R::AsyncContext(_) => DefinitionKind::AsyncContext,
                R::Error(_) => DefinitionKind::Error,
                R::TagStartup(_) => DefinitionKind::Tag,
                R::Optional(inner) => return known_ids(inner),
            };
            (kind, id, optional)
        };

        let exists = |kind: &DefinitionKind, id: &str| -> bool {
            match kind {
                DefinitionKind::Resource => d.resources.contains_key(id),
                DefinitionKind::Task => d.tasks.contains_key(id),
                DefinitionKind::Event => d.events.contains_key(id),
                DefinitionKind::Hook => d.hooks.contains_key(id),
                DefinitionKind::TaskMiddleware => d.task_middlewares.contains_key(id),
                DefinitionKind::ResourceMiddleware => d.resource_middlewares.contains_key(id),
                DefinitionKind::Tag => d.tags.contains_key(id),
                DefinitionKind::Error => d.errors.contains_key(id),
                DefinitionKind::AsyncContext => d.async_contexts.contains_key(id),
            }
        };

        for slot in d.tasks.values() {
            for dep in slot.def.dependencies.values() {
                let (kind, id, optional) = known_ids(dep);
                if !optional && !exists(&kind, &id) {
                    return Err(DefinitionError::UnknownDependency {
                        definition: slot.def.id.to_string(),
                        id: slot.def.id.to_string(),
                        dependency: id,
                    });
                }
            }
            for m in &slot.def.middleware {
                if !d.task_middlewares.contains_key(m) {
                    return Err(DefinitionError::UnknownDependency {
                        definition: slot.def.id.to_string(),
                        id: slot.def.id.to_string(),
                        dependency: m.to_string(),
                    });
                }
            }
        }
        for slot in d.resources.values() {
            for dep in slot.def.dependencies.values() {
                let (kind, id, optional) = known_ids(dep);
                if !optional && !exists(&kind, &id) {
                    return Err(DefinitionError::UnknownDependency {
                        definition: slot.def.id.to_string(),
                        id: slot.def.id.to_string(),
                        dependency: id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Applies resource overrides (SPEC_FULL §4.1: "an override replaces the `init`/`run` of
    /// an existing id and requires the original to exist"). A resource that declares
    /// `overrides: [target_id]` patches `target_id`'s `init`/`dispose`/`result_schema` onto
    /// the target's slot and is itself dropped from the resource set — it never gets its own
    /// initialization, it exists purely to carry the replacement functions.
    pub async fn apply_overrides(&self) -> Result<(), DefinitionError> {
        let mut d = self.defs.write().await;

        let overriders: Vec<(Id, Id)> = d
            .resources
            .values()
            .flat_map(|slot| slot.def.overrides.iter().map(move |target| (slot.def.id.clone(), target.clone())))
            .collect();

        for (overrider_id, target_id) in &overriders {
            if !d.resources.contains_key(target_id) {
                return Err(DefinitionError::OverrideTargetMissing(target_id.to_string()));
            }
            let overrider_def = d
                .resources
                .get(overrider_id)
                .expect("overrider collected from resources map")
                .def
                .clone();
            let target_slot = d.resources.get_mut(target_id).expect("checked above");
            let mut patched = (*target_slot.def).clone();
            patched.init = overrider_def.init.clone();
            patched.dispose = overrider_def.dispose.clone();
            patched.result_schema = overrider_def.result_schema.clone();
            target_slot.def = Arc::new(patched);
        }

        for (overrider_id, _) in &overriders {
            d.resources.remove(overrider_id);
            d.registration_order.retain(|id| id != overrider_id);
        }

        Ok(())
    }

    /// Builds the resource dependency adjacency map (resource → resource-typed dependencies
    /// only) used for init ordering and cycle detection.
    pub async fn resource_adjacency(&self) -> HashMap<Id, Vec<Id>> {
        use crate::domain::definitions::DependencyRef as R;
        let d = self.defs.read().await;
        let mut graph = HashMap::new();
        for (id, slot) in &d.resources {
            let mut deps = Vec::new();
            for dep in slot.def.dependencies.values() {
                let mut cur = dep;
                while let R::Optional(inner) = cur {
                    cur = inner;
                }
                if let R::Resource(target) = cur {
                    if d.resources.contains_key(target) {
                        deps.push(target.clone());
                    }
                }
            }
            graph.insert(id.clone(), deps);
        }
        graph
    }
}

/// DFS cycle detection over a resource adjacency graph, the same shape as the teacher's
/// `detect_cycle_util` in `services/dependency_resolver.rs`, generalized from task ids (Uuid)
/// to definition [`Id`]s.
pub fn detect_resource_cycle(graph: &HashMap<Id, Vec<Id>>) -> Option<Vec<Id>> {
    use std::collections::HashSet;

    fn visit(
        node: &Id,
        graph: &HashMap<Id, Vec<Id>>,
        visited: &mut HashSet<Id>,
        rec_stack: &mut HashSet<Id>,
        path: &mut Vec<Id>,
    ) -> bool {
        if rec_stack.contains(node) {
            path.push(node.clone());
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visited.insert(node.clone());
        rec_stack.insert(node.clone());
        path.push(node.clone());

        if let Some(deps) = graph.get(node) {
            for dep in deps {
                if visit(dep, graph, visited, rec_stack, path) {
                    return true;
                }
            }
        }

        rec_stack.remove(node);
        path.pop();
        false
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    for node in graph.keys() {
        let mut path = Vec::new();
        if visit(node, graph, &mut visited, &mut rec_stack, &mut path) {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::dependency::ResolvedDeps;

    fn graph(pairs: &[(&str, &str)]) -> HashMap<Id, Vec<Id>> {
        let mut g: HashMap<Id, Vec<Id>> = HashMap::new();
        for (from, to) in pairs {
            g.entry(Id::new(*from)).or_default().push(Id::new(*to));
        }
        g
    }

    #[test]
    fn detects_no_cycle_in_dag() {
        let g = graph(&[("a", "b"), ("b", "c")]);
        assert!(detect_resource_cycle(&g).is_none());
    }

    #[test]
    fn detects_direct_cycle() {
        let g = graph(&[("a", "b"), ("b", "a")]);
        assert!(detect_resource_cycle(&g).is_some());
    }

    #[tokio::test]
    async fn register_duplicate_id_fails() {
        let registry = Registry::new();
        registry
            .register_tag(TagDef::new("retryable"))
            .await
            .unwrap();
        let err = registry.register_tag(TagDef::new("retryable")).await;
        assert!(matches!(
            err,
            Err(RunnerError::Definition(DefinitionError::DuplicateId(_)))
        ));
    }

    #[tokio::test]
    async fn register_after_lock_fails() {
        let registry = Registry::new();
        registry.lock();
        let err = registry.register_tag(TagDef::new("x")).await;
        assert!(matches!(
            err,
            Err(RunnerError::Lock(LockError::RegistryLocked))
        ));
    }

    fn resource_def(id: &str, tag: &str) -> ResourceDef {
        let tag = tag.to_string();
        ResourceDef {
            id: id.into(),
            dependencies: crate::domain::definitions::DependencyMap::new(),
            register: vec![],
            overrides: vec![],
            middleware: vec![],
            tags: vec![],
            config: serde_json::Value::Null,
            init: Arc::new(move |_config, _deps| {
                let tag = tag.clone();
                Box::pin(async move { Ok(serde_json::json!({"from": tag})) })
            }),
            dispose: None,
            result_schema: None,
        }
    }

    #[tokio::test]
    async fn override_patches_target_init_and_drops_overrider() {
        let registry = Registry::new();
        registry.register_resource(resource_def("resource.original", "original")).await.unwrap();

        let mut overrider = resource_def("resource.override", "override");
        overrider.overrides = vec!["resource.original".into()];
        registry.register_resource(overrider).await.unwrap();

        registry.apply_overrides().await.unwrap();

        assert!(registry.resource_def("resource.override").await.is_none());
        let patched = registry.resource_def("resource.original").await.unwrap();
        let value = (patched.init)(serde_json::Value::Null, ResolvedDeps::default()).await.unwrap();
        assert_eq!(value, serde_json::json!({"from": "override"}));
    }

    #[tokio::test]
    async fn override_of_missing_target_fails() {
        let registry = Registry::new();
        let mut overrider = resource_def("resource.override", "override");
        overrider.overrides = vec!["resource.missing".into()];
        registry.register_resource(overrider).await.unwrap();

        let err = registry.apply_overrides().await;
        assert!(matches!(err, Err(DefinitionError::OverrideTargetMissing(_))));
    }
}
