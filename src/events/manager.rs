//! `EventManager`: per-listener ordering, parallel-batch semantics, emission/hook
//! interceptors, payload validation and listener-cache invalidation (SPEC_FULL §3, §4.3).
//!
//! Grounded on the teacher's `services/event_bus.rs` (sequenced dispatch over a broadcast
//! channel) for the emission-envelope shape, and `services/event_reactor.rs`
//! (priority-sorted handler list, `EventFilter::matches`) for the sorted-insert /
//! filter-gated listener design, generalized here from a single global reactor to
//! per-event-id listener lists plus a distinct global list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::definitions::{BoxFuture, EventDef, HookRunFn, SchemaFn};
use crate::domain::errors::{AggregateError, AnnotatedListenerError, CycleError, RunnerError, ValidationError};
use crate::domain::ids::Id;
use crate::registry::dependency::ResolvedDeps;

use super::cycle;

/// A single emission observed by listeners and interceptors (SPEC_FULL §4.3).
#[derive(Clone, Debug)]
pub struct Emission {
    pub id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
    pub meta: HashMap<String, Value>,
    pub tags: Vec<Id>,
    stop_propagation: Arc<std::sync::atomic::AtomicBool>,
}

impl Emission {
    fn new(event_id: &str, data: Value, source: Option<String>, tags: Vec<Id>) -> Self {
        Self {
            id: event_id.to_string(),
            data,
            timestamp: Utc::now(),
            source,
            meta: HashMap::new(),
            tags,
            stop_propagation: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn stop_propagation(&self) {
        self.stop_propagation.store(true, Ordering::Release);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.stop_propagation.load(Ordering::Acquire)
    }
}

pub type ListenerFn = Arc<
    dyn Fn(Emission) -> BoxFuture<'static, Result<Value, RunnerError>> + Send + Sync,
>;

pub type FilterFn = Arc<dyn Fn(&Emission) -> bool + Send + Sync>;

pub type EmissionInterceptorFn = Arc<
    dyn Fn(Emission, NextEmit) -> BoxFuture<'static, Result<Value, RunnerError>> + Send + Sync,
>;

/// The rest of the interceptor chain. Calling it runs the next interceptor, or, at the
/// bottom, the base listener-dispatch loop.
#[derive(Clone)]
pub struct NextEmit(
    Arc<dyn Fn(Emission) -> BoxFuture<'static, Result<Value, RunnerError>> + Send + Sync>,
);

impl NextEmit {
    pub async fn call(&self, emission: Emission) -> Result<Value, RunnerError> {
        (self.0)(emission).await
    }
}

/// One registered listener (SPEC_FULL §3: `ListenerStorage`).
#[derive(Clone)]
pub(crate) struct Listener {
    handler: ListenerFn,
    order: i64,
    filter: Option<FilterFn>,
    id: String,
    is_global: bool,
}

#[derive(Default)]
struct EventManagerState {
    /// Event-specific listeners, kept sorted by `order` per event id.
    by_event: HashMap<Id, Vec<Listener>>,
    /// Global listeners (apply to every event id unless excluded), sorted by `order`.
    global: Vec<Listener>,
    /// Lazily-built, cache-invalidated merge of `by_event[event] ++ global`, sorted with
    /// event-specific listeners preceding global ones at equal order (SPEC_FULL §3 invariant 4).
    merged_cache: HashMap<Id, Vec<Listener>>,
    emission_interceptors: Vec<EmissionInterceptorFn>,
    hook_interceptors: Vec<HookInterceptorFn>,
}

pub type HookInterceptorFn = Arc<
    dyn Fn(Emission, NextHook) -> BoxFuture<'static, Result<(), RunnerError>> + Send + Sync,
>;

#[derive(Clone)]
pub struct NextHook(Arc<dyn Fn(Emission) -> BoxFuture<'static, Result<(), RunnerError>> + Send + Sync>);

impl NextHook {
    pub async fn call(&self, emission: Emission) -> Result<(), RunnerError> {
        (self.0)(emission).await
    }
}

/// The in-process event/interceptor bus (SPEC_FULL §4.3).
pub struct EventManager {
    state: RwLock<EventManagerState>,
    event_defs: RwLock<HashMap<Id, Arc<EventDef>>>,
    locked: std::sync::atomic::AtomicBool,
    order_seq: AtomicI64,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EventManagerState::default()),
            event_defs: RwLock::new(HashMap::new()),
            locked: std::sync::atomic::AtomicBool::new(false),
            order_seq: AtomicI64::new(0),
        }
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn check_unlocked(&self) -> Result<(), RunnerError> {
        if self.is_locked() {
            return Err(crate::domain::errors::LockError::EventManagerLocked.into());
        }
        Ok(())
    }

    pub async fn register_event(&self, def: EventDef) {
        self.event_defs.write().await.insert(def.id.clone(), Arc::new(def));
    }

    pub async fn event_def(&self, event_id: &str) -> Option<Arc<EventDef>> {
        self.event_defs.read().await.get(event_id).cloned()
    }

    /// Binary-inserts a listener for one event id, sorted by `order` (SPEC_FULL §4.3:
    /// `addListener`).
    #[instrument(skip(self, handler, filter))]
    pub async fn add_listener(
        &self,
        event_id: &Id,
        handler: ListenerFn,
        order: i64,
        filter: Option<FilterFn>,
        id: Option<String>,
    ) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        let listener = Listener {
            handler,
            order,
            filter,
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            is_global: false,
        };
        let mut state = self.state.write().await;
        let list = state.by_event.entry(event_id.clone()).or_default();
        let pos = list.partition_point(|l| l.order <= listener.order);
        list.insert(pos, listener);
        state.merged_cache.remove(event_id);
        Ok(())
    }

    /// Adds a listener that applies to every event id (SPEC_FULL §4.3: `addGlobalListener`).
    /// Invalidates every cached merge since a new global listener affects all of them.
    #[instrument(skip(self, handler, filter))]
    pub async fn add_global_listener(
        &self,
        handler: ListenerFn,
        order: i64,
        filter: Option<FilterFn>,
        id: Option<String>,
    ) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        let listener = Listener {
            handler,
            order,
            filter,
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            is_global: true,
        };
        let mut state = self.state.write().await;
        let pos = state.global.partition_point(|l| l.order <= listener.order);
        state.global.insert(pos, listener);
        state.merged_cache.clear();
        Ok(())
    }

    pub async fn intercept(&self, f: EmissionInterceptorFn) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.state.write().await.emission_interceptors.push(f);
        Ok(())
    }

    pub async fn intercept_hook(&self, f: HookInterceptorFn) -> Result<(), RunnerError> {
        self.check_unlocked()?;
        self.state.write().await.hook_interceptors.push(f);
        Ok(())
    }

    /// The next sequence number for an internal-step-id-style monotonic counter, exposed so
    /// `DurableContext` can generate deterministic implicit step ids (SPEC_FULL §4.6).
    pub fn next_order(&self) -> i64 {
        self.order_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Builds (or returns the cached) merged, ordered listener sequence for one event id:
    /// event-specific listeners merged with global listeners, sorted by `order`, ties
    /// breaking event-specific-before-global (SPEC_FULL §3 invariant 4).
    async fn merged_listeners(&self, event_id: &Id) -> Vec<Listener> {
        {
            let state = self.state.read().await;
            if let Some(cached) = state.merged_cache.get(event_id) {
                return cached.clone();
            }
        }
        let mut state = self.state.write().await;
        if let Some(cached) = state.merged_cache.get(event_id) {
            return cached.clone();
        }
        let specific = state.by_event.get(event_id).cloned().unwrap_or_default();
        let global = state.global.clone();
        let mut merged = Vec::with_capacity(specific.len() + global.len());
        let (mut i, mut j) = (0, 0);
        while i < specific.len() && j < global.len() {
            if specific[i].order <= global[j].order {
                merged.push(specific[i].clone());
                i += 1;
            } else {
                merged.push(global[j].clone());
                j += 1;
            }
        }
        merged.extend_from_slice(&specific[i..]);
        merged.extend_from_slice(&global[j..]);
        state.merged_cache.insert(event_id.clone(), merged.clone());
        merged
    }

    /// Emits an event through validation, interceptors, and listener dispatch (SPEC_FULL
    /// §4.3: `emit`). Returns the payload observed by listeners (possibly mutated by
    /// interceptors), matching `emitWithResult` semantics even for the plain `emit` path.
    #[instrument(skip(self, payload), fields(event_id = %event_id))]
    pub async fn emit(
        &self,
        event_id: &Id,
        payload: Value,
        payload_schema: Option<&SchemaFn>,
        parallel: bool,
        exclude_from_global_hooks: bool,
        source: Option<String>,
    ) -> Result<Value, RunnerError> {
        if let Some(schema) = payload_schema {
            schema(&payload).map_err(|cause| ValidationError::new(event_id.to_string(), cause))?;
        }

        let mut listeners = self.merged_listeners(event_id).await;
        if exclude_from_global_hooks {
            listeners.retain(|l| !l.is_global);
        }
        if listeners.is_empty() {
            return Ok(payload);
        }

        let tags = self
            .event_def(event_id.as_str())
            .await
            .map(|d| d.tags.clone())
            .unwrap_or_default();
        let emission = Emission::new(event_id.as_str(), payload, source.clone(), tags);

        let interceptors = self.state.read().await.emission_interceptors.clone();
        let source_for_guard = source.clone().unwrap_or_else(|| "<root>".to_string());
        let event_id_owned = event_id.clone();

        let result = cycle::guard(event_id.as_str(), &source_for_guard, move || {
            let listeners = listeners.clone();
            let interceptors = interceptors.clone();
            let event_id_owned = event_id_owned.clone();
            async move {
                dispatch_with_interceptors(event_id_owned, emission, listeners, interceptors, parallel).await
            }
        })
        .await
        .map_err(RunnerError::from)?;

        result
    }

    /// Composes hook interceptors LIFO around `hook.run(event, deps)` (SPEC_FULL §4.3:
    /// `executeHookWithInterceptors`). When the event is tagged `exclude_from_global_hooks`
    /// and runtime cycle detection is disabled, `hook.run` is called directly (SPEC_FULL §9
    /// Open Question resolution, documented in `DESIGN.md`).
    pub async fn execute_hook_with_interceptors(
        &self,
        hook_run: HookRunFn,
        emission: Emission,
        deps: ResolvedDeps,
        event_excludes_global_hooks: bool,
        runtime_cycle_detection: bool,
    ) -> Result<(), RunnerError> {
        if event_excludes_global_hooks && !runtime_cycle_detection {
            return hook_run(emission.data.clone(), deps).await.map_err(RunnerError::from);
        }

        let interceptors = self.state.read().await.hook_interceptors.clone();
        let base: Arc<dyn Fn(Emission) -> BoxFuture<'static, Result<(), RunnerError>> + Send + Sync> = {
            let hook_run = hook_run.clone();
            let deps = deps.clone();
            Arc::new(move |emission: Emission| {
                let hook_run = hook_run.clone();
                let deps = deps.clone();
                Box::pin(async move { hook_run(emission.data, deps).await.map_err(RunnerError::from) })
            })
        };

        let mut next = NextHook(base);
        for interceptor in interceptors.into_iter().rev() {
            let inner = next.clone();
            next = NextHook(Arc::new(move |emission: Emission| {
                let interceptor = interceptor.clone();
                let inner = inner.clone();
                Box::pin(async move { interceptor(emission, inner).await })
            }));
        }

        next.call(emission).await
    }
}

async fn dispatch_with_interceptors(
    event_id: Id,
    emission: Emission,
    listeners: Vec<Listener>,
    interceptors: Vec<EmissionInterceptorFn>,
    parallel: bool,
) -> Result<Value, RunnerError> {
    let source = emission.source.clone();
    let base: Arc<dyn Fn(Emission) -> BoxFuture<'static, Result<Value, RunnerError>> + Send + Sync> = {
        let listeners = listeners.clone();
        Arc::new(move |emission: Emission| {
            let listeners = listeners.clone();
            let source = source.clone();
            Box::pin(async move {
                if parallel {
                    dispatch_parallel(&listeners, emission).await
                } else {
                    dispatch_sequential(&listeners, emission, source).await
                }
            })
        })
    };

    let mut next = NextEmit(base);
    for interceptor in interceptors.into_iter().rev() {
        let inner = next.clone();
        next = NextEmit(Arc::new(move |emission: Emission| {
            let interceptor = interceptor.clone();
            let inner = inner.clone();
            Box::pin(async move { interceptor(emission, inner).await })
        }));
    }

    let _ = &event_id;
    next.call(emission).await
}

/// Sequential dispatch in `order`: skips a listener whose id equals the emission source,
/// skips listeners whose filter rejects the emission, stops once propagation is stopped
/// (SPEC_FULL §4.3).
async fn dispatch_sequential(
    listeners: &[Listener],
    emission: Emission,
    source: Option<String>,
) -> Result<Value, RunnerError> {
    for listener in listeners {
        if let Some(src) = &source {
            if &listener.id == src {
                continue;
            }
        }
        if let Some(filter) = &listener.filter {
            if !filter(&emission) {
                continue;
            }
        }
        (listener.handler)(emission.clone()).await?;
        if emission.is_propagation_stopped() {
            break;
        }
    }
    Ok(emission.data)
}

/// Parallel batch dispatch (SPEC_FULL §4.3, §8 scenario 2): listeners are grouped by
/// `order`; each group runs concurrently and the next group only starts once the previous
/// group fully settles. A throwing listener awaits the rest of its batch before surfacing
/// either the single error or an [`AggregateError`] listing every failure in that batch.
async fn dispatch_parallel(listeners: &[Listener], emission: Emission) -> Result<Value, RunnerError> {
    let mut groups: Vec<(i64, Vec<&Listener>)> = Vec::new();
    for listener in listeners {
        match groups.last_mut() {
            Some((order, group)) if *order == listener.order => group.push(listener),
            _ => groups.push((listener.order, vec![listener])),
        }
    }

    for (_, group) in groups {
        let futures = group.into_iter().map(|listener| {
            let emission = emission.clone();
            let listener = listener.clone();
            async move {
                let result = (listener.handler)(emission).await;
                (listener.id.clone(), listener.order, result)
            }
        });
        let results = futures::future::join_all(futures).await;
        let failures: Vec<AnnotatedListenerError> = results
            .into_iter()
            .filter_map(|(id, order, result)| match result {
                Ok(_) => None,
                Err(e) => Some(AnnotatedListenerError {
                    listener_id: id,
                    listener_order: order,
                    message: e.to_string(),
                }),
            })
            .collect();
        if !failures.is_empty() {
            if failures.len() == 1 {
                let only = failures.into_iter().next().unwrap();
                return Err(AggregateError::single(only).into());
            }
            return Err(AggregateError(failures).into());
        }
    }
    Ok(emission.data)
}

/// Callable handle returned when a dependency resolves to an Event definition (SPEC_FULL
/// §4.2: "Event → an emit function").
#[derive(Clone)]
pub struct EventEmitter {
    manager: Arc<EventManager>,
    event_id: Id,
}

impl EventEmitter {
    pub fn new(manager: Arc<EventManager>, event_id: Id) -> Self {
        Self { manager, event_id }
    }

    pub async fn emit(&self, payload: Value, source: Option<String>) -> Result<(), RunnerError> {
        let def = self.manager.event_def(self.event_id.as_str()).await;
        let (schema, parallel, excludes) = match &def {
            Some(d) => (d.payload_schema.clone(), d.parallel, d.excludes_global_hooks()),
            None => (None, false, false),
        };
        self.manager
            .emit(&self.event_id, payload, schema.as_ref(), parallel, excludes, source)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(calls: Arc<tokio::sync::Mutex<Vec<String>>>, name: &'static str) -> ListenerFn {
        Arc::new(move |emission: Emission| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.lock().await.push(name.to_string());
                Ok(emission.data)
            })
        })
    }

    #[tokio::test]
    async fn ordered_listeners_run_low_order_first() {
        let mgr = EventManager::new();
        let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        mgr.add_listener(&"evt.e".into(), handler(calls.clone(), "L1"), 2, None, Some("L1".into()))
            .await
            .unwrap();
        mgr.add_listener(&"evt.e".into(), handler(calls.clone(), "L2"), 1, None, Some("L2".into()))
            .await
            .unwrap();

        mgr.emit(&"evt.e".into(), serde_json::json!("x"), None, false, false, None)
            .await
            .unwrap();

        assert_eq!(*calls.lock().await, vec!["L2", "L1"]);
    }

    #[tokio::test]
    async fn event_specific_precedes_global_at_equal_order() {
        let mgr = EventManager::new();
        let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        mgr.add_global_listener(handler(calls.clone(), "global"), 0, None, Some("global".into()))
            .await
            .unwrap();
        mgr.add_listener(&"evt.e".into(), handler(calls.clone(), "specific"), 0, None, Some("specific".into()))
            .await
            .unwrap();

        mgr.emit(&"evt.e".into(), serde_json::json!("x"), None, false, false, None)
            .await
            .unwrap();

        assert_eq!(*calls.lock().await, vec!["specific", "global"]);
    }

    #[tokio::test]
    async fn parallel_batch_stops_later_batches_on_failure() {
        let mgr = EventManager::new();
        let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let failing: ListenerFn = Arc::new(|_emission| {
            Box::pin(async move {
                Err(crate::domain::errors::RuntimeError {
                    kind: crate::domain::errors::RuntimeErrorKind::Hook,
                    source_id: "L_throw".into(),
                    message: "boom".into(),
                }
                .into())
            })
        });
        let slow = handler(calls.clone(), "L_slow");
        let next_batch = handler(calls.clone(), "L_next");

        mgr.add_listener(&"evt.p".into(), failing, 0, None, Some("L_throw".into())).await.unwrap();
        mgr.add_listener(&"evt.p".into(), slow, 0, None, Some("L_slow".into())).await.unwrap();
        mgr.add_listener(&"evt.p".into(), next_batch, 1, None, Some("L_next".into())).await.unwrap();

        let result = mgr
            .emit(&"evt.p".into(), serde_json::json!("x"), None, true, false, None)
            .await;

        assert!(result.is_err());
        assert!(!calls.lock().await.contains(&"L_next".to_string()));
        assert!(calls.lock().await.contains(&"L_slow".to_string()));
    }

    #[tokio::test]
    async fn locked_manager_rejects_new_listeners() {
        let mgr = EventManager::new();
        mgr.lock();
        let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let err = mgr
            .add_listener(&"evt.e".into(), handler(calls, "x"), 0, None, None)
            .await;
        assert!(err.is_err());
    }
}
