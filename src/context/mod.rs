//! `AsyncContext<T>`: task-local context provision, nested and concurrent-safe (SPEC_FULL
//! §4.5). Grounded on `tokio::task_local!`'s propagate-across-awaits guarantee; the teacher
//! has no literal precedent for this (documented in `DESIGN.md`'s Open Question entry), so
//! this follows the idiom `tokio::task_local!` itself is designed around: scoped provide,
//! fallible `use()`.
//!
//! A single task-local slot holds a map keyed by context id rather than one slot per
//! `AsyncContext<T>` instance, so independently-created contexts (e.g. a request-id context
//! and a tenant context) can be bound at the same time without colliding, while nested
//! `provide` calls for the *same* context id still shadow and restore correctly.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::ContextError;

type Bindings = HashMap<String, Arc<dyn Any + Send + Sync>>;

tokio::task_local! {
    static CURRENT: Bindings;
}

/// A typed async context, identified by a stable id (SPEC_FULL §4.5: `createContext<T>()`).
#[derive(Clone, Debug)]
pub struct AsyncContext<T> {
    pub id: String,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> AsyncContext<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Runs `body` with `value` bound as the current value for this context's id. Existing
    /// bindings for other context ids remain visible; a prior binding for the *same* id is
    /// shadowed for the duration of `body` and restored afterward.
    pub async fn provide<F, Fut, R>(&self, value: T, body: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let mut next: Bindings = if CURRENT.is_set() {
            CURRENT.with(Clone::clone)
        } else {
            HashMap::new()
        };
        next.insert(self.id.clone(), Arc::new(value));
        CURRENT.scope(next, body()).await
    }

    /// Returns the current bound value, or [`ContextError`] if `use()` is called outside a
    /// `provide` scope for this context's id (SPEC_FULL §4.5).
    pub fn use_context(&self) -> Result<Arc<T>, ContextError> {
        if !CURRENT.is_set() {
            return Err(ContextError(self.id.clone()));
        }
        CURRENT.with(|bindings| {
            bindings
                .get(&self.id)
                .cloned()
                .ok_or_else(|| ContextError(self.id.clone()))
                .and_then(|v| v.downcast::<T>().map_err(|_| ContextError(self.id.clone())))
        })
    }

    /// `true` if this context is currently bound (used by the `require()` task-middleware,
    /// SPEC_FULL §4.5).
    pub fn is_provided(&self) -> bool {
        CURRENT.is_set() && CURRENT.with(|b| b.contains_key(&self.id))
    }
}

/// `true` if some [`AsyncContext`] with this id is currently bound, without needing to
/// know `T`. Backs the `require()` task-middleware (SPEC_FULL §4.5): a middleware wrapping
/// a task can check `context::is_bound("ctx.tenant")` before calling `next()`.
pub fn is_bound(context_id: &str) -> bool {
    CURRENT.is_set() && CURRENT.with(|b| b.contains_key(context_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provide_then_use_returns_the_value() {
        let ctx: AsyncContext<i32> = AsyncContext::new("ctx.counter");
        let out = ctx
            .provide(42, || async { ctx.use_context().map(|v| *v) })
            .await
            .unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn use_outside_provide_fails() {
        let ctx: AsyncContext<i32> = AsyncContext::new("ctx.counter");
        assert!(ctx.use_context().is_err());
    }

    #[tokio::test]
    async fn nested_provide_shadows_then_restores() {
        let ctx: AsyncContext<i32> = AsyncContext::new("ctx.counter");
        let (inner, outer_after) = ctx
            .provide(1, || async {
                let inner = ctx.provide(2, || async { ctx.use_context().map(|v| *v) }).await.unwrap();
                let outer_after = ctx.use_context().map(|v| *v).unwrap();
                (inner, outer_after)
            })
            .await;
        assert_eq!(inner, 2);
        assert_eq!(outer_after, 1);
    }

    #[tokio::test]
    async fn distinct_contexts_coexist() {
        let request_id: AsyncContext<String> = AsyncContext::new("ctx.request_id");
        let tenant: AsyncContext<i32> = AsyncContext::new("ctx.tenant");

        let (rid, tid) = request_id
            .provide("req-1".to_string(), || async {
                tenant
                    .provide(7, || async {
                        (request_id.use_context().unwrap().to_string(), *tenant.use_context().unwrap())
                    })
                    .await
            })
            .await;
        assert_eq!(rid, "req-1");
        assert_eq!(tid, 7);
    }

    #[tokio::test]
    async fn concurrent_branches_stay_isolated() {
        let ctx: AsyncContext<i32> = AsyncContext::new("ctx.counter");
        let a = ctx.provide(10, || async { ctx.use_context().map(|v| *v) });
        let b = ctx.provide(20, || async { ctx.use_context().map(|v| *v) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 10);
        assert_eq!(b.unwrap(), 20);
    }
}
