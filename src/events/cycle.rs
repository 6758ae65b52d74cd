//! Runtime re-emission cycle detection (SPEC_FULL §4.3, §9).
//!
//! An async-local stack records `(event id, source)` frames across emit/listener
//! boundaries, the same "chain depth" tracking idea as the teacher's
//! `EventReactor::replay_missed_events` chain-depth guard in
//! `services/event_reactor.rs`, generalized from a depth counter to a full frame stack
//! so a re-emit can be attributed to the source that pushed it.

use std::cell::RefCell;

use crate::domain::errors::CycleError;

#[derive(Clone, Debug)]
struct Frame {
    event_id: String,
    source: String,
}

tokio::task_local! {
    static STACK: RefCell<Vec<Frame>>;
}

/// Runs `body` with `(event_id, source)` pushed onto the current task's emission stack,
/// failing with [`CycleError`] if `event_id` is already on the stack from a different
/// source (SPEC_FULL §4.3: "A re-emit of event E while E is already on the stack, from a
/// source other than the one that last pushed E, throws").
pub async fn guard<F, Fut, T>(event_id: &str, source: &str, body: F) -> Result<T, CycleError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    if !STACK.is_set() {
        let cell = RefCell::new(Vec::new());
        let out = STACK.scope(cell, push_and_run(event_id, source, body)).await;
        return Ok(out);
    }

    let conflict = STACK.with(|s| {
        s.borrow()
            .iter()
            .rev()
            .find(|f| f.event_id == event_id)
            .map(|f| f.source.clone())
    });
    if let Some(last_source) = conflict {
        if last_source != source {
            return Err(CycleError {
                event_id: event_id.to_string(),
                source: source.to_string(),
            });
        }
    }

    STACK.with(|s| {
        s.borrow_mut().push(Frame {
            event_id: event_id.to_string(),
            source: source.to_string(),
        })
    });
    let out = body().await;
    STACK.with(|s| {
        s.borrow_mut().pop();
    });
    Ok(out)
}

async fn push_and_run<F, Fut, T>(event_id: &str, source: &str, body: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    STACK.with(|s| {
        s.borrow_mut().push(Frame {
            event_id: event_id.to_string(),
            source: source.to_string(),
        })
    });
    let out = body().await;
    STACK.with(|s| {
        s.borrow_mut().pop();
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_reemission_from_same_source() {
        let result = guard("evt.a", "hook.x", || async {
            guard("evt.a", "hook.x", || async { 1 }).await
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_reemission_from_different_source() {
        let result = guard("evt.a", "hook.x", || async {
            guard("evt.a", "hook.y", || async { 1 }).await
        })
        .await
        .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unrelated_events_do_not_conflict() {
        let result = guard("evt.a", "hook.x", || async {
            guard("evt.b", "hook.y", || async { 1 }).await
        })
        .await
        .unwrap();
        assert!(result.is_ok());
    }
}
