//! Ties the Registry, EventManager and TaskRunner/ResourceInitializer together behind one
//! handle that dependency resolution, task execution, and the durable engine all share.
//! Grounded on how the teacher wires `Arc<T: TaskRepository>`/`Arc<EventBus>` together inside
//! `WorkflowEngine<T>` and the various `*Service` structs in `src/services/`.

use std::sync::Arc;

use tracing::error;

use crate::domain::errors::{RuntimeError, RuntimeErrorKind};
use crate::domain::ids::Id;
use crate::events::manager::EventManager;
use crate::middleware::manager::MiddlewareManager;
use crate::registry::Registry;

/// A structured record of an unhandled error, reported exactly once per failure
/// (SPEC_FULL §4.1, §7: "an unhandled-error reporter (pluggable) receives structured
/// `{error, kind, source}` records").
#[derive(Debug, Clone)]
pub struct ReportedError {
    pub kind: RuntimeErrorKind,
    pub source_id: String,
    pub message: String,
}

pub type ErrorReporter = dyn Fn(&ReportedError) + Send + Sync;

fn default_reporter(err: &ReportedError) {
    error!(kind = %err.kind, source = %err.source_id, message = %err.message, "unhandled error");
}

/// The shared runtime handle. Cheaply cloneable (every field is an `Arc`); resource
/// initialization, task execution, and event emission all go through one `Engine`.
#[derive(Clone)]
pub struct Engine {
    pub registry: Arc<Registry>,
    pub events: Arc<EventManager>,
    pub middleware: Arc<MiddlewareManager>,
    pub reporter: Arc<ErrorReporter>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, events: Arc<EventManager>) -> Self {
        Self {
            registry,
            events,
            middleware: Arc::new(MiddlewareManager::new()),
            reporter: Arc::new(default_reporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn report(&self, kind: RuntimeErrorKind, source_id: impl Into<String>, message: impl Into<String>) {
        (self.reporter)(&ReportedError {
            kind,
            source_id: source_id.into(),
            message: message.into(),
        });
    }

    /// Returns a resource's initialized value, force-initializing it through
    /// [`crate::middleware::manager::ResourceInitializer`] if needed (SPEC_FULL §4.2:
    /// "Resource → its initialized value (triggering init if not yet initialized)").
    pub async fn resource_value(&self, id: &Id) -> Result<serde_json::Value, RuntimeError> {
        if let Some(v) = self.registry.resource_value(id.as_str()).await {
            return Ok(v);
        }
        crate::middleware::manager::ResourceInitializer::force_init(self, id).await
    }
}
