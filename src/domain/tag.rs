//! Tags: typed markers attached to tasks/resources/events/middlewares/hooks, and the
//! frozen-snapshot accessor used to discover everything carrying a given tag at runtime.

use std::collections::HashMap;

use serde_json::Value;

use super::ids::Id;

/// A tag definition. `config_schema` is a validator over the per-attachment config value
/// (e.g. `@tag(retryable, {max: 3})`); absent when the tag carries no config contract.
#[derive(Clone)]
pub struct TagDef {
    pub id: Id,
}

impl TagDef {
    pub fn new(id: impl Into<Id>) -> Self {
        Self { id: id.into() }
    }
}

/// One definition carrying a tag, with whatever config was attached at that call site.
#[derive(Clone, Debug)]
pub struct TaggedMember {
    pub id: Id,
    pub config: Option<Value>,
}

/// A frozen snapshot of every definition carrying one tag, grouped by kind. Built lazily by
/// the Registry and cached per consumer (SPEC_FULL §4.2); re-fetching after boot always
/// yields the same content since the Registry is locked by then.
#[derive(Clone, Debug, Default)]
pub struct TagAccessor {
    pub tasks: Vec<TaggedMember>,
    pub resources: Vec<TaggedMember>,
    pub events: Vec<TaggedMember>,
    pub hooks: Vec<TaggedMember>,
    pub task_middlewares: Vec<TaggedMember>,
    pub resource_middlewares: Vec<TaggedMember>,
    pub errors: Vec<TaggedMember>,
}

impl TagAccessor {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.resources.is_empty()
            && self.events.is_empty()
            && self.hooks.is_empty()
            && self.task_middlewares.is_empty()
            && self.resource_middlewares.is_empty()
            && self.errors.is_empty()
    }
}

/// Index from tag id to every tagged member, computed once at boot (SPEC_FULL §4.1: "attaches
/// each tag's member index").
#[derive(Default)]
pub struct TagIndex {
    accessors: HashMap<Id, TagAccessor>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accessor(&self, tag_id: &str) -> TagAccessor {
        self.accessors.get(tag_id).cloned().unwrap_or_default()
    }

    pub fn add_task(&mut self, tag: &Id, task_id: &Id, config: Option<Value>) {
        self.entry(tag).tasks.push(TaggedMember {
            id: task_id.clone(),
            config,
        });
    }

    pub fn add_resource(&mut self, tag: &Id, resource_id: &Id, config: Option<Value>) {
        self.entry(tag).resources.push(TaggedMember {
            id: resource_id.clone(),
            config,
        });
    }

    pub fn add_event(&mut self, tag: &Id, event_id: &Id, config: Option<Value>) {
        self.entry(tag).events.push(TaggedMember {
            id: event_id.clone(),
            config,
        });
    }

    pub fn add_hook(&mut self, tag: &Id, hook_id: &Id, config: Option<Value>) {
        self.entry(tag).hooks.push(TaggedMember {
            id: hook_id.clone(),
            config,
        });
    }

    pub fn add_task_middleware(&mut self, tag: &Id, id: &Id, config: Option<Value>) {
        self.entry(tag).task_middlewares.push(TaggedMember {
            id: id.clone(),
            config,
        });
    }

    pub fn add_resource_middleware(&mut self, tag: &Id, id: &Id, config: Option<Value>) {
        self.entry(tag).resource_middlewares.push(TaggedMember {
            id: id.clone(),
            config,
        });
    }

    pub fn add_error(&mut self, tag: &Id, error_id: &Id, config: Option<Value>) {
        self.entry(tag).errors.push(TaggedMember {
            id: error_id.clone(),
            config,
        });
    }

    fn entry(&mut self, tag: &Id) -> &mut TagAccessor {
        self.accessors.entry(tag.clone()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessor_groups_members_by_kind() {
        let mut idx = TagIndex::new();
        let retryable: Id = "retryable".into();
        idx.add_task(&retryable, &"task.a".into(), None);
        idx.add_resource(&retryable, &"resource.db".into(), Some(serde_json::json!({"x":1})));

        let accessor = idx.accessor("retryable");
        assert_eq!(accessor.tasks.len(), 1);
        assert_eq!(accessor.resources.len(), 1);
        assert!(accessor.events.is_empty());
    }

    #[test]
    fn unknown_tag_returns_empty_accessor() {
        let idx = TagIndex::new();
        assert!(idx.accessor("nonexistent").is_empty());
    }
}
