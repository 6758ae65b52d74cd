//! Globally unique string identifiers shared by every definition kind.

use std::fmt;
use std::sync::Arc;

/// A cheaply-cloneable interned-style id. Every definition (task, resource, event, hook,
/// middleware, tag, error, async context) is addressed by one of these; uniqueness across
/// all definitions in a runtime is enforced by the [`crate::registry::Registry`], not by the
/// type itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(Arc<str>);

impl Id {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::borrow::Borrow<str> for Id {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_compare_by_value() {
        let a = Id::new("task.a");
        let b = Id::from("task.a");
        assert_eq!(a, b);
    }

    #[test]
    fn ids_display_as_their_string() {
        let id = Id::new("resource.db");
        assert_eq!(id.to_string(), "resource.db");
    }

    #[test]
    fn ids_usable_as_hashmap_keys_borrowed_by_str() {
        use std::collections::HashMap;
        let mut map: HashMap<Id, i32> = HashMap::new();
        map.insert(Id::new("x"), 1);
        assert_eq!(map.get("x"), Some(&1));
    }
}
