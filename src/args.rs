//! Assigned argument values for a single variant.
//!
//! `Args` is an ordered map from argument name to value. Order always follows
//! template declaration order, and while a variant is being built it only ever
//! holds the already fixed prefix, so a dependent template can never observe an
//! argument declared after it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{TemplateError, TemplateResult};

/// Bounds every argument value type must satisfy.
///
/// Values are cloned into snapshots handed to worker threads, compared when a
/// saved variant is replayed, and formatted in progress logs.
pub trait ArgValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> ArgValue for T where T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Ordered argument name to value map
#[derive(Clone, PartialEq)]
pub struct Args<V> {
    entries: Vec<(Arc<str>, V)>,
}

impl<V> Args<V> {
    /// Create an empty argument map
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Number of assigned arguments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an assigned value by name
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value)
    }

    /// Look up an assigned value, failing with the requested name when it is
    /// not (yet) assigned.
    ///
    /// Dependent templates use this through `?` so that a request for a later
    /// argument surfaces as a descriptive [`TemplateError`].
    pub fn value(&self, name: &str) -> TemplateResult<&V> {
        self.get(name).ok_or_else(|| TemplateError::UnassignedArgument {
            requested: name.to_string(),
            assigned: self.names().map(str::to_string).collect(),
        })
    }

    /// Iterate `(name, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(key, value)| (key.as_ref(), value))
    }

    /// Iterate the assigned names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_ref())
    }

    /// Iterate the assigned values in declaration order
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub(crate) fn push(&mut self, name: Arc<str>, value: V) {
        self.entries.push((name, value));
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<V: Clone> Args<V> {
    /// Copy the values into an unordered map keyed by name
    pub fn to_map(&self) -> HashMap<String, V> {
        self.entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }
}

impl<V> Default for Args<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for Args<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, value)| (key.as_ref(), value)))
            .finish()
    }
}

impl<V: Serialize> Serialize for Args<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key.as_ref(), value)?;
        }
        map.end()
    }
}

impl<'a, V> IntoIterator for &'a Args<V> {
    type Item = (&'a str, &'a V);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a V)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Args<i32> {
        let mut args = Args::new();
        args.push(Arc::from("a"), 1);
        args.push(Arc::from("b"), 2);
        args
    }

    #[test]
    fn lookup_follows_declaration_order() {
        let args = sample();
        assert_eq!(args.get("b"), Some(&2));
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(args.values().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn value_reports_the_missing_name() {
        let args = sample();
        match args.value("c") {
            Err(TemplateError::UnassignedArgument { requested, assigned }) => {
                assert_eq!(requested, "c");
                assert_eq!(assigned, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn truncate_drops_the_suffix() {
        let mut args = sample();
        args.truncate(1);
        assert_eq!(args.len(), 1);
        assert!(args.get("b").is_none());
    }

    #[test]
    fn serializes_as_an_ordered_object() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, r#"{"a":1,"b":2}"#);
    }
}
