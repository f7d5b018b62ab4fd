//! Desired configuration as produced by an external evaluator.

use crate::value::Value;
use crate::{Error, Result, key_within};
use std::collections::{BTreeMap, BTreeSet};

/// A hierarchical configuration tree for one resource.
///
/// Paths are dotted (`ingress.0.from`). A path can be marked unknown when
/// the evaluator cannot compute its value yet; every path below an unknown
/// path is unknown too.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceConfig {
    raw: BTreeMap<String, Value>,
    unknown: BTreeSet<String>,
}

impl ResourceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config from top-level field values.
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            raw: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            unknown: BTreeSet::new(),
        }
    }

    /// Parses a JSON object into a config. Top-level nulls are omitted.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: serde_json::Value = serde_json::from_str(json)?;
        match Value::from_json(&doc) {
            Some(Value::Map(raw)) => Ok(Self {
                raw,
                unknown: BTreeSet::new(),
            }),
            Some(other) => Err(Error::config(
                "",
                format!("configuration must be an object, got {}", other.type_name()),
            )),
            None => Ok(Self::new()),
        }
    }

    /// Sets a top-level field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }

    /// Marks a dotted path as not yet computable.
    #[must_use]
    pub fn with_unknown(mut self, path: impl Into<String>) -> Self {
        self.mark_unknown(path);
        self
    }

    pub fn mark_unknown(&mut self, path: impl Into<String>) {
        self.unknown.insert(path.into());
    }

    /// Top-level values.
    #[must_use]
    pub fn raw(&self) -> &BTreeMap<String, Value> {
        &self.raw
    }

    /// Returns true if the path or one of its ancestors is unknown.
    #[must_use]
    pub fn is_unknown(&self, path: &str) -> bool {
        self.unknown.iter().any(|u| key_within(path, u))
    }

    /// Returns true if any unknown path lies at or below `path`.
    #[must_use]
    pub fn has_unknown_below(&self, path: &str) -> bool {
        self.unknown.iter().any(|u| key_within(u, path))
    }

    /// Looks up a dotted path.
    ///
    /// Maps and objects are indexed by key, lists and sets by position.
    /// Unknown paths return `None`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() || self.is_unknown(path) {
            return None;
        }
        let mut parts = path.split('.');
        let mut current = self.raw.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Map(entries) | Value::Object(entries) => entries.get(part)?,
                Value::List(items) => items.get(part.parse::<usize>().ok()?)?,
                Value::Set(set) => set.get_index(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// True if the path has a value or is marked unknown.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.is_unknown(path) || self.get(path).is_some()
    }
}
