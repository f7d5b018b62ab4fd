//! Structural delta between persisted state and desired configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The change to a single flat attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDiff {
    pub old: String,
    pub new: String,
    /// The new value is only known after apply.
    #[serde(default)]
    pub new_computed: bool,
    /// The attribute is removed.
    #[serde(default)]
    pub new_removed: bool,
    /// Changing this attribute requires replacing the resource.
    #[serde(default)]
    pub requires_new: bool,
}

impl AttrDiff {
    /// An ordinary value change.
    pub fn change(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            ..Self::default()
        }
    }

    /// A value that will be computed during apply.
    pub fn computed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_computed: true,
            ..Self::default()
        }
    }

    /// Removal of a previously persisted value.
    pub fn removed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_removed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_requires_new(mut self, requires_new: bool) -> Self {
        self.requires_new = requires_new;
        self
    }
}

/// Per-attribute changes keyed by flat attribute key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub attributes: BTreeMap<String, AttrDiff>,
    /// Set by orchestration to request deletion of the resource.
    #[serde(default)]
    pub destroy: bool,
}

impl ResourceDiff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a diff from `(key, change)` pairs.
    pub fn from_attributes<I, K>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, AttrDiff)>,
        K: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            destroy: false,
        }
    }

    /// A diff requesting only destruction.
    #[must_use]
    pub fn for_destroy() -> Self {
        Self {
            attributes: BTreeMap::new(),
            destroy: true,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, change: AttrDiff) {
        self.attributes.insert(key.into(), change);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrDiff> {
        self.attributes.get(key)
    }

    /// True if any attribute change forces replacement.
    #[must_use]
    pub fn requires_new(&self) -> bool {
        self.attributes.values().any(|a| a.requires_new)
    }

    /// True if there is nothing to change and nothing to destroy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && !self.destroy
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }
}
