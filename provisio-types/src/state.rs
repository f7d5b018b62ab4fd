//! Persisted resource state.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Meta key holding the schema version the state was written with.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// A reference to another resource this one depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDependency {
    pub id: String,
}

impl ResourceDependency {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Snapshot of a resource as persisted by a state backend.
///
/// An empty `id` means the resource does not exist; such a state carries no
/// attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: String,
    /// Flat attribute map, see `provisio_schema::flatmap`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Connection info for provisioners.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conn_info: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ResourceDependency>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl ResourceState {
    /// Creates a state with the given id and no attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Creates a state from flat attribute pairs.
    pub fn with_attributes<I, K, V>(id: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// True when the resource does not exist.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.id.is_empty()
    }

    /// Schema version recorded in `meta`, or 0 if absent or unparsable.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.meta
            .get(SCHEMA_VERSION_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
