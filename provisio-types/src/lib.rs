//! Core type definitions for provisio.
//!
//! This crate defines the schema-independent types that every other crate in
//! the workspace exchanges:
//! - [`Value`]: the tagged value carrier for resolved attribute values
//! - [`Set`]: the hash-identity unordered collection
//! - [`ResourceState`]: the persisted snapshot (id + flat attribute map)
//! - [`ResourceConfig`]: the desired configuration tree from an evaluator
//! - [`ResourceDiff`] / [`AttrDiff`]: the per-attribute structural delta
//!
//! The flat attribute map inside [`ResourceState`] is the persisted wire
//! format. It is a plain `BTreeMap<String, String>` so that storage backends
//! round-trip it byte-for-byte.

mod config;
mod diff;
pub mod hashcode;
mod set;
mod state;
mod value;

pub use config::ResourceConfig;
pub use diff::{AttrDiff, ResourceDiff};
pub use set::{Set, SetHashFn};
pub use state::{ResourceDependency, ResourceState, SCHEMA_VERSION_KEY};
pub use value::Value;

/// True if `key` is `prefix` itself or a dotted path below it.
///
/// `ports.0` is within `ports`; `ports_extra` is not.
#[must_use]
pub fn key_within(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => prefix.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the schema, codec, diff and accessor layers.
///
/// Every error carries the dotted key path it concerns. Nothing in the
/// engine retries; errors go straight back to the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The schema is malformed, or the configuration violates it.
    #[error("{key}: {message}")]
    Validation { key: String, message: String },

    /// A configuration or persisted value cannot be coerced to its type.
    #[error("{key}: invalid value: {message}")]
    Config { key: String, message: String },

    /// Persisted attributes are structurally inconsistent with the schema.
    #[error("{key}: malformed state: {message}")]
    Diff { key: String, message: String },

    /// A value written through the accessor does not fit the field type.
    #[error("{key}: expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The key path does not exist in the schema.
    #[error("{key}: unknown key")]
    UnknownKey { key: String },

    /// JSON (de)serialization of state or config failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn diff(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Diff {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(key: impl Into<String>, expected: &'static str, actual: &'static str) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            expected,
            actual,
        }
    }

    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    /// Returns the key path this error refers to, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Validation { key, .. }
            | Self::Config { key, .. }
            | Self::Diff { key, .. }
            | Self::TypeMismatch { key, .. }
            | Self::UnknownKey { key } => Some(key),
            Self::Serialization(_) => None,
        }
    }
}
