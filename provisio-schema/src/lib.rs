//! Schema model for provisio.
//!
//! Defines how a resource's fields are typed and how their values map onto
//! the flat attribute representation that state backends persist:
//! - [`Schema`] / [`Resource`]: declarative, immutable field descriptions
//! - [`coerce`]: schema-directed conversion of untyped [`Value`]s
//! - [`flatmap`]: the bidirectional nested-value to flat-map codec
//! - [`hash`]: canonical serialization used to hash nested set elements
//!
//! Schemas are built once per resource type and shared by reference
//! (`Arc<Resource>`) for the life of the process. Nothing here mutates a
//! schema after construction.
//!
//! [`Value`]: provisio_types::Value

pub mod coerce;
pub mod flatmap;
pub mod hash;
mod schema;
mod validate;

pub use coerce::{Mode, coerce};
pub use flatmap::FlatMap;
pub use provisio_types::{Error, Result};
pub use schema::{Elem, Resource, Schema, StateFn, ValueType};
