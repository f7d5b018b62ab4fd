//! Reconciliation engine for provisio.
//!
//! Three pieces sit on top of the schema model:
//! - [`diff()`]: compares persisted state with desired configuration
//! - [`ResourceData`]: the layered accessor CRUD handlers read and write
//! - [`ManagedResource`]: runs a [`ResourceHandler`] through apply and refresh
//!
//! Everything here is synchronous and performs no I/O. A `ResourceData` is
//! owned by a single reconciliation pass; schemas are shared read-only.

mod data;
mod diff;
mod error;
mod lifecycle;

pub use data::ResourceData;
pub use diff::diff;
pub use error::{LifecycleError, OperationError};
pub use lifecycle::{ManagedResource, ResourceHandler};
pub use provisio_types::{Error, Result};
