//! Resource lifecycle: apply a diff, refresh a state.

use crate::data::ResourceData;
use crate::diff;
use crate::error::{LifecycleError, OperationError};
use provisio_schema::Resource;
use provisio_types::{Error, ResourceConfig, ResourceDiff, ResourceState, SCHEMA_VERSION_KEY};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CRUD operations of one resource type.
///
/// `M` is whatever the provider hands every operation, typically an API
/// client. Operations report what they did through the [`ResourceData`]:
/// the id, computed attributes, and partial progress on failure.
pub trait ResourceHandler<M: ?Sized>: Send + Sync {
    /// Creates the resource. Must set the id on success.
    fn create(&self, data: &mut ResourceData, meta: &M) -> anyhow::Result<()>;

    /// Reads the remote resource into `data`. Clearing the id reports the
    /// resource as gone.
    fn read(&self, data: &mut ResourceData, meta: &M) -> anyhow::Result<()>;

    /// Updates the resource in place.
    ///
    /// Resources without an update can only change through replacement.
    fn update(&self, data: &mut ResourceData, meta: &M) -> anyhow::Result<()> {
        let _ = (data, meta);
        Err(LifecycleError::UpdateUnsupported.into())
    }

    fn delete(&self, data: &mut ResourceData, meta: &M) -> anyhow::Result<()>;

    /// Checks whether the resource still exists. Must not modify `data`.
    fn exists(&self, data: &ResourceData, meta: &M) -> anyhow::Result<bool> {
        let _ = (data, meta);
        Ok(true)
    }

    /// Upgrades a state written with schema version `from`.
    fn migrate_state(&self, from: u32, state: ResourceState, meta: &M) -> anyhow::Result<ResourceState> {
        let _ = (from, meta);
        Ok(state)
    }
}

/// A resource schema bound to its handler.
pub struct ManagedResource<H> {
    resource: Arc<Resource>,
    handler: H,
}

impl<H> ManagedResource<H> {
    pub fn new(resource: impl Into<Arc<Resource>>, handler: H) -> Self {
        Self {
            resource: resource.into(),
            handler,
        }
    }

    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Checks that the schema is well formed.
    pub fn internal_validate(&self) -> provisio_types::Result<()> {
        self.resource.internal_validate()
    }

    /// Validates a configuration; returns `(warnings, errors)`.
    #[must_use]
    pub fn validate(&self, config: &ResourceConfig) -> (Vec<String>, Vec<Error>) {
        self.resource.validate(config)
    }

    pub fn diff(
        &self,
        state: Option<&ResourceState>,
        config: &ResourceConfig,
    ) -> provisio_types::Result<Option<ResourceDiff>> {
        diff::diff(&self.resource, state, config)
    }

    /// Carries out `diff`: destroys, creates or updates the resource.
    ///
    /// A diff with `destroy` set only deletes. A diff that requires
    /// replacement deletes the existing resource and creates a new one
    /// from scratch. Returns the new state, or `None` once the resource is
    /// gone.
    pub fn apply<M: ?Sized>(
        &self,
        state: Option<&ResourceState>,
        diff: &ResourceDiff,
        meta: &M,
    ) -> Result<Option<ResourceState>, OperationError>
    where
        H: ResourceHandler<M>,
    {
        let prior = state.cloned();
        let mut data = ResourceData::new(Arc::clone(&self.resource), prior.clone(), Some(diff.clone()));
        let exists = prior.as_ref().is_some_and(|s| !s.is_destroyed());

        if diff.destroy || diff.requires_new() {
            if exists {
                info!(id = %data.id(), replace = diff.requires_new(), "destroying resource");
                if let Err(err) = self.handler.delete(&mut data, meta) {
                    return Err(self.failure(&data, err));
                }
                data.set_id("");
            }
            if !diff.requires_new() {
                return Ok(None);
            }
            data = ResourceData::new(Arc::clone(&self.resource), None, Some(diff.clone()));
        }

        let result = if data.id().is_empty() {
            info!("creating resource");
            self.handler.create(&mut data, meta)
        } else {
            info!(id = %data.id(), "updating resource");
            self.handler.update(&mut data, meta)
        };
        if let Err(err) = result {
            return Err(self.failure(&data, err));
        }

        let state = data.state().map_err(|err| OperationError::new(prior, err))?;
        Ok(state.map(|s| self.stamp_version(s)))
    }

    /// Reads the current remote state of the resource.
    ///
    /// States written with an older schema version are migrated first.
    /// Returns `None` when the resource no longer exists.
    pub fn refresh<M: ?Sized>(&self, state: &ResourceState, meta: &M) -> Result<Option<ResourceState>, OperationError>
    where
        H: ResourceHandler<M>,
    {
        let check = ResourceData::new(Arc::clone(&self.resource), Some(state.clone()), None);
        match self.handler.exists(&check, meta) {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %state.id, "resource no longer exists");
                return Ok(None);
            }
            Err(err) => return Err(OperationError::new(Some(state.clone()), handler_error(err))),
        }

        let mut state = state.clone();
        let stored = state.schema_version();
        if stored < self.resource.schema_version {
            info!(id = %state.id, from = stored, to = self.resource.schema_version, "migrating state");
            state = match self.handler.migrate_state(stored, state.clone(), meta) {
                Ok(migrated) => migrated,
                Err(err) => return Err(OperationError::new(Some(state), handler_error(err))),
            };
        }

        let mut data = ResourceData::new(Arc::clone(&self.resource), Some(state), None);
        if let Err(err) = self.handler.read(&mut data, meta) {
            return Err(self.failure(&data, err));
        }
        let refreshed = data.state().map_err(|err| OperationError::new(None, err))?;
        Ok(refreshed.map(|s| self.stamp_version(s)))
    }

    fn failure(&self, data: &ResourceData, err: anyhow::Error) -> OperationError {
        let mut failure = OperationError::new(None, handler_error(err));
        match data.state() {
            Ok(state) => failure.state = state.map(|s| self.stamp_version(s)),
            Err(snapshot) => {
                warn!(id = %data.id(), error = %snapshot, "state after handler failure could not be built");
                failure.snapshot_error = Some(snapshot);
            }
        }
        failure
    }

    fn stamp_version(&self, mut state: ResourceState) -> ResourceState {
        if self.resource.schema_version > 0 {
            state
                .meta
                .insert(SCHEMA_VERSION_KEY.to_string(), self.resource.schema_version.to_string());
        }
        state
    }
}

/// Recovers engine and lifecycle errors passed through a handler.
fn handler_error(err: anyhow::Error) -> LifecycleError {
    let err = match err.downcast::<LifecycleError>() {
        Ok(lifecycle) => return lifecycle,
        Err(err) => err,
    };
    match err.downcast::<Error>() {
        Ok(engine) => LifecycleError::Engine(engine),
        Err(err) => LifecycleError::Handler(err),
    }
}
