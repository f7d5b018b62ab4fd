//! Shared fixtures for engine tests.

#![allow(dead_code)]

use provisio_engine::ResourceData;
use provisio_schema::flatmap::FlatMap;
use provisio_schema::{Resource, Schema, ValueType};
use provisio_types::{Value, hashcode};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber once; `RUST_LOG=provisio_engine=trace` shows
/// the engine's events.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn flat(pairs: &[(&str, &str)]) -> FlatMap {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

pub fn int_set_schema() -> Schema {
    Schema::set(ValueType::Int).with_hash(|v| v.as_int().unwrap_or(0))
}

pub fn int_set(values: &[i64]) -> Value {
    Value::Set(provisio_types::Set::from_values(
        hashcode::int_identity(),
        values.iter().map(|v| Value::Int(*v)),
    ))
}

pub fn rule() -> Arc<Resource> {
    Arc::new(
        Resource::new()
            .with_field("from", Schema::int().required())
            .with_field("to", Schema::int().optional()),
    )
}

/// A firewall-like resource touching every field kind.
pub fn firewall() -> Arc<Resource> {
    Arc::new(
        Resource::new()
            .with_field("name", Schema::string().required())
            .with_field("zone", Schema::string().optional().computed().force_new())
            .with_field("size", Schema::int().optional())
            .with_field("enabled", Schema::bool().optional())
            .with_field("arn", Schema::string().computed())
            .with_field("ports", int_set_schema().optional())
            .with_field("weights", Schema::list(ValueType::Int).optional())
            .with_field("ingress", Schema::list(rule()).optional())
            .with_field("rules", Schema::set(rule()).optional())
            .with_field("tags", Schema::map().optional())
            .with_field("config_vars", Schema::list(Schema::map()).optional()),
    )
}

pub fn data(resource: &Arc<Resource>) -> ResourceData {
    ResourceData::new(Arc::clone(resource), None, None)
}
