//! Diff engine: compares persisted state against desired configuration.
//!
//! Keys into the state and paths into the configuration are tracked side by
//! side. They only diverge below set elements, which the state addresses by
//! hash code and the configuration by position.

use provisio_schema::flatmap::{self, COUNT, FlatMap, children, count_key, join};
use provisio_schema::{Elem, Mode, Resource, Schema, ValueType, coerce};
use provisio_types::{AttrDiff, Error, ResourceConfig, ResourceDiff, ResourceState, Result, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Computes the changes needed to move `state` to `config`.
///
/// Returns `Ok(None)` when nothing changes and nothing is pending
/// computation. Required fields missing from the configuration fail the
/// call before any diffing. A malformed state, such as a count whose
/// elements are missing, is an [`Error::Diff`].
pub fn diff(
    resource: &Resource,
    state: Option<&ResourceState>,
    config: &ResourceConfig,
) -> Result<Option<ResourceDiff>> {
    check_required("", resource, Some(config.raw()), config)?;

    let config = with_defaults(resource, config);
    let empty = FlatMap::new();
    let mut differ = Differ {
        state: state.map_or(&empty, |s| &s.attributes),
        config: &config,
        diff: ResourceDiff::new(),
    };
    for (name, schema) in &resource.schema {
        // Persisted values must decode before they are compared.
        flatmap::read_field(name, differ.state, schema)?;
        differ.field(name, name, schema, false)?;
    }

    let diff = differ.diff;
    debug!(
        attributes = diff.len(),
        requires_new = diff.requires_new(),
        "computed resource diff"
    );
    Ok((!diff.is_empty()).then_some(diff))
}

fn check_required(
    prefix: &str,
    resource: &Resource,
    fields: Option<&BTreeMap<String, Value>>,
    config: &ResourceConfig,
) -> Result<()> {
    for (name, schema) in &resource.schema {
        let key = join(prefix, name);
        if config.is_unknown(&key) {
            continue;
        }
        match fields.and_then(|f| f.get(name)) {
            None if schema.required && schema.default.is_none() => {
                return Err(Error::validation(key, "required field is not set"));
            }
            Some(value) => {
                let Some(nested) = schema.elem_resource() else {
                    continue;
                };
                for (i, item) in items(value).into_iter().enumerate() {
                    check_required(&join(&key, &i.to_string()), nested, item.as_map(), config)?;
                }
            }
            None => {}
        }
    }
    Ok(())
}

/// Top-level defaults are folded into the configuration so collections
/// with a default diff exactly like configured ones.
fn with_defaults(resource: &Resource, config: &ResourceConfig) -> ResourceConfig {
    let mut effective = config.clone();
    for (name, schema) in &resource.schema {
        if let Some(default) = &schema.default {
            if !config.contains(name) {
                effective = effective.with(name.clone(), default.clone());
            }
        }
    }
    effective
}

fn items(value: &Value) -> Vec<&Value> {
    match value {
        Value::List(items) => items.iter().collect(),
        Value::Set(set) => set.iter().collect(),
        _ => Vec::new(),
    }
}

struct Differ<'a> {
    state: &'a FlatMap,
    config: &'a ResourceConfig,
    diff: ResourceDiff,
}

impl Differ<'_> {
    fn field(&mut self, key: &str, path: &str, schema: &Schema, force_new: bool) -> Result<()> {
        let force_new = force_new || schema.force_new;
        match schema.value_type {
            ValueType::List => self.list(key, path, schema, force_new),
            ValueType::Set => self.set(key, path, schema, force_new),
            ValueType::Map => self.map(key, path, schema, force_new),
            ValueType::Bool | ValueType::Int | ValueType::Float | ValueType::String => {
                self.primitive(key, path, schema, force_new)
            }
        }
    }

    fn elem(&mut self, key: &str, path: &str, schema: &Schema, force_new: bool) -> Result<()> {
        match &schema.elem {
            Some(Elem::Schema(elem)) => self.field(key, path, elem, force_new),
            Some(Elem::Resource(nested)) => {
                for (name, field) in &nested.schema {
                    self.field(&join(key, name), &join(path, name), field, force_new)?;
                }
                Ok(())
            }
            None => Err(Error::validation(key, "collection has no element type")),
        }
    }

    fn primitive(&mut self, key: &str, path: &str, schema: &Schema, force_new: bool) -> Result<()> {
        let (state, config) = (self.state, self.config);
        let old = state.get(key);
        if config.is_unknown(path) {
            let old = old.cloned().unwrap_or_default();
            self.insert(key, AttrDiff::computed(old).with_requires_new(force_new));
            return Ok(());
        }

        let desired = config.get(path).or(schema.default.as_ref());
        let Some(desired) = desired else {
            match old {
                Some(_) if schema.computed => {}
                Some(old) => self.insert(key, AttrDiff::removed(old.clone())),
                None if schema.computed => {
                    self.insert(key, AttrDiff::computed("").with_requires_new(force_new));
                }
                None => {}
            }
            return Ok(());
        };

        let value = coerce(path, desired, schema, Mode::Weak)?;
        let new = match &schema.state_func {
            Some(state_func) => state_func(&value),
            None => flatmap::format_primitive(key, &value, schema.value_type)?,
        };
        if old != Some(&new) {
            let old = old.cloned().unwrap_or_default();
            self.insert(key, AttrDiff::change(old, new).with_requires_new(force_new));
        }
        Ok(())
    }

    fn list(&mut self, key: &str, path: &str, schema: &Schema, force_new: bool) -> Result<()> {
        let (state, config) = (self.state, self.config);
        let count = count_key(key);
        let old_text = state.get(&count);
        if config.is_unknown(path) {
            self.computed_count(&count, old_text, force_new);
            return Ok(());
        }

        let old_len = flatmap::read_count(state, key)?.unwrap_or(0);
        let new_len = match config.get(path) {
            Some(Value::List(items)) => items.len(),
            Some(Value::Set(set)) => set.len(),
            Some(other) => {
                return Err(Error::config(
                    path,
                    format!("cannot convert {} to list", other.type_name()),
                ));
            }
            None if schema.computed => {
                if old_text.is_none() {
                    self.computed_count(&count, None, force_new);
                }
                return Ok(());
            }
            None => 0,
        };

        if old_len != new_len {
            let old = old_text.cloned().unwrap_or_default();
            self.insert(&count, AttrDiff::change(old, new_len.to_string()).with_requires_new(force_new));
        }
        for i in 0..new_len {
            let segment = i.to_string();
            self.elem(&join(key, &segment), &join(path, &segment), schema, force_new)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, path: &str, schema: &Schema, force_new: bool) -> Result<()> {
        let (state, config) = (self.state, self.config);
        let count = count_key(key);
        let old_text = state.get(&count);
        // A single unknown element makes the whole set unknown: its hash
        // code cannot be computed.
        if config.is_unknown(path) || config.has_unknown_below(path) {
            self.computed_count(&count, old_text, force_new);
            return Ok(());
        }

        let old_len = flatmap::read_count(state, key)?.unwrap_or(0);
        let configured: Vec<Value> = match config.get(path) {
            Some(Value::List(items)) => items.clone(),
            Some(Value::Set(set)) => set.list(),
            Some(other) => {
                return Err(Error::config(
                    path,
                    format!("cannot convert {} to set", other.type_name()),
                ));
            }
            None if schema.computed => {
                if old_text.is_none() {
                    self.computed_count(&count, None, force_new);
                }
                return Ok(());
            }
            None => Vec::new(),
        };

        // Hash code of each element, and the configuration position it came
        // from. Duplicates keep their first position.
        let hash = schema.require_hash_fn(key)?;
        let mut positions: BTreeMap<i64, usize> = BTreeMap::new();
        for (i, item) in configured.iter().enumerate() {
            let element = coerce::coerce_elem(&join(path, &i.to_string()), item, schema.elem.as_ref(), Mode::Weak)?;
            positions.entry(hash(&element)).or_insert(i);
        }
        if positions.len() < configured.len() {
            trace!(key = %key, configured = configured.len(), distinct = positions.len(), "duplicate set elements collapsed");
        }

        if old_len != positions.len() {
            let old = old_text.cloned().unwrap_or_default();
            self.insert(&count, AttrDiff::change(old, positions.len().to_string()).with_requires_new(force_new));
        }
        for (code, i) in &positions {
            self.elem(&join(key, &code.to_string()), &join(path, &i.to_string()), schema, force_new)?;
        }

        for segment in flatmap::element_segments(key, state) {
            let kept = segment.parse::<i64>().is_ok_and(|code| positions.contains_key(&code));
            if kept {
                continue;
            }
            let element = join(key, &segment);
            if let Some(old) = state.get(&element) {
                self.insert(&element, AttrDiff::removed(old.clone()));
            }
            for (rest, old) in children(state, &element) {
                self.insert(&join(&element, rest), AttrDiff::removed(old.clone()));
            }
        }
        Ok(())
    }

    fn map(&mut self, key: &str, path: &str, schema: &Schema, force_new: bool) -> Result<()> {
        let (state, config) = (self.state, self.config);
        let count = count_key(key);
        let old_count = state.get(&count);
        if config.is_unknown(path) || config.has_unknown_below(path) {
            self.computed_count(&count, old_count, force_new);
            return Ok(());
        }

        let old: BTreeMap<&str, &String> = children(state, key).filter(|(rest, _)| *rest != COUNT).collect();
        let new = match config.get(path) {
            Some(value) => match coerce(path, value, schema, Mode::Weak)? {
                Value::Map(entries) => entries,
                _ => BTreeMap::new(),
            },
            None if schema.computed => {
                if old.is_empty() && old_count.is_none() {
                    self.computed_count(&count, None, force_new);
                }
                return Ok(());
            }
            None => BTreeMap::new(),
        };

        let value_type = schema.map_value_type();
        let mut changed = false;
        for (k, v) in &new {
            let entry = join(key, k);
            let text = flatmap::format_primitive(&entry, v, value_type)?;
            let previous = old.get(k.as_str()).copied();
            if previous != Some(&text) {
                let previous = previous.cloned().unwrap_or_default();
                self.insert(&entry, AttrDiff::change(previous, text).with_requires_new(force_new));
                changed = true;
            }
        }
        for (k, v) in &old {
            if !new.contains_key(*k) {
                self.insert(&join(key, k), AttrDiff::removed((*v).clone()));
                changed = true;
            }
        }

        // The count only follows entry changes, so states written without
        // a count do not produce a diff of their own.
        if changed {
            if new.is_empty() {
                if let Some(old_count) = old_count {
                    self.insert(&count, AttrDiff::removed(old_count.clone()));
                }
            } else {
                let new_count = new.len().to_string();
                if old_count != Some(&new_count) {
                    let previous = old_count.cloned().unwrap_or_default();
                    self.insert(&count, AttrDiff::change(previous, new_count).with_requires_new(force_new));
                }
            }
        }
        Ok(())
    }

    fn computed_count(&mut self, count: &str, old: Option<&String>, force_new: bool) {
        let old = old.cloned().unwrap_or_default();
        self.insert(count, AttrDiff::computed(old).with_requires_new(force_new));
    }

    fn insert(&mut self, key: &str, change: AttrDiff) {
        trace!(key = %key, old = %change.old, new = %change.new, computed = change.new_computed, removed = change.new_removed, "attribute diff");
        self.diff.insert(key, change);
    }
}
