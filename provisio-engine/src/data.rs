//! Resource-data accessor.
//!
//! One [`ResourceData`] serves one reconciliation pass of one resource. It
//! reads through four layers, lowest precedence first:
//!
//! 1. prior state
//! 2. configuration (whole top-level fields)
//! 3. diff (single flat keys, removed or computed)
//! 4. overrides written with [`ResourceData::set`]
//!
//! Reads resolve against a flat view of all layers up to the requested one;
//! nothing below the override layer is ever mutated.

use provisio_schema::flatmap::{self, FlatMap, count_key, join};
use provisio_schema::{Elem, Mode, Resource, Schema, ValueType, coerce};
use provisio_types::{
    Error, ResourceConfig, ResourceDependency, ResourceDiff, ResourceState, Result, Set, Value,
    key_within,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    State,
    Config,
    Diff,
    Override,
}

/// Flat attributes of a layer view, plus the keys whose value is not known
/// until apply.
struct View {
    flat: FlatMap,
    computed: BTreeSet<String>,
}

impl View {
    fn is_computed(&self, key: &str) -> bool {
        let count = count_key(key);
        self.computed
            .iter()
            .any(|c| key_within(key, c) || *c == count)
    }
}

/// What a resolved path points at.
#[derive(Clone, Copy)]
enum Target<'s> {
    Field(&'s Schema),
    Object(&'s Resource),
    MapValue(ValueType),
    Count,
}

impl Target<'_> {
    fn zero(self) -> Value {
        match self {
            Self::Field(schema) => schema.zero_value(),
            Self::Object(resource) => resource.zero_object(),
            Self::MapValue(value_type) => Schema::new(value_type).zero_value(),
            Self::Count => Value::Int(0),
        }
    }

    fn fill(self, value: Value) -> Value {
        match self {
            Self::Field(schema) => fill_value(value, schema),
            Self::Object(resource) => fill_object(value, resource),
            Self::MapValue(_) | Self::Count => value,
        }
    }
}

/// Layered read/write access to one resource's data.
pub struct ResourceData {
    resource: Arc<Resource>,
    state: Option<ResourceState>,
    config: Option<ResourceConfig>,
    diff: Option<ResourceDiff>,
    /// Flat entries written by `set`.
    overrides: FlatMap,
    /// Keys whose lower-layer subtree is replaced by `overrides`.
    replaced: BTreeSet<String>,
    /// Copy of the prior state, created on the first identity write.
    new_state: Option<ResourceState>,
    partial: bool,
    partial_keys: BTreeSet<String>,
}

impl ResourceData {
    #[must_use]
    pub fn new(resource: Arc<Resource>, state: Option<ResourceState>, diff: Option<ResourceDiff>) -> Self {
        Self {
            resource,
            state,
            config: None,
            diff,
            overrides: FlatMap::new(),
            replaced: BTreeSet::new(),
            new_state: None,
            partial: false,
            partial_keys: BTreeSet::new(),
        }
    }

    /// Adds the configuration layer.
    #[must_use]
    pub fn with_config(mut self, config: ResourceConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Current value at `key`, or the zero value if it is not set.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.get_ok(key).map(|(value, _)| value)
    }

    /// Current value at `key` and whether it is set to a non-zero value.
    ///
    /// Values only known after apply read as zero with `false`.
    pub fn get_ok(&self, key: &str) -> Result<(Value, bool)> {
        self.read(key, Level::Override)
    }

    /// `(old, new)` for `key`, read from the prior state and from the diff.
    pub fn get_change(&self, key: &str) -> Result<(Value, Value)> {
        let (old, _) = self.read(key, Level::State)?;
        let new = match self.lookup(key, Level::Diff)? {
            (Target::Field(schema), Some(new)) if schema.value_type.is_primitive() => {
                apply_state_func(key, new, schema)
            }
            (target, Some(new)) => target.fill(new),
            (target, None) => target.zero(),
        };
        Ok((old, new))
    }

    /// True if `key` differs between the prior state and the diff.
    pub fn has_change(&self, key: &str) -> Result<bool> {
        let (old, new) = self.get_change(key)?;
        Ok(old != new)
    }

    /// Writes `value` at `key` into the override layer.
    ///
    /// Whole fields, list elements (`ports.1`) and fields below list
    /// elements (`ingress.0.from`) can be written. The value is checked and
    /// encoded before anything changes, so a failed write leaves the data
    /// untouched.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let target = self.writable(key)?;
        let mut scratch = FlatMap::new();
        match target {
            Target::Field(schema) => {
                let value = coerce(key, &value, schema, Mode::Strict)?;
                flatmap::write_field(key, &value, schema, &mut scratch)?;
            }
            Target::Object(resource) => {
                let value = coerce::coerce_object(key, &value, resource, Mode::Strict)?;
                flatmap::write_object(key, &value, resource, &mut scratch)?;
            }
            Target::MapValue(_) | Target::Count => {
                return Err(Error::validation(key, "value cannot be set directly"));
            }
        }

        flatmap::remove_subtree(&mut self.overrides, key);
        self.replaced.retain(|r| !key_within(r, key));
        self.replaced.insert(key.to_string());
        trace!(key = %key, attributes = scratch.len(), "attribute set");
        self.overrides.extend(scratch);
        Ok(())
    }

    /// Resource id; empty when the resource does not exist.
    #[must_use]
    pub fn id(&self) -> &str {
        self.current_state().map_or("", |s| s.id.as_str())
    }

    /// Sets the id. An empty id marks the resource as destroyed.
    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        debug!(id = %id, "resource id set");
        self.new_state_mut().id = id;
    }

    #[must_use]
    pub fn conn_info(&self) -> Option<&BTreeMap<String, String>> {
        self.current_state().map(|s| &s.conn_info)
    }

    pub fn set_conn_info(&mut self, conn_info: BTreeMap<String, String>) {
        self.new_state_mut().conn_info = conn_info;
    }

    #[must_use]
    pub fn dependencies(&self) -> &[ResourceDependency] {
        self.current_state()
            .map(|s| s.dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn set_dependencies(&mut self, dependencies: Vec<ResourceDependency>) {
        self.new_state_mut().dependencies = dependencies;
    }

    /// Enables or disables partial state mode.
    ///
    /// In partial mode, [`ResourceData::state`] only reports new values for
    /// fields confirmed with [`ResourceData::set_partial`]; every other
    /// field keeps its prior state.
    pub fn partial(&mut self, enabled: bool) {
        self.partial = enabled;
        if !enabled {
            self.partial_keys.clear();
        }
    }

    /// Confirms the top-level field of `key` as successfully changed.
    pub fn set_partial(&mut self, key: &str) -> Result<()> {
        let name = key.split('.').next().unwrap_or(key);
        if self.resource.field(name).is_none() {
            return Err(Error::unknown_key(key));
        }
        if self.partial {
            self.partial_keys.insert(name.to_string());
        }
        Ok(())
    }

    /// Snapshot of the current data, or `None` if the id is empty.
    pub fn state(&self) -> Result<Option<ResourceState>> {
        let id = self.id();
        if id.is_empty() {
            return Ok(None);
        }

        let view = self.view(Level::Override)?;
        let prior = self.state.as_ref().map(|s| &s.attributes);
        let mut attributes = FlatMap::new();
        for (name, schema) in &self.resource.schema {
            if self.partial && !self.partial_keys.contains(name) {
                if let Some(prior) = prior {
                    copy_subtree(prior, name, &mut attributes);
                }
                trace!(field = %name, "partial state: kept prior value");
                continue;
            }
            if view.is_computed(name) {
                continue;
            }
            if let Some(value) = flatmap::read_field_lenient(name, &view.flat, schema)? {
                flatmap::write_field(name, &value, schema, &mut attributes)?;
            }
        }
        attributes.insert("id".to_string(), id.to_string());

        let current = self.current_state();
        Ok(Some(ResourceState {
            id: id.to_string(),
            attributes,
            conn_info: current.map(|s| s.conn_info.clone()).unwrap_or_default(),
            dependencies: current.map(|s| s.dependencies.clone()).unwrap_or_default(),
            meta: current.map(|s| s.meta.clone()).unwrap_or_default(),
        }))
    }

    fn current_state(&self) -> Option<&ResourceState> {
        self.new_state.as_ref().or(self.state.as_ref())
    }

    fn new_state_mut(&mut self) -> &mut ResourceState {
        self.new_state
            .get_or_insert_with(|| self.state.clone().unwrap_or_default())
    }

    fn read(&self, key: &str, level: Level) -> Result<(Value, bool)> {
        let (target, value) = self.lookup(key, level)?;
        match value {
            Some(value) => {
                let value = target.fill(value);
                let exists = !value.is_zero();
                Ok((value, exists))
            }
            None => Ok((target.zero(), false)),
        }
    }

    /// Resolves `key` in the view of `level`.
    fn lookup(&self, key: &str, level: Level) -> Result<(Target<'_>, Option<Value>)> {
        let (name, rest) = split_first(key);
        let schema = self.field(key, name)?;
        let view = self.view(level)?;
        let mut value = if view.is_computed(name) {
            None
        } else {
            flatmap::read_field_lenient(name, &view.flat, schema)?
        };
        let mut target = Target::Field(schema);
        let parts: Vec<&str> = rest.map(|r| r.split('.').collect()).unwrap_or_default();
        let mut i = 0;
        while i < parts.len() {
            let part = parts[i];
            (target, value) = match target {
                Target::Field(s) => match s.value_type {
                    ValueType::List | ValueType::Set if part == flatmap::COUNT => {
                        (Target::Count, value.map(|v| Value::Int(collection_len(&v))))
                    }
                    ValueType::List | ValueType::Set => {
                        let index = parse_index(key, part)?;
                        let element = value.and_then(|v| element_at(v, index));
                        (elem_target(key, s)?, element)
                    }
                    ValueType::Map => {
                        let entry = parts[i..].join(".");
                        i = parts.len();
                        if entry == flatmap::COUNT {
                            let len = value.map(|v| Value::Int(collection_len(&v)));
                            (Target::Count, len)
                        } else {
                            let entry_value = value.and_then(|v| match v {
                                Value::Map(mut entries) => entries.remove(&entry),
                                _ => None,
                            });
                            (Target::MapValue(s.map_value_type()), entry_value)
                        }
                    }
                    _ => return Err(Error::unknown_key(key)),
                },
                Target::Object(resource) => {
                    let Some(field) = resource.field(part) else {
                        return Err(Error::unknown_key(key));
                    };
                    let field_value = value.and_then(|v| match v {
                        Value::Object(mut fields) | Value::Map(mut fields) => fields.remove(part),
                        _ => None,
                    });
                    (Target::Field(field), field_value)
                }
                Target::MapValue(_) | Target::Count => return Err(Error::unknown_key(key)),
            };
            i += 1;
        }

        // A computed key below the top-level field, e.g. a nested count.
        if rest.is_some() && view.is_computed(key) {
            value = None;
        }
        Ok((target, value))
    }

    /// Resolves `key` for writing. Set elements, map entries and counts
    /// are rejected; list indices must exist.
    fn writable(&self, key: &str) -> Result<Target<'_>> {
        let (name, rest) = split_first(key);
        let mut target = Target::Field(self.field(key, name)?);
        let mut prefix = name.to_string();
        for part in rest.into_iter().flat_map(|r| r.split('.')) {
            target = match target {
                Target::Field(s) => match s.value_type {
                    ValueType::List if part == flatmap::COUNT => {
                        return Err(Error::validation(key, "a list count cannot be set"));
                    }
                    ValueType::List => {
                        let index = parse_index(key, part)?;
                        let len = self
                            .get(&count_key(&prefix))?
                            .as_int()
                            .and_then(|n| usize::try_from(n).ok())
                            .unwrap_or(0);
                        if index >= len {
                            return Err(Error::validation(key, format!("list index {index} is out of range")));
                        }
                        elem_target(key, s)?
                    }
                    ValueType::Set => {
                        return Err(Error::validation(key, "set elements cannot be set individually"));
                    }
                    ValueType::Map => {
                        return Err(Error::validation(key, "map entries cannot be set individually"));
                    }
                    _ => return Err(Error::unknown_key(key)),
                },
                Target::Object(resource) => match resource.field(part) {
                    Some(field) => Target::Field(field),
                    None => return Err(Error::unknown_key(key)),
                },
                Target::MapValue(_) | Target::Count => return Err(Error::unknown_key(key)),
            };
            prefix = join(&prefix, part);
        }
        Ok(target)
    }

    fn field(&self, key: &str, name: &str) -> Result<&Schema> {
        self.resource
            .field(name)
            .ok_or_else(|| Error::unknown_key(key))
    }

    fn view(&self, level: Level) -> Result<View> {
        let mut flat = self
            .state
            .as_ref()
            .map(|s| s.attributes.clone())
            .unwrap_or_default();
        let mut computed = BTreeSet::new();

        if level >= Level::Config {
            if let Some(config) = &self.config {
                self.overlay_config(config, &mut flat, &mut computed)?;
            }
        }

        if level >= Level::Diff {
            if let Some(diff) = &self.diff {
                for (key, change) in &diff.attributes {
                    if change.new_removed {
                        flat.remove(key);
                    } else if change.new_computed {
                        flat.remove(key);
                        computed.insert(key.clone());
                    } else {
                        flat.insert(key.clone(), change.new.clone());
                    }
                }
            }
        }

        if level >= Level::Override {
            for key in &self.replaced {
                flatmap::remove_subtree(&mut flat, key);
                computed.retain(|c| !key_within(c, key));
            }
            flat.extend(self.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Ok(View { flat, computed })
    }

    fn overlay_config(
        &self,
        config: &ResourceConfig,
        flat: &mut FlatMap,
        computed: &mut BTreeSet<String>,
    ) -> Result<()> {
        for (name, schema) in &self.resource.schema {
            if config.is_unknown(name) {
                flatmap::remove_subtree(flat, name);
                computed.insert(name.clone());
                continue;
            }
            // Partially unknown fields cannot be encoded; the layers below stand.
            if config.has_unknown_below(name) {
                continue;
            }
            let Some(value) = config.get(name) else {
                continue;
            };
            let value = coerce(name, value, schema, Mode::Weak)?;
            flatmap::remove_subtree(flat, name);
            flatmap::write_field(name, &value, schema, flat)?;
        }
        Ok(())
    }
}

fn split_first(key: &str) -> (&str, Option<&str>) {
    match key.split_once('.') {
        Some((name, rest)) => (name, Some(rest)),
        None => (key, None),
    }
}

fn parse_index(key: &str, part: &str) -> Result<usize> {
    part.parse().map_err(|_| Error::unknown_key(key))
}

fn elem_target<'s>(key: &str, schema: &'s Schema) -> Result<Target<'s>> {
    match &schema.elem {
        Some(Elem::Schema(elem)) => Ok(Target::Field(elem)),
        Some(Elem::Resource(resource)) => Ok(Target::Object(resource)),
        None => Err(Error::unknown_key(key)),
    }
}

fn collection_len(value: &Value) -> i64 {
    let len = match value {
        Value::List(items) => items.len(),
        Value::Set(set) => set.len(),
        Value::Map(entries) | Value::Object(entries) => entries.len(),
        _ => 0,
    };
    i64::try_from(len).unwrap_or(i64::MAX)
}

/// Element at `index`; for sets, the position in hash-code order.
fn element_at(value: Value, index: usize) -> Option<Value> {
    match value {
        Value::List(items) => items.into_iter().nth(index),
        Value::Set(set) => set.get_index(index).cloned(),
        _ => None,
    }
}

fn apply_state_func(key: &str, value: Value, schema: &Schema) -> Value {
    let Some(state_func) = &schema.state_func else {
        return value;
    };
    let text = state_func(&value);
    flatmap::parse_primitive(key, &text, schema.value_type).unwrap_or(Value::String(text))
}

fn fill_value(value: Value, schema: &Schema) -> Value {
    let Some(elem) = &schema.elem else {
        return value;
    };
    let fill = |item: Value| match elem {
        Elem::Schema(elem) => fill_value(item, elem),
        Elem::Resource(resource) => fill_object(item, resource),
    };
    match value {
        Value::List(items) => Value::List(items.into_iter().map(fill).collect()),
        Value::Set(set) => Value::Set(Set::from_values(set.hash_fn(), set.list().into_iter().map(fill))),
        other => other,
    }
}

fn fill_object(value: Value, resource: &Resource) -> Value {
    let fields = match value {
        Value::Object(fields) | Value::Map(fields) => fields,
        _ => BTreeMap::new(),
    };
    let fields = fields
        .into_iter()
        .map(|(name, v)| match resource.field(&name) {
            Some(field) => {
                let v = fill_value(v, field);
                (name, v)
            }
            None => (name, v),
        })
        .collect();
    resource.zero_fill(fields)
}

fn copy_subtree(from: &FlatMap, prefix: &str, to: &mut FlatMap) {
    if let Some(value) = from.get(prefix) {
        to.insert(prefix.to_string(), value.clone());
    }
    for (rest, value) in flatmap::children(from, prefix) {
        to.insert(join(prefix, rest), value.clone());
    }
}
