use crate::coerce::{self, Mode};
use crate::flatmap::join;
use crate::hash;
use provisio_types::{Error, Result, Set, SetHashFn, Value, hashcode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Normalizes a primitive value into the text persisted in state.
pub type StateFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
    Set,
}

impl ValueType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
            Self::Set => "set",
        }
    }

    #[must_use]
    pub const fn is_primitive(self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float | Self::String)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element description of a collection field.
#[derive(Debug, Clone)]
pub enum Elem {
    /// Elements are values of this type.
    Schema(Box<Schema>),
    /// Elements are objects of a nested resource.
    Resource(Arc<Resource>),
}

impl From<Schema> for Elem {
    fn from(schema: Schema) -> Self {
        Self::Schema(Box::new(schema))
    }
}

impl From<ValueType> for Elem {
    fn from(value_type: ValueType) -> Self {
        Self::Schema(Box::new(Schema::new(value_type)))
    }
}

impl From<Resource> for Elem {
    fn from(resource: Resource) -> Self {
        Self::Resource(Arc::new(resource))
    }
}

impl From<Arc<Resource>> for Elem {
    fn from(resource: Arc<Resource>) -> Self {
        Self::Resource(resource)
    }
}

/// Declarative description of one field.
///
/// Built once with the builder methods and never mutated afterwards.
#[derive(Clone)]
pub struct Schema {
    pub value_type: ValueType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    /// Changing the field requires replacing the resource.
    pub force_new: bool,
    /// Value used when the configuration omits the field.
    pub default: Option<Value>,
    /// Normalizes a configured primitive value before it is stored.
    pub state_func: Option<StateFn>,
    /// Element description; required for `List` and `Set`, optional for `Map`.
    pub elem: Option<Elem>,
    /// Hash function for `Set` elements.
    pub set_hash: Option<SetHashFn>,
    /// Warning emitted when a configuration sets this field.
    pub deprecated: Option<String>,
    pub description: Option<String>,
}

impl Schema {
    /// A field of the given type with no flags set.
    #[must_use]
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            default: None,
            state_func: None,
            elem: None,
            set_hash: None,
            deprecated: None,
            description: None,
        }
    }

    #[must_use]
    pub fn bool() -> Self {
        Self::new(ValueType::Bool)
    }

    #[must_use]
    pub fn int() -> Self {
        Self::new(ValueType::Int)
    }

    #[must_use]
    pub fn float() -> Self {
        Self::new(ValueType::Float)
    }

    #[must_use]
    pub fn string() -> Self {
        Self::new(ValueType::String)
    }

    /// An ordered list of `elem`.
    pub fn list(elem: impl Into<Elem>) -> Self {
        Self::new(ValueType::List).with_elem(elem)
    }

    /// A hash-identity set of `elem`.
    pub fn set(elem: impl Into<Elem>) -> Self {
        Self::new(ValueType::Set).with_elem(elem)
    }

    /// A map of strings.
    #[must_use]
    pub fn map() -> Self {
        Self::new(ValueType::Map)
    }

    /// A map whose values are of the given primitive type.
    #[must_use]
    pub fn map_of(value_type: ValueType) -> Self {
        Self::new(ValueType::Map).with_elem(value_type)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    #[must_use]
    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_elem(mut self, elem: impl Into<Elem>) -> Self {
        self.elem = Some(elem.into());
        self
    }

    #[must_use]
    pub fn with_hash<F>(mut self, hash: F) -> Self
    where
        F: Fn(&Value) -> i64 + Send + Sync + 'static,
    {
        self.set_hash = Some(Arc::new(hash));
        self
    }

    #[must_use]
    pub fn with_state_func<F>(mut self, state_func: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.state_func = Some(Arc::new(state_func));
        self
    }

    #[must_use]
    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True if the field is only ever set by the provider.
    #[must_use]
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    #[must_use]
    pub fn elem_schema(&self) -> Option<&Schema> {
        match &self.elem {
            Some(Elem::Schema(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn elem_resource(&self) -> Option<&Arc<Resource>> {
        match &self.elem {
            Some(Elem::Resource(r)) => Some(r),
            _ => None,
        }
    }

    /// Primitive type of the values of a `Map` field. Defaults to string.
    #[must_use]
    pub fn map_value_type(&self) -> ValueType {
        self.elem_schema().map_or(ValueType::String, |s| s.value_type)
    }

    /// The hash function used for elements of a `Set` field.
    ///
    /// An explicit hash wins. Sets of nested resources fall back to hashing
    /// the canonical serialization of the element. Sets of primitives have no
    /// fallback.
    #[must_use]
    pub fn hash_fn(&self) -> Option<SetHashFn> {
        if let Some(hash) = &self.set_hash {
            return Some(Arc::clone(hash));
        }
        self.elem_resource().map(hash::resource_hash)
    }

    /// Like [`Schema::hash_fn`], but a missing hash function is a
    /// validation error for `key`.
    pub fn require_hash_fn(&self, key: &str) -> Result<SetHashFn> {
        self.hash_fn()
            .ok_or_else(|| Error::validation(key, "set of primitive elements has no hash function"))
    }

    /// Zero value of the declared type. Objects are zero-filled.
    #[must_use]
    pub fn zero_value(&self) -> Value {
        match self.value_type {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::List => Value::List(Vec::new()),
            ValueType::Map => Value::Map(BTreeMap::new()),
            ValueType::Set => Value::Set(Set::new(
                self.hash_fn().unwrap_or_else(hashcode::string_value),
            )),
        }
    }
}

impl Default for Schema {
    /// An optional string field.
    fn default() -> Self {
        Self::string().optional()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("value_type", &self.value_type)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field("force_new", &self.force_new)
            .field("default", &self.default)
            .field("state_func", &self.state_func.is_some())
            .field("elem", &self.elem)
            .field("set_hash", &self.set_hash.is_some())
            .field("deprecated", &self.deprecated)
            .finish_non_exhaustive()
    }
}

/// A resource type: named fields plus a schema version.
#[derive(Debug, Clone, Default)]
pub struct Resource {
    pub schema: BTreeMap<String, Schema>,
    /// Bumped whenever the persisted layout changes, see migration on refresh.
    pub schema_version: u32,
}

impl Resource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.schema.insert(name.into(), schema);
        self
    }

    #[must_use]
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Schema> {
        self.schema.get(name)
    }

    /// Zero-valued object: every field set to its zero value.
    #[must_use]
    pub fn zero_object(&self) -> Value {
        Value::Object(
            self.schema
                .iter()
                .map(|(name, s)| (name.clone(), s.zero_value()))
                .collect(),
        )
    }

    /// Fills every field missing from `fields` with its zero value.
    #[must_use]
    pub fn zero_fill(&self, mut fields: BTreeMap<String, Value>) -> Value {
        for (name, s) in &self.schema {
            fields.entry(name.clone()).or_insert_with(|| s.zero_value());
        }
        Value::Object(fields)
    }

    /// Checks that the schema itself is well formed.
    ///
    /// Meant to be called from provider unit tests, once per resource type.
    pub fn internal_validate(&self) -> Result<()> {
        self.validate_fields("")
    }

    fn validate_fields(&self, prefix: &str) -> Result<()> {
        for (name, s) in &self.schema {
            let key = join(prefix, name);
            validate_flags(&key, s)?;
            validate_shape(&key, s)?;
        }
        Ok(())
    }
}

fn validate_flags(key: &str, s: &Schema) -> Result<()> {
    if s.required && s.optional {
        return Err(Error::validation(key, "Optional and Required are mutually exclusive"));
    }
    if !s.required && !s.optional && !s.computed {
        return Err(Error::validation(key, "one of Optional, Required or Computed must be set"));
    }
    if let Some(default) = &s.default {
        if s.required {
            return Err(Error::validation(key, "Default cannot be set with Required"));
        }
        if let Err(err) = coerce::coerce(key, default, s, Mode::Strict) {
            return Err(Error::validation(key, format!("Default does not match type: {err}")));
        }
    }
    Ok(())
}

fn validate_shape(key: &str, s: &Schema) -> Result<()> {
    match s.value_type {
        ValueType::List | ValueType::Set => {
            match &s.elem {
                None => return Err(Error::validation(key, "List and Set must have Elem")),
                Some(Elem::Schema(elem)) => validate_shape(key, elem)?,
                Some(Elem::Resource(r)) => r.validate_fields(key)?,
            }
            if s.value_type == ValueType::Set && s.hash_fn().is_none() {
                return Err(Error::validation(key, "Set of primitive elements must have a hash function"));
            }
        }
        ValueType::Map => match &s.elem {
            None => {}
            Some(Elem::Schema(elem)) if elem.value_type.is_primitive() => {}
            Some(_) => {
                return Err(Error::validation(key, "Map elements must be a primitive type"));
            }
        },
        _ => {
            if s.elem.is_some() {
                return Err(Error::validation(key, "Elem is only valid on List, Set and Map"));
            }
        }
    }
    Ok(())
}
