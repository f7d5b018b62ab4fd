//! Schema-directed value conversion.
//!
//! Each declared type has exactly one conversion. [`Mode::Strict`] accepts
//! only values that already have the right shape (plus int-to-float
//! widening and list/set interchange); [`Mode::Weak`] additionally parses
//! strings and stringifies numbers, the way configuration values written as
//! text need to be read.

use crate::flatmap::{check_map_key, join};
use crate::schema::{Elem, Resource, Schema, ValueType};
use provisio_types::{Error, Result, Set, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Values written through the accessor.
    Strict,
    /// Values read from configuration.
    Weak,
}

/// Converts `value` to the type declared by `schema`.
///
/// Sets are rebuilt with the field's hash function, so duplicate elements
/// collapse. Strict mismatches are [`Error::TypeMismatch`]; weak ones are
/// [`Error::Config`].
pub fn coerce(key: &str, value: &Value, schema: &Schema, mode: Mode) -> Result<Value> {
    match schema.value_type {
        ValueType::List => {
            let items = collection_items(key, value, schema.value_type, mode)?;
            let items = items
                .iter()
                .enumerate()
                .map(|(i, item)| coerce_elem(&join(key, &i.to_string()), item, schema.elem.as_ref(), mode))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(items))
        }
        ValueType::Set => {
            let items = collection_items(key, value, schema.value_type, mode)?;
            let mut set = Set::new(schema.require_hash_fn(key)?);
            for (i, item) in items.iter().enumerate() {
                set.add(coerce_elem(&join(key, &i.to_string()), item, schema.elem.as_ref(), mode)?);
            }
            Ok(Value::Set(set))
        }
        ValueType::Map => {
            let Some(entries) = value.as_map() else {
                return Err(mismatch(key, "map", value, mode));
            };
            let value_type = schema.map_value_type();
            let entries = entries
                .iter()
                .map(|(k, v)| {
                    check_map_key(key, k)?;
                    Ok((k.clone(), coerce_primitive(&join(key, k), v, value_type, mode)?))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Value::Map(entries))
        }
        primitive => coerce_primitive(key, value, primitive, mode),
    }
}

/// Converts a map or object into an object of `resource`.
///
/// Field names not in the resource are [`Error::UnknownKey`].
pub fn coerce_object(key: &str, value: &Value, resource: &Resource, mode: Mode) -> Result<Value> {
    let Some(fields) = value.as_map() else {
        return Err(mismatch(key, "object", value, mode));
    };
    let mut out = BTreeMap::new();
    for (name, v) in fields {
        let field_key = join(key, name);
        let Some(field) = resource.field(name) else {
            return Err(Error::unknown_key(field_key));
        };
        out.insert(name.clone(), coerce(&field_key, v, field, mode)?);
    }
    Ok(Value::Object(out))
}

/// Converts one element of a collection.
pub fn coerce_elem(key: &str, value: &Value, elem: Option<&Elem>, mode: Mode) -> Result<Value> {
    match elem {
        Some(Elem::Schema(s)) => coerce(key, value, s, mode),
        Some(Elem::Resource(r)) => coerce_object(key, value, r, mode),
        None => Err(Error::validation(key, "collection has no element type")),
    }
}

fn collection_items<'a>(key: &str, value: &'a Value, expected: ValueType, mode: Mode) -> Result<Vec<&'a Value>> {
    match value {
        Value::List(items) => Ok(items.iter().collect()),
        Value::Set(set) => Ok(set.iter().collect()),
        other => Err(mismatch(key, expected.name(), other, mode)),
    }
}

fn coerce_primitive(key: &str, value: &Value, ty: ValueType, mode: Mode) -> Result<Value> {
    let converted = match (ty, value) {
        (ValueType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
        (ValueType::Int, Value::Int(n)) => Some(Value::Int(*n)),
        (ValueType::Float, Value::Float(x)) => Some(Value::Float(*x)),
        (ValueType::Float, Value::Int(n)) => Some(Value::Float(*n as f64)),
        (ValueType::String, Value::String(s)) => Some(Value::String(s.clone())),
        _ if mode == Mode::Weak => weak_primitive(ty, value),
        _ => None,
    };
    converted.ok_or_else(|| mismatch(key, ty.name(), value, mode))
}

fn weak_primitive(ty: ValueType, value: &Value) -> Option<Value> {
    match (ty, value) {
        (ValueType::Bool, Value::String(s)) => parse_bool(s).map(Value::Bool),
        (ValueType::Bool, Value::Int(0)) => Some(Value::Bool(false)),
        (ValueType::Bool, Value::Int(1)) => Some(Value::Bool(true)),
        (ValueType::Int, Value::String(s)) => s.trim().parse().ok().map(Value::Int),
        (ValueType::Float, Value::String(s)) => s.trim().parse().ok().map(Value::Float),
        (ValueType::String, Value::Bool(_) | Value::Int(_) | Value::Float(_)) => {
            Some(Value::String(value.to_string()))
        }
        _ => None,
    }
}

/// Parses the boolean spellings accepted from configuration and state.
#[must_use]
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn mismatch(key: &str, expected: &'static str, value: &Value, mode: Mode) -> Error {
    match mode {
        Mode::Strict => Error::type_mismatch(key, expected, value.type_name()),
        Mode::Weak => Error::config(key, format!("cannot convert {} to {expected}", value.type_name())),
    }
}
