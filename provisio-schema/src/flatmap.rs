//! Flat attribute codec.
//!
//! Nested values are persisted as a flat `key -> text` map:
//!
//! ```text
//! name               = "web"    primitive
//! ports.#            = "2"      list / set count
//! ports.0            = "80"     list element by index
//! rules.2932528.from = "10"     set element by hash code
//! tags.#             = "1"      map count (non-empty maps only)
//! tags.Name          = "web"    map entry
//! ```
//!
//! Lists and sets always write their count, including `0`. Maps write their
//! count only when they have entries; a map with no keys under its prefix
//! means "no map". Objects write only the fields they carry.

use crate::coerce::parse_bool;
use crate::schema::{Elem, Resource, Schema, ValueType};
use provisio_types::{Error, Result, Set, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Persisted attribute map.
pub type FlatMap = BTreeMap<String, String>;

/// Segment holding a collection's element count.
pub const COUNT: &str = "#";

/// Joins a flat key prefix and a segment.
#[must_use]
pub fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// `prefix.#`
#[must_use]
pub fn count_key(prefix: &str) -> String {
    join(prefix, COUNT)
}

/// Entries strictly below `prefix`, as `(rest, value)` with the `prefix.`
/// part stripped.
pub fn children<'a>(flat: &'a FlatMap, prefix: &str) -> impl Iterator<Item = (&'a str, &'a String)> {
    let start = format!("{prefix}.");
    flat.range(start.clone()..)
        .take_while(move |(k, _)| k.starts_with(&start))
        .map(move |(k, v)| (&k[prefix.len() + 1..], v))
}

/// Removes `prefix` and every key below it.
pub fn remove_subtree(flat: &mut FlatMap, prefix: &str) {
    flat.remove(prefix);
    let below: Vec<String> = children(flat, prefix)
        .map(|(rest, _)| join(prefix, rest))
        .collect();
    for key in below {
        flat.remove(&key);
    }
}

/// Reads `prefix.#`. Unparsable counts are a [`Error::Diff`].
pub fn read_count(flat: &FlatMap, prefix: &str) -> Result<Option<usize>> {
    let key = count_key(prefix);
    match flat.get(&key) {
        None => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| Error::diff(key, format!("invalid count {text:?}"))),
    }
}

/// Rejects map entry names that cannot be stored: the empty name and the
/// count segment.
pub fn check_map_key(key: &str, entry: &str) -> Result<()> {
    if entry.is_empty() || entry == COUNT {
        return Err(Error::config(key, format!("invalid map key {entry:?}")));
    }
    Ok(())
}

/// Text form of a primitive value.
pub fn format_primitive(key: &str, value: &Value, ty: ValueType) -> Result<String> {
    match (ty, value) {
        (ValueType::Bool, Value::Bool(b)) => Ok(b.to_string()),
        (ValueType::Int, Value::Int(n)) => Ok(n.to_string()),
        (ValueType::Float, Value::Float(x)) => Ok(x.to_string()),
        (ValueType::Float, Value::Int(n)) => Ok((*n as f64).to_string()),
        (ValueType::String, Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::type_mismatch(key, ty.name(), value.type_name())),
    }
}

/// Parses persisted text for a primitive. Malformed text is a
/// [`Error::Config`].
pub fn parse_primitive(key: &str, text: &str, ty: ValueType) -> Result<Value> {
    let parsed = match ty {
        ValueType::Bool => parse_bool(text).map(Value::Bool),
        ValueType::Int => text.parse().ok().map(Value::Int),
        ValueType::Float => text.parse().ok().map(Value::Float),
        ValueType::String => Some(Value::String(text.to_string())),
        ValueType::List | ValueType::Map | ValueType::Set => {
            return Err(Error::validation(key, format!("{ty} is not a primitive type")));
        }
    };
    parsed.ok_or_else(|| Error::config(key, format!("cannot parse {text:?} as {ty}")))
}

/// Encodes `value` under `key` into `out`.
///
/// The value must already conform to `schema`, see [`crate::coerce`].
pub fn write_field(key: &str, value: &Value, schema: &Schema, out: &mut FlatMap) -> Result<()> {
    match schema.value_type {
        ValueType::List => {
            let items: Vec<&Value> = match value {
                Value::List(items) => items.iter().collect(),
                Value::Set(set) => set.iter().collect(),
                other => return Err(Error::type_mismatch(key, "list", other.type_name())),
            };
            out.insert(count_key(key), items.len().to_string());
            for (i, item) in items.into_iter().enumerate() {
                write_elem(&join(key, &i.to_string()), item, schema.elem.as_ref(), out)?;
            }
        }
        ValueType::Set => {
            let set = match value {
                Value::Set(set) => set.clone(),
                Value::List(items) => Set::from_values(schema.require_hash_fn(key)?, items.iter().cloned()),
                other => return Err(Error::type_mismatch(key, "set", other.type_name())),
            };
            out.insert(count_key(key), set.len().to_string());
            for (code, item) in set.entries() {
                write_elem(&join(key, &code.to_string()), item, schema.elem.as_ref(), out)?;
            }
        }
        ValueType::Map => {
            let Some(entries) = value.as_map() else {
                return Err(Error::type_mismatch(key, "map", value.type_name()));
            };
            if entries.is_empty() {
                return Ok(());
            }
            let value_type = schema.map_value_type();
            out.insert(count_key(key), entries.len().to_string());
            for (k, v) in entries {
                check_map_key(key, k)?;
                let entry_key = join(key, k);
                let text = format_primitive(&entry_key, v, value_type)?;
                out.insert(entry_key, text);
            }
        }
        primitive => {
            out.insert(key.to_string(), format_primitive(key, value, primitive)?);
        }
    }
    Ok(())
}

fn write_elem(key: &str, value: &Value, elem: Option<&Elem>, out: &mut FlatMap) -> Result<()> {
    match elem {
        Some(Elem::Schema(s)) => write_field(key, value, s, out),
        Some(Elem::Resource(r)) => write_object(key, value, r, out),
        None => Err(Error::validation(key, "collection has no element type")),
    }
}

/// Encodes a nested resource object. Only the fields present are written.
pub fn write_object(prefix: &str, value: &Value, resource: &Resource, out: &mut FlatMap) -> Result<()> {
    let Some(fields) = value.as_map() else {
        return Err(Error::type_mismatch(prefix, "object", value.type_name()));
    };
    for (name, v) in fields {
        let key = join(prefix, name);
        let Some(field) = resource.field(name) else {
            return Err(Error::unknown_key(key));
        };
        write_field(&key, v, field, out)?;
    }
    Ok(())
}

/// Encodes top-level fields of `resource`.
pub fn encode_object(resource: &Resource, fields: &BTreeMap<String, Value>) -> Result<FlatMap> {
    let mut out = FlatMap::new();
    for (name, value) in fields {
        let Some(field) = resource.field(name) else {
            return Err(Error::unknown_key(name.clone()));
        };
        write_field(name, value, field, &mut out)?;
    }
    Ok(out)
}

/// Decodes the value stored under `key`. `None` means not present.
///
/// Inconsistent collections, including element keys stored without a
/// count, are a [`Error::Diff`].
pub fn read_field(key: &str, flat: &FlatMap, schema: &Schema) -> Result<Option<Value>> {
    Reader { strict: true }.field(key, flat, schema)
}

/// Like [`read_field`], but element keys stored without a count read as
/// an absent collection.
pub fn read_field_lenient(key: &str, flat: &FlatMap, schema: &Schema) -> Result<Option<Value>> {
    Reader { strict: false }.field(key, flat, schema)
}

/// Decodes a nested resource object. Fields not stored are left out.
pub fn read_object(prefix: &str, flat: &FlatMap, resource: &Resource) -> Result<Value> {
    Reader { strict: true }.object(prefix, flat, resource)
}

/// Decodes the top-level fields of `resource` present in `flat`.
pub fn decode_object(resource: &Resource, flat: &FlatMap) -> Result<BTreeMap<String, Value>> {
    match read_object("", flat, resource)? {
        Value::Object(fields) => Ok(fields),
        _ => Ok(BTreeMap::new()),
    }
}

#[derive(Clone, Copy)]
struct Reader {
    strict: bool,
}

impl Reader {
    fn field(self, key: &str, flat: &FlatMap, schema: &Schema) -> Result<Option<Value>> {
        match schema.value_type {
            ValueType::List => self.list(key, flat, schema),
            ValueType::Set => self.set(key, flat, schema),
            ValueType::Map => read_map(key, flat, schema),
            primitive => flat
                .get(key)
                .map(|text| parse_primitive(key, text, primitive))
                .transpose(),
        }
    }

    fn list(self, key: &str, flat: &FlatMap, schema: &Schema) -> Result<Option<Value>> {
        let Some(count) = read_count(flat, key)? else {
            return self.orphaned(key, flat);
        };
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            let elem_key = join(key, &i.to_string());
            items.push(self.elem(&elem_key, flat, schema.elem.as_ref())?);
        }
        // Keys past the count are left over from a shrink and are ignored.
        Ok(Some(Value::List(items)))
    }

    fn set(self, key: &str, flat: &FlatMap, schema: &Schema) -> Result<Option<Value>> {
        let Some(count) = read_count(flat, key)? else {
            return self.orphaned(key, flat);
        };
        let segments = element_segments(key, flat);
        // Empty objects and maps leave no keys behind.
        let lenient = match &schema.elem {
            Some(Elem::Resource(_)) => true,
            Some(Elem::Schema(s)) => s.value_type == ValueType::Map,
            None => false,
        };
        if segments.len() > count || (segments.len() < count && !lenient) {
            return Err(Error::diff(
                count_key(key),
                format!("count is {count} but {} elements are stored", segments.len()),
            ));
        }
        let mut set = Set::new(schema.require_hash_fn(key)?);
        for seg in &segments {
            if seg.parse::<i64>().is_err() {
                return Err(Error::diff(join(key, seg), "set element key is not a hash code"));
            }
            let item = self.elem(&join(key, seg), flat, schema.elem.as_ref())?;
            let code = set.add(item);
            if code.to_string() != *seg {
                tracing::trace!(key = %key, stored = %seg, code, "set element rehashed");
            }
        }
        if set.len() < segments.len() {
            tracing::debug!(key = %key, stored = segments.len(), distinct = set.len(), "set elements collapsed");
        }
        Ok(Some(Value::Set(set)))
    }

    fn elem(self, key: &str, flat: &FlatMap, elem: Option<&Elem>) -> Result<Value> {
        match elem {
            Some(Elem::Resource(r)) => self.object(key, flat, r),
            Some(Elem::Schema(s)) => match self.field(key, flat, s)? {
                Some(value) => Ok(value),
                None if s.value_type == ValueType::Map => Ok(Value::Map(BTreeMap::new())),
                None => Err(Error::diff(key, "collection element is missing")),
            },
            None => Err(Error::validation(key, "collection has no element type")),
        }
    }

    fn object(self, prefix: &str, flat: &FlatMap, resource: &Resource) -> Result<Value> {
        let mut fields = BTreeMap::new();
        for (name, field) in &resource.schema {
            if let Some(value) = self.field(&join(prefix, name), flat, field)? {
                fields.insert(name.clone(), value);
            }
        }
        Ok(Value::Object(fields))
    }

    fn orphaned(self, key: &str, flat: &FlatMap) -> Result<Option<Value>> {
        match children(flat, key).next() {
            Some((rest, _)) if self.strict => {
                Err(Error::diff(join(key, rest), "collection element without a count"))
            }
            Some(_) => {
                tracing::trace!(key = %key, "elements without a count read as absent");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

fn read_map(key: &str, flat: &FlatMap, schema: &Schema) -> Result<Option<Value>> {
    let value_type = schema.map_value_type();
    let mut entries = BTreeMap::new();
    for (rest, text) in children(flat, key) {
        if rest == COUNT {
            continue;
        }
        let entry_key = join(key, rest);
        entries.insert(rest.to_string(), parse_primitive(&entry_key, text, value_type)?);
    }
    match read_count(flat, key)? {
        Some(count) if count != entries.len() => Err(Error::diff(
            count_key(key),
            format!("count is {count} but {} entries are stored", entries.len()),
        )),
        Some(_) => Ok(Some(Value::Map(entries))),
        None if entries.is_empty() => Ok(None),
        None => Ok(Some(Value::Map(entries))),
    }
}

/// Distinct first segments below `key`, excluding the count.
pub fn element_segments(key: &str, flat: &FlatMap) -> BTreeSet<String> {
    children(flat, key)
        .filter(|(rest, _)| *rest != COUNT)
        .map(|(rest, _)| rest.split('.').next().unwrap_or(rest).to_string())
        .collect()
}
