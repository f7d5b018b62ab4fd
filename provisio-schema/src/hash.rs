//! Canonical serialization of values for set hashing.
//!
//! The output is deterministic and not meant to be parsed back. Format:
//!
//! | value    | text                                   |
//! |----------|----------------------------------------|
//! | bool     | `1` / `0`                              |
//! | int      | decimal                                |
//! | float    | shortest round-trip text               |
//! | string   | literal, delimiters escaped with `\`   |
//! | list     | `(` elements `)`                       |
//! | map      | `[` `key:value` sorted by key `]`      |
//! | set      | `{` elements in hash-code order `}`    |
//! | object   | `<` `field:value` sorted by name `>;`  |
//!
//! Every value is terminated by `;`. Strings, map keys and field names
//! escape the delimiter characters. Computed-only fields of nested
//! resources are skipped; fields missing from an object serialize as their
//! zero value, so `{port = 0}` and `{}` hash alike.

use crate::schema::{Elem, Resource, Schema};
use provisio_types::{SetHashFn, Value, hashcode};
use std::sync::Arc;

/// Appends the canonical text of `value` under `schema`.
///
/// `None` stands for an absent value and writes a bare terminator.
pub fn serialize_value_for_hash(buf: &mut String, value: Option<&Value>, schema: &Schema) {
    write_value(buf, value, schema.elem.as_ref());
}

/// Appends the canonical text of a nested resource object.
///
/// Non-object values serialize as an object with every field at zero.
pub fn serialize_resource_for_hash(buf: &mut String, value: &Value, resource: &Resource) {
    let fields = value.as_map();
    for (name, field) in &resource.schema {
        if field.is_computed_only() {
            continue;
        }
        write_text(buf, name);
        buf.push(':');
        match fields.and_then(|f| f.get(name)) {
            Some(v) => write_value(buf, Some(v), field.elem.as_ref()),
            None => write_value(buf, Some(&field.zero_value()), field.elem.as_ref()),
        }
    }
}

/// Hash function over the canonical serialization of `resource` objects.
#[must_use]
pub fn resource_hash(resource: &Arc<Resource>) -> SetHashFn {
    let resource = Arc::clone(resource);
    Arc::new(move |value: &Value| {
        let mut buf = String::new();
        serialize_resource_for_hash(&mut buf, value, &resource);
        hashcode::string(&buf)
    })
}

fn write_value(buf: &mut String, value: Option<&Value>, elem: Option<&Elem>) {
    let Some(value) = value else {
        buf.push(';');
        return;
    };
    match value {
        Value::Bool(b) => buf.push(if *b { '1' } else { '0' }),
        Value::Int(n) => buf.push_str(&n.to_string()),
        Value::Float(x) => buf.push_str(&x.to_string()),
        Value::String(s) => write_text(buf, s),
        Value::List(items) => {
            buf.push('(');
            for item in items {
                write_member(buf, item, elem);
            }
            buf.push(')');
        }
        Value::Set(set) => {
            buf.push('{');
            for item in set.iter() {
                write_member(buf, item, elem);
            }
            buf.push('}');
        }
        Value::Map(entries) => {
            buf.push('[');
            for (k, v) in entries {
                write_text(buf, k);
                buf.push(':');
                write_member(buf, v, elem);
            }
            buf.push(']');
        }
        // An object outside a resource element: key order is all we have.
        Value::Object(fields) => {
            buf.push('<');
            for (k, v) in fields {
                write_text(buf, k);
                buf.push(':');
                write_value(buf, Some(v), None);
            }
            buf.push('>');
        }
    }
    buf.push(';');
}

fn write_text(buf: &mut String, text: &str) {
    for c in text.chars() {
        if matches!(c, '\\' | ';' | ':' | '<' | '>' | '(' | ')' | '[' | ']' | '{' | '}') {
            buf.push('\\');
        }
        buf.push(c);
    }
}

fn write_member(buf: &mut String, value: &Value, elem: Option<&Elem>) {
    match elem {
        Some(Elem::Resource(r)) => {
            buf.push('<');
            serialize_resource_for_hash(buf, value, r);
            buf.push_str(">;");
        }
        Some(Elem::Schema(s)) => write_value(buf, Some(value), s.elem.as_ref()),
        None => write_value(buf, Some(value), None),
    }
}
