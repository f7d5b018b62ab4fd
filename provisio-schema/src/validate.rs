//! Validation of a configuration against a resource schema.

use crate::coerce::{self, Mode};
use crate::flatmap::join;
use crate::schema::{Elem, Resource, Schema};
use provisio_types::{Error, ResourceConfig, Value};
use std::collections::BTreeMap;

impl Resource {
    /// Checks `config` against this schema.
    ///
    /// Returns `(warnings, errors)`; the configuration is valid when
    /// `errors` is empty. Unknown paths are not checked beyond their
    /// presence.
    #[must_use]
    pub fn validate(&self, config: &ResourceConfig) -> (Vec<String>, Vec<Error>) {
        let mut validator = Validator {
            config,
            warnings: Vec::new(),
            errors: Vec::new(),
        };
        validator.object("", self, Some(config.raw()));
        (validator.warnings, validator.errors)
    }
}

struct Validator<'a> {
    config: &'a ResourceConfig,
    warnings: Vec<String>,
    errors: Vec<Error>,
}

impl Validator<'_> {
    fn object(&mut self, prefix: &str, resource: &Resource, fields: Option<&BTreeMap<String, Value>>) {
        for (name, schema) in &resource.schema {
            let key = join(prefix, name);
            let unknown = self.config.is_unknown(&key);
            let value = fields.and_then(|f| f.get(name));

            if value.is_none() && !unknown {
                if schema.required && schema.default.is_none() {
                    self.errors.push(Error::validation(key, "required field is not set"));
                }
                continue;
            }
            if schema.is_computed_only() {
                self.errors.push(Error::validation(&key, "computed attribute cannot be set"));
                continue;
            }
            if let Some(message) = &schema.deprecated {
                self.warnings.push(format!("{key}: {message}"));
            }
            if let (Some(value), false) = (value, unknown) {
                self.value(&key, value, schema);
            }
        }

        for name in fields.into_iter().flat_map(BTreeMap::keys) {
            if !resource.schema.contains_key(name) {
                self.errors.push(Error::unknown_key(join(prefix, name)));
            }
        }
    }

    fn value(&mut self, key: &str, value: &Value, schema: &Schema) {
        let Some(Elem::Resource(nested)) = &schema.elem else {
            if let Err(err) = coerce::coerce(key, value, schema, Mode::Weak) {
                self.errors.push(err);
            }
            return;
        };
        let items: Vec<&Value> = match value {
            Value::List(items) => items.iter().collect(),
            Value::Set(set) => set.iter().collect(),
            other => {
                self.errors.push(Error::config(
                    key,
                    format!("cannot convert {} to {}", other.type_name(), schema.value_type),
                ));
                return;
            }
        };
        for (i, item) in items.into_iter().enumerate() {
            let elem_key = join(key, &i.to_string());
            if self.config.is_unknown(&elem_key) {
                continue;
            }
            match item.as_map() {
                Some(fields) => self.object(&elem_key, nested, Some(fields)),
                None => self.errors.push(Error::config(
                    elem_key,
                    format!("cannot convert {} to object", item.type_name()),
                )),
            }
        }
    }
}
