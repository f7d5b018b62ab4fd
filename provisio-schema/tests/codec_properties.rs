//! Property-based tests for the flat attribute codec.
//!
//! Generated records are encoded and decoded again; the decoded fields must
//! equal the input and re-encoding must reproduce the same flat map.

use proptest::prelude::*;
use provisio_schema::flatmap::{decode_object, encode_object};
use provisio_schema::hash::resource_hash;
use provisio_schema::{Mode, Resource, Schema, ValueType, coerce};
use provisio_types::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

fn rule() -> Arc<Resource> {
    Arc::new(
        Resource::new()
            .with_field("from", Schema::int().required())
            .with_field("to", Schema::int().optional()),
    )
}

fn record() -> Resource {
    Resource::new()
        .with_field("name", Schema::string().required())
        .with_field("enabled", Schema::bool().optional())
        .with_field("weights", Schema::list(ValueType::Int).optional())
        .with_field(
            "ports",
            Schema::set(ValueType::Int).optional().with_hash(|v| v.as_int().unwrap_or(0)),
        )
        .with_field("rules", Schema::set(rule()).optional())
        .with_field("tags", Schema::map().optional())
}

prop_compose! {
    fn arb_record()(
        name in "[a-z0-9.-]{0,12}",
        enabled in any::<bool>(),
        weights in prop::collection::vec(any::<i64>(), 0..5),
        ports in prop::collection::vec(1i64..65536, 0..6),
        rules in prop::collection::vec((-100i64..100, -100i64..100), 0..4),
        tags in prop::collection::btree_map(
            "[a-z0-9#.:;_-]{1,6}".prop_filter("count segment", |k| k.as_str() != "#"),
            "[ -~]{0,8}",
            1..4,
        ),
    ) -> BTreeMap<String, Value> {
        let resource = record();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from(name));
        fields.insert("enabled".to_string(), Value::Bool(enabled));
        fields.insert("weights".to_string(), Value::list(weights));
        fields.insert("tags".to_string(), Value::map(tags));
        let ports = Value::list(ports);
        let rules = Value::List(
            rules.into_iter().map(|(from, to)| Value::object([("from", from), ("to", to)])).collect(),
        );
        for (name, value) in [("ports", ports), ("rules", rules)] {
            let schema = resource.field(name).cloned().unwrap_or_default();
            if let Ok(set) = coerce(name, &value, &schema, Mode::Strict) {
                fields.insert(name.to_string(), set);
            }
        }
        fields
    }
}

proptest! {
    #[test]
    fn decode_inverts_encode(fields in arb_record()) {
        let resource = record();
        let flat = encode_object(&resource, &fields).unwrap();
        let decoded = decode_object(&resource, &flat).unwrap();
        prop_assert_eq!(&decoded, &fields);
        prop_assert_eq!(encode_object(&resource, &decoded).unwrap(), flat);
    }

    /// Every stored key belongs to a declared top-level field.
    #[test]
    fn keys_stay_under_their_field(fields in arb_record()) {
        let resource = record();
        let flat = encode_object(&resource, &fields).unwrap();
        for key in flat.keys() {
            let top = key.split('.').next().unwrap_or(key);
            prop_assert!(resource.field(top).is_some(), "stray key {}", key);
        }
    }

    /// Set element hashes do not depend on field insertion order.
    #[test]
    fn object_hash_is_order_independent(from in any::<i64>(), to in any::<i64>()) {
        let hash = resource_hash(&rule());
        let forward = Value::object([("from", from), ("to", to)]);
        let mut reversed = BTreeMap::new();
        reversed.insert("to".to_string(), Value::Int(to));
        reversed.insert("from".to_string(), Value::Int(from));
        prop_assert_eq!(hash(&forward), hash(&Value::Object(reversed)));
    }
}
