mod common;

use common::{data, firewall, flat, int_set, int_set_schema};
use pretty_assertions::assert_eq;
use provisio_engine::{Error, ResourceData};
use provisio_schema::{Resource, Schema, ValueType};
use provisio_types::{
    AttrDiff, ResourceConfig, ResourceDependency, ResourceDiff, ResourceState, Set, Value, hashcode,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn with_state(resource: &Arc<Resource>, pairs: &[(&str, &str)]) -> ResourceData {
    let state = ResourceState {
        id: "fw-1".to_string(),
        attributes: flat(pairs),
        ..ResourceState::default()
    };
    ResourceData::new(Arc::clone(resource), Some(state), None)
}

// ============================================================================
// Reads across layers
// ============================================================================

#[test]
fn diff_value_is_read_without_state() {
    let resource = Arc::new(Resource::new().with_field(
        "availability_zone",
        Schema::string().optional().computed().force_new(),
    ));
    let diff = ResourceDiff::from_attributes([(
        "availability_zone",
        AttrDiff::change("", "foo").with_requires_new(true),
    )]);
    let d = ResourceData::new(resource, None, Some(diff));

    assert_eq!(d.get("availability_zone").unwrap(), Value::from("foo"));
    assert_eq!(
        d.get_change("availability_zone").unwrap(),
        (Value::from(""), Value::from("foo"))
    );
    assert!(d.has_change("availability_zone").unwrap());
}

#[test]
fn list_is_read_from_state() {
    let d = with_state(
        &firewall(),
        &[("weights.#", "3"), ("weights.0", "1"), ("weights.1", "2"), ("weights.2", "5")],
    );
    assert_eq!(d.get("weights").unwrap(), Value::list([1, 2, 5]));
    assert_eq!(d.get("weights.1").unwrap(), Value::Int(2));
    assert_eq!(d.get("weights.#").unwrap(), Value::Int(3));
    assert_eq!(d.get_ok("weights.7").unwrap(), (Value::Int(0), false));
}

#[test]
fn overwriting_a_set_collapses_duplicates() {
    let mut d = with_state(&firewall(), &[("ports.#", "1"), ("ports.80", "80")]);
    d.set("ports", Value::list([100, 125, 125])).unwrap();
    let ports = d.get("ports").unwrap();
    assert_eq!(ports.as_set().unwrap().list(), vec![Value::Int(100), Value::Int(125)]);
}

#[test]
fn unset_nested_set_reads_as_empty() {
    let inner = Resource::new()
        .with_field("port", Schema::int().required())
        .with_field("set", int_set_schema().optional());
    let ports = Schema::set(inner).optional().with_hash(|v| {
        v.as_map()
            .and_then(|m| m.get("port"))
            .and_then(Value::as_int)
            .unwrap_or(0)
    });
    let resource = Arc::new(Resource::new().with_field("ports", ports));
    let mut d = data(&resource);

    d.set("ports", Value::list([Value::map([("port", 80)])])).unwrap();
    let value = d.get("ports").unwrap();
    let set = value.as_set().unwrap();
    assert_eq!(set.codes(), vec![80]);
    assert_eq!(
        set.list(),
        vec![Value::object([("port", Value::Int(80)), ("set", int_set(&[]))])]
    );
    assert_eq!(d.get("ports.0.set").unwrap().as_set().map(Set::len), Some(0));
}

#[test]
fn removed_map_in_list_reads_as_empty() {
    let resource = firewall();
    let state = ResourceState::with_attributes("app", [("config_vars.0.FOO", "bar")]);
    let diff = ResourceDiff::from_attributes([
        ("config_vars.0.FOO", AttrDiff::removed("bar")),
        ("config_vars.#", AttrDiff::change("1", "0")),
    ]);
    let d = ResourceData::new(resource, Some(state), Some(diff));
    assert_eq!(d.get("config_vars").unwrap(), Value::List(Vec::new()));
    assert_eq!(
        d.get_change("config_vars").unwrap(),
        (Value::List(Vec::new()), Value::List(Vec::new()))
    );
    assert!(!d.has_change("config_vars").unwrap());
}

#[test]
fn elements_without_a_count_read_as_absent() {
    let d = with_state(&firewall(), &[("name", "web"), ("weights.0", "4"), ("ingress.0.from", "80")]);
    assert_eq!(d.get_ok("weights").unwrap(), (Value::List(Vec::new()), false));
    assert_eq!(d.get_ok("ingress.0.from").unwrap(), (Value::Int(0), false));

    let state = d.state().unwrap().unwrap();
    assert_eq!(state.attributes, flat(&[("id", "fw-1"), ("name", "web")]));
}

#[test]
fn config_layer_is_read() {
    let config = ResourceConfig::new()
        .with("name", "web")
        .with("size", "4")
        .with("config_vars", Value::list([Value::map([("foo", "bar")])]));
    let d = data(&firewall()).with_config(config);

    assert_eq!(d.get("name").unwrap(), Value::from("web"));
    assert_eq!(d.get("size").unwrap(), Value::Int(4));
    assert_eq!(d.get("config_vars.#").unwrap(), Value::Int(1));
    assert_eq!(d.get("config_vars.0.foo").unwrap(), Value::from("bar"));
    assert_eq!(
        d.get("config_vars").unwrap(),
        Value::list([Value::map([("foo", "bar")])])
    );
}

#[test]
fn config_replaces_state_subtree() {
    let config = ResourceConfig::new().with("config_vars", Value::list([Value::map([("bar", "baz")])]));
    let d = with_state(
        &firewall(),
        &[("config_vars.#", "1"), ("config_vars.0.#", "1"), ("config_vars.0.foo", "bar")],
    )
    .with_config(config);
    assert_eq!(
        d.get("config_vars").unwrap(),
        Value::list([Value::map([("bar", "baz")])])
    );
    assert_eq!(d.get_ok("config_vars.0.foo").unwrap(), (Value::from(""), false));
}

#[test]
fn unknown_config_reads_as_missing() {
    let config = ResourceConfig::new().with_unknown("name");
    let d = with_state(&firewall(), &[("name", "old")]).with_config(config);
    assert_eq!(d.get_ok("name").unwrap(), (Value::from(""), false));
}

#[test]
fn diff_overrides_config() {
    let config = ResourceConfig::new().with("size", 1);
    let diff = ResourceDiff::from_attributes([("size", AttrDiff::change("", "2"))]);
    let d = ResourceData::new(firewall(), None, Some(diff)).with_config(config);
    assert_eq!(d.get("size").unwrap(), Value::Int(2));
}

#[test]
fn computed_diff_reads_as_missing() {
    let diff = ResourceDiff::from_attributes([("arn", AttrDiff::computed("arn:old"))]);
    let d = ResourceData::new(
        firewall(),
        Some(ResourceState::with_attributes("fw-1", [("arn", "arn:old")])),
        Some(diff),
    );
    assert_eq!(d.get_ok("arn").unwrap(), (Value::from(""), false));
    assert!(d.has_change("arn").unwrap());
}

#[test]
fn computed_count_hides_collection() {
    let diff = ResourceDiff::from_attributes([("weights.#", AttrDiff::computed("1"))]);
    let d = ResourceData::new(
        firewall(),
        Some(ResourceState::with_attributes("fw-1", [("weights.#", "1"), ("weights.0", "9")])),
        Some(diff),
    );
    assert_eq!(d.get_ok("weights").unwrap(), (Value::List(Vec::new()), false));
    assert_eq!(d.get_ok("weights.0").unwrap(), (Value::Int(0), false));
}

#[test]
fn zero_values_report_not_set() {
    let d = with_state(&firewall(), &[("size", "0"), ("name", "web")]);
    assert_eq!(d.get_ok("size").unwrap(), (Value::Int(0), false));
    assert_eq!(d.get_ok("name").unwrap(), (Value::from("web"), true));
    assert_eq!(d.get_ok("tags").unwrap(), (Value::Map(BTreeMap::new()), false));
}

#[test]
fn objects_are_zero_filled() {
    let d = with_state(&firewall(), &[("ingress.#", "1"), ("ingress.0.from", "22")]);
    assert_eq!(
        d.get("ingress").unwrap(),
        Value::list([Value::object([("from", 22), ("to", 0)])])
    );
    assert_eq!(d.get("ingress.0.to").unwrap(), Value::Int(0));
}

#[test]
fn map_entries_and_count() {
    let d = with_state(&firewall(), &[("tags.#", "2"), ("tags.env", "prod"), ("tags.a.b", "c")]);
    assert_eq!(d.get("tags.env").unwrap(), Value::from("prod"));
    assert_eq!(d.get("tags.a.b").unwrap(), Value::from("c"));
    assert_eq!(d.get("tags.#").unwrap(), Value::Int(2));
    assert_eq!(d.get_ok("tags.missing").unwrap(), (Value::from(""), false));
}

#[test]
fn unknown_paths_are_errors() {
    let d = data(&firewall());
    for key in ["bogus", "name.0", "ingress.0.port", "weights.x", "enabled.x", "weights.#.x"] {
        assert!(
            matches!(d.get(key), Err(Error::UnknownKey { .. })),
            "{key} should be an unknown key"
        );
    }
}

#[test]
fn malformed_state_is_diff_error() {
    let d = with_state(&firewall(), &[("ports.#", "2"), ("ports.80", "80")]);
    assert!(matches!(d.get("ports"), Err(Error::Diff { .. })));
}

// ============================================================================
// Set positional addressing
// ============================================================================

#[test]
fn set_index_is_position_in_hash_order() {
    let d = with_state(
        &firewall(),
        &[("ports.#", "3"), ("ports.443", "443"), ("ports.22", "22"), ("ports.80", "80")],
    );
    assert_eq!(d.get("ports.0").unwrap(), Value::Int(22));
    assert_eq!(d.get("ports.1").unwrap(), Value::Int(80));
    assert_eq!(d.get("ports.2").unwrap(), Value::Int(443));
    assert_eq!(d.get("ports.#").unwrap(), Value::Int(3));
}

#[test]
fn set_index_is_not_the_hash_code() {
    let d = with_state(&firewall(), &[("ports.#", "1"), ("ports.80", "80")]);
    assert_eq!(d.get_ok("ports.80").unwrap(), (Value::Int(0), false));
    assert_eq!(d.get("ports.0").unwrap(), Value::Int(80));
}

#[test]
fn set_index_reaches_object_fields() {
    let resource = firewall();
    let low = Value::object([("from", 1), ("to", 2)]);
    let high = Value::object([("from", 3), ("to", 4)]);
    let mut d = data(&resource);
    d.set("rules", Value::list([high.clone(), low.clone()])).unwrap();

    let hash = resource.field("rules").unwrap().hash_fn().unwrap();
    let (first, second) = if hash(&low) < hash(&high) { (low, high) } else { (high, low) };
    assert_eq!(d.get("rules.0").unwrap(), first);
    assert_eq!(d.get("rules.1.from").unwrap(), second.as_map().unwrap()["from"].clone());
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn set_then_get() {
    let mut d = data(&firewall());
    d.set("name", "web").unwrap();
    d.set("size", 3).unwrap();
    d.set("tags", Value::map([("env", "prod")])).unwrap();
    assert_eq!(d.get("name").unwrap(), Value::from("web"));
    assert_eq!(d.get("size").unwrap(), Value::Int(3));
    assert_eq!(d.get("tags.env").unwrap(), Value::from("prod"));
}

#[test]
fn set_overrides_diff() {
    let diff = ResourceDiff::from_attributes([("arn", AttrDiff::computed(""))]);
    let mut d = ResourceData::new(firewall(), None, Some(diff));
    d.set("arn", "arn:fw-1").unwrap();
    assert_eq!(d.get_ok("arn").unwrap(), (Value::from("arn:fw-1"), true));
}

#[test]
fn set_list_element_and_nested_field() {
    let mut d = with_state(
        &firewall(),
        &[
            ("weights.#", "2"),
            ("weights.0", "1"),
            ("weights.1", "2"),
            ("ingress.#", "1"),
            ("ingress.0.from", "8"),
            ("ingress.0.to", "9"),
        ],
    );
    d.set("weights.1", 7).unwrap();
    d.set("ingress.0.from", 80).unwrap();
    assert_eq!(d.get("weights").unwrap(), Value::list([1, 7]));
    assert_eq!(
        d.get("ingress").unwrap(),
        Value::list([Value::object([("from", 80), ("to", 9)])])
    );
}

#[test]
fn set_whole_field_replaces_element_writes() {
    let mut d = with_state(&firewall(), &[("weights.#", "2"), ("weights.0", "1"), ("weights.1", "2")]);
    d.set("weights.0", 5).unwrap();
    d.set("weights", Value::list([9])).unwrap();
    assert_eq!(d.get("weights").unwrap(), Value::list([9]));
}

#[test]
fn shrinking_a_list_drops_old_elements() {
    let mut d = with_state(&firewall(), &[("weights.#", "3"), ("weights.0", "1"), ("weights.1", "2"), ("weights.2", "3")]);
    d.set("weights", Value::list([4])).unwrap();
    let state = d.state().unwrap().unwrap();
    assert_eq!(
        state.attributes,
        flat(&[("id", "fw-1"), ("weights.#", "1"), ("weights.0", "4")])
    );
}

#[test]
fn failed_set_changes_nothing() {
    let mut d = with_state(&firewall(), &[("name", "web"), ("weights.#", "1"), ("weights.0", "1")]);

    let err = d.set("name", 5).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { expected: "string", actual: "int", .. }));
    let err = d.set("weights", Value::list([Value::Int(1), Value::from("x")])).unwrap_err();
    assert_eq!(err.key(), Some("weights.1"));

    assert_eq!(d.get("name").unwrap(), Value::from("web"));
    assert_eq!(d.get("weights").unwrap(), Value::list([1]));
}

#[test]
fn unsettable_paths_are_rejected() {
    let mut d = with_state(
        &firewall(),
        &[("ports.#", "1"), ("ports.80", "80"), ("ingress.#", "1"), ("ingress.0.from", "1")],
    );
    for key in ["ports.0", "tags.env", "ingress.#", "ingress.5.from", "weights.0"] {
        assert!(
            matches!(d.set(key, 1), Err(Error::Validation { .. })),
            "{key} should not be settable"
        );
    }
    assert!(matches!(d.set("bogus", 1), Err(Error::UnknownKey { .. })));
    assert!(matches!(d.set("ingress.0.port", 1), Err(Error::UnknownKey { .. })));
}

#[test]
fn typed_set_values_are_accepted() {
    let mut d = data(&firewall());
    let ports = Set::from_values(hashcode::int_identity(), [Value::Int(22)]);
    d.set("ports", ports).unwrap();
    assert_eq!(d.get("ports").unwrap(), int_set(&[22]));
}

// ============================================================================
// Change detection
// ============================================================================

#[test]
fn get_change_compares_state_and_diff() {
    let diff = ResourceDiff::from_attributes([
        ("size", AttrDiff::change("1", "2")),
        ("weights.#", AttrDiff::change("1", "2")),
        ("weights.1", AttrDiff::change("", "9")),
    ]);
    let state = ResourceState::with_attributes(
        "fw-1",
        [("size", "1"), ("name", "web"), ("weights.#", "1"), ("weights.0", "4")],
    );
    let d = ResourceData::new(firewall(), Some(state), Some(diff));

    assert_eq!(d.get_change("size").unwrap(), (Value::Int(1), Value::Int(2)));
    assert_eq!(
        d.get_change("weights").unwrap(),
        (Value::list([4]), Value::list([4, 9]))
    );
    assert!(d.has_change("size").unwrap());
    assert!(d.has_change("weights.#").unwrap());
    assert!(!d.has_change("weights.0").unwrap());
    assert!(!d.has_change("name").unwrap());
}

#[test]
fn get_change_ignores_overrides() {
    let mut d = with_state(&firewall(), &[("size", "1")]);
    d.set("size", 5).unwrap();
    assert_eq!(d.get_change("size").unwrap(), (Value::Int(1), Value::Int(1)));
    assert!(!d.has_change("size").unwrap());
}

#[test]
fn get_change_applies_state_func_to_new() {
    let resource = Arc::new(Resource::new().with_field(
        "user_data",
        Schema::string().optional().with_state_func(|v| v.to_string().to_lowercase()),
    ));
    let diff = ResourceDiff::from_attributes([("user_data", AttrDiff::change("", "HELLO"))]);
    let d = ResourceData::new(resource, None, Some(diff));
    assert_eq!(d.get_change("user_data").unwrap(), (Value::from(""), Value::from("hello")));
}

// ============================================================================
// Identity and state output
// ============================================================================

#[test]
fn empty_id_means_no_state() {
    let mut d = with_state(&firewall(), &[("name", "web")]);
    assert_eq!(d.id(), "fw-1");
    d.set_id("");
    assert_eq!(d.id(), "");
    assert_eq!(d.state().unwrap(), None);
}

#[test]
fn new_resource_state() {
    let mut d = data(&firewall());
    assert_eq!(d.state().unwrap(), None);
    d.set_id("fw-9");
    d.set("name", "web").unwrap();
    d.set("ports", Value::list([443, 80])).unwrap();
    d.set("tags", Value::map([("env", "prod")])).unwrap();
    d.set_conn_info(BTreeMap::from([("host".to_string(), "10.0.0.1".to_string())]));
    d.set_dependencies(vec![ResourceDependency::new("vpc-1")]);

    let state = d.state().unwrap().unwrap();
    assert_eq!(state.id, "fw-9");
    assert_eq!(
        state.attributes,
        flat(&[
            ("id", "fw-9"),
            ("name", "web"),
            ("ports.#", "2"),
            ("ports.443", "443"),
            ("ports.80", "80"),
            ("tags.#", "1"),
            ("tags.env", "prod"),
        ])
    );
    assert_eq!(state.conn_info.get("host").map(String::as_str), Some("10.0.0.1"));
    assert_eq!(state.dependencies, vec![ResourceDependency::new("vpc-1")]);
    assert_eq!(d.dependencies(), [ResourceDependency::new("vpc-1")]);
}

#[test]
fn state_merges_all_layers() {
    let prior = ResourceState::with_attributes(
        "fw-1",
        [
            ("name", "web"),
            ("size", "1"),
            ("arn", "arn:old"),
            ("tags.#", "1"),
            ("tags.env", "prod"),
        ],
    );
    let diff = ResourceDiff::from_attributes([
        ("size", AttrDiff::change("1", "2")),
        ("arn", AttrDiff::computed("arn:old")),
        ("tags.env", AttrDiff::removed("prod")),
        ("tags.#", AttrDiff::removed("1")),
    ]);
    let mut d = ResourceData::new(firewall(), Some(prior), Some(diff));
    d.set("enabled", true).unwrap();

    let state = d.state().unwrap().unwrap();
    assert_eq!(
        state.attributes,
        flat(&[("enabled", "true"), ("id", "fw-1"), ("name", "web"), ("size", "2")])
    );
}

#[test]
fn legacy_map_without_count_gains_one() {
    let d = with_state(&firewall(), &[("tags.env", "prod")]);
    let state = d.state().unwrap().unwrap();
    assert_eq!(state.attributes, flat(&[("id", "fw-1"), ("tags.#", "1"), ("tags.env", "prod")]));
}

#[test]
fn identity_writes_do_not_touch_attributes() {
    let state = ResourceState {
        id: "fw-1".to_string(),
        attributes: flat(&[("name", "web")]),
        conn_info: BTreeMap::from([("host".to_string(), "old".to_string())]),
        ..ResourceState::default()
    };
    let mut d = ResourceData::new(firewall(), Some(state), None);
    assert_eq!(d.conn_info().and_then(|c| c.get("host")).map(String::as_str), Some("old"));
    d.set_conn_info(BTreeMap::new());
    assert!(d.conn_info().is_some_and(BTreeMap::is_empty));
    assert_eq!(d.get("name").unwrap(), Value::from("web"));
}

#[test]
fn float_fields_round_trip_through_state() {
    let resource = Arc::new(
        Resource::new()
            .with_field("ratio", Schema::float().optional())
            .with_field("limits", Schema::map_of(ValueType::Int).optional()),
    );
    let mut d = data(&resource);
    d.set_id("r-1");
    d.set("ratio", 2).unwrap();
    d.set("limits", Value::map([("cpu", 4)])).unwrap();
    assert_eq!(d.get("ratio").unwrap(), Value::Float(2.0));
    assert_eq!(d.get("limits.cpu").unwrap(), Value::Int(4));
    assert_eq!(
        d.state().unwrap().unwrap().attributes,
        flat(&[("id", "r-1"), ("limits.#", "1"), ("limits.cpu", "4"), ("ratio", "2")])
    );
}
