//! Tests for the JSON and MessagePack artifact encodings.
//!
//! Both encodings must round-trip every field, keep empty collections as
//! empty collections and keep absent optionals explicitly absent.

use std::path::{Path, PathBuf};

use codeanalyzer::analysis::{extract_file, extract_source, NoResolution, PyCallEdge};
use codeanalyzer::pipeline::reduce;
use codeanalyzer::report::encode;
use codeanalyzer::{OutputFormat, PyApplication};

fn testdata_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

/// Nested classes and functions plus a module with nothing in it.
fn application() -> PyApplication {
    let root = testdata_path().join("nested");
    let nested = extract_file(&root.join("app.py"), &root, &NoResolution).unwrap();
    let empty = extract_source(Path::new("/virtual/empty.py"), "empty", b"", &NoResolution)
        .unwrap();

    let mut app = reduce(vec![nested, empty]);
    app.call_graph = Some(vec![PyCallEdge {
        source: "app.build".to_string(),
        target: "app.build.helper".to_string(),
        file: "app.py".to_string(),
        line: 54,
    }]);
    app
}

#[test]
fn test_json_round_trip() {
    let app = application();
    let encoded = app.to_json().unwrap();
    let decoded = PyApplication::from_json(&encoded).unwrap();
    assert_eq!(decoded.to_json().unwrap(), encoded);
}

#[test]
fn test_msgpack_round_trip() {
    let app = application();
    let encoded = app.to_msgpack().unwrap();
    let decoded = PyApplication::from_msgpack(&encoded).unwrap();
    assert_eq!(decoded.to_msgpack().unwrap(), encoded);
    assert_eq!(decoded.to_json().unwrap(), app.to_json().unwrap());
}

#[test]
fn test_empty_collections_are_not_null() {
    let app = application();
    let value: serde_json::Value = serde_json::from_str(&app.to_json().unwrap()).unwrap();
    let empty = &value["symbol_table"]["/virtual/empty.py"];

    for field in ["imports", "comments", "variables"] {
        assert_eq!(empty[field], serde_json::json!([]), "{} should be []", field);
    }
    for field in ["classes", "functions"] {
        assert_eq!(empty[field], serde_json::json!({}), "{} should be {{}}", field);
    }
}

#[test]
fn test_absent_optionals_are_explicit() {
    let mut app = application();
    app.call_graph = None;
    let value: serde_json::Value = serde_json::from_str(&app.to_json().unwrap()).unwrap();
    assert!(value.as_object().unwrap().contains_key("call_graph"));
    assert!(value["call_graph"].is_null());

    let decoded = PyApplication::from_msgpack(&app.to_msgpack().unwrap()).unwrap();
    assert!(decoded.call_graph.is_none());

    let module = decoded.symbol_table.values().find(|m| m.module_name == "app").unwrap();
    let leaf = &module.functions["build"].inner_callables["helper"].inner_callables["leaf"];
    assert!(leaf.docstring.is_none());
    assert!(leaf.return_type.is_none());
}

#[test]
fn test_empty_call_graph_differs_from_absent() {
    let mut app = application();
    app.call_graph = Some(Vec::new());
    let decoded = PyApplication::from_msgpack(&app.to_msgpack().unwrap()).unwrap();
    assert_eq!(decoded.call_graph, Some(Vec::new()));
}

#[test]
fn test_encode_matches_format() {
    let app = application();
    let json = encode(&app, OutputFormat::Json).unwrap();
    assert_eq!(json.first(), Some(&b'{'));
    let msgpack = encode(&app, OutputFormat::Msgpack).unwrap();
    assert_eq!(PyApplication::from_msgpack(&msgpack).unwrap(), app);
}
