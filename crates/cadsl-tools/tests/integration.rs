use std::sync::Arc;

use serde_json::{json, Map, Value};

use cadsl_tools::{ToolRegistry, Transformer, Tree};
use cadsl_types::{Context, Fault, KnowledgeStore, Table};

struct FixtureStore {
    rows: Vec<Value>,
}

impl KnowledgeStore for FixtureStore {
    fn execute_query(&self, _query: &str) -> Result<Table, Fault> {
        Ok(Table::from_rows(
            self.rows.iter().filter_map(|r| r.as_object().cloned()).collect(),
        ))
    }
}

struct BrokenStore;

impl KnowledgeStore for BrokenStore {
    fn execute_query(&self, _query: &str) -> Result<Table, Fault> {
        Err(Fault::new("unknown predicate inFile"))
    }
}

fn registry(tree: Value) -> ToolRegistry {
    let tree: Tree = serde_json::from_value(tree).unwrap();
    let specs = Transformer::default().transform(&tree).unwrap();
    let mut registry = ToolRegistry::default();
    registry.register_all(specs).unwrap();
    registry
}

fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn list_modules_tree() -> Value {
    json!({
        "data": "start",
        "children": [{
            "data": "tool_def",
            "children": [
                {"data": "tool_type", "children": [{"data": "query", "children": []}]},
                {"type": "NAME", "value": "list_modules"},
                {"data": "docstring", "children": [{"type": "DOCSTRING", "value": "\"\"\"List modules by file.\"\"\""}]},
                {"data": "param_def", "children": [
                    {"type": "NAME", "value": "limit"},
                    {"data": "type_spec", "children": [{"type": "NAME", "value": "int"}]},
                    {"data": "default_mod", "children": [{"type": "NUMBER", "value": "100"}]}
                ]},
                {"data": "pipeline", "children": [
                    {"data": "source", "children": [{"data": "reql_source", "children": [
                        {"type": "REQL_BLOCK", "value": "{SELECT ?m ?name ?file WHERE { ?m type {Module} . ?m name ?name . ?m inFile ?file }}"}
                    ]}]},
                    {"data": "step", "children": [{"data": "select_step", "children": [
                        {"type": "NAME", "value": "name"},
                        {"type": "NAME", "value": "file"}
                    ]}]},
                    {"data": "step", "children": [{"data": "order_by_step", "children": [
                        {"type": "NAME", "value": "file"}
                    ]}]},
                    {"data": "step", "children": [{"data": "limit_step", "children": [
                        {"data": "param_ref", "children": [{"type": "NAME", "value": "limit"}]}
                    ]}]},
                    {"data": "step", "children": [{"data": "emit_step", "children": [
                        {"type": "NAME", "value": "modules"}
                    ]}]}
                ]}
            ]
        }]
    })
}

fn module_rows(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({"?m": format!("m{i}"), "?name": format!("mod{i}"), "?file": format!("f{i:02}.py")}))
        .collect()
}

#[test]
fn list_modules_end_to_end() {
    let registry = registry(list_modules_tree());
    let store = Arc::new(FixtureStore {
        rows: vec![
            json!({"?m": "m1", "?name": "a", "?file": "b.py"}),
            json!({"?m": "m2", "?name": "c", "?file": "a.py"}),
        ],
    });
    let out = registry.invoke("list_modules", &Map::new(), &Context::new(store));
    assert_eq!(
        out,
        json!({
            "success": true,
            "modules": [{"name": "c", "file": "a.py"}, {"name": "a", "file": "b.py"}],
            "count": 2
        })
    );
    let tool = registry.get("list_modules").unwrap();
    assert_eq!(tool.spec().description, "List modules by file.");
}

#[test]
fn parameterized_limit_through_the_registry() {
    let registry = registry(list_modules_tree());
    let ctx = Context::new(Arc::new(FixtureStore { rows: module_rows(10) }));

    let limited = registry.invoke("list_modules", &args(&[("limit", json!(5))]), &ctx);
    assert_eq!(limited["count"], json!(5));

    let defaulted = registry.invoke("list_modules", &Map::new(), &ctx);
    assert_eq!(defaulted["count"], json!(10));
}

#[test]
fn failing_source_is_reported_not_raised() {
    let registry = registry(list_modules_tree());
    let ctx = Context::new(Arc::new(BrokenStore)).with_language("python");
    let out = registry.invoke("list_modules", &Map::new(), &ctx);
    assert_eq!(
        out,
        json!({
            "success": false,
            "error": "Query failed: unknown predicate inFile: SELECT ?m ?name ?file WHERE { ?m type py:Module . ?m name ?name . ?m inFile ?file }"
        })
    );
}

#[test]
fn tap_then_render_of_a_diagram_tool() {
    let tree = json!({
        "data": "tool_def",
        "children": [
            {"data": "tool_type", "children": [{"data": "diagram", "children": []}]},
            {"type": "NAME", "value": "call_graph"},
            {"data": "pipeline", "children": [
                {"data": "source", "children": [{"data": "reql_source", "children": [
                    {"type": "REQL_BLOCK", "value": "{SELECT ?from ?to WHERE { ?from calls ?to }}"}
                ]}]},
                {"data": "select_step", "children": [
                    {"type": "VAR", "value": "?from"},
                    {"type": "VAR", "value": "?to"}
                ]},
                {"data": "tap_step", "children": [{"type": "NAME", "value": "graph"}]},
                {"data": "render_step", "children": [{"type": "STRING", "value": "\"json\""}]},
                {"data": "emit_step", "children": [{"type": "NAME", "value": "diagram"}]}
            ]}
        ]
    });
    let registry = registry(tree);
    let store = Arc::new(FixtureStore {
        rows: vec![
            json!({"?from": "main", "?to": "parse"}),
            json!({"?from": "parse", "?to": "lex"}),
        ],
    });
    let out = registry.invoke("call_graph", &Map::new(), &Context::new(store));
    assert_eq!(out["success"], json!(true));
    assert_eq!(out["format"], json!("mermaid"));
    let rendered: Value = serde_json::from_str(out["diagram"].as_str().unwrap()).unwrap();
    assert_eq!(rendered["nodes"], json!(["main", "parse", "lex"]));
    assert_eq!(
        rendered["edges"],
        json!([{"from": "main", "to": "parse"}, {"from": "parse", "to": "lex"}])
    );
}

#[test]
fn detector_with_filter_and_inline_code() {
    let tree = json!({
        "data": "tool_def",
        "children": [
            {"data": "tool_type", "children": [{"data": "detector", "children": []}]},
            {"type": "NAME", "value": "long_functions"},
            {"data": "metadata", "children": [
                {"data": "meta_item", "children": [{"type": "NAME", "value": "category"}, {"type": "STRING", "value": "\"complexity\""}]}
            ]},
            {"data": "param_def", "children": [
                {"type": "NAME", "value": "min_lines"},
                {"data": "type_spec", "children": [{"type": "NAME", "value": "int"}]},
                {"data": "default_mod", "children": [{"type": "NUMBER", "value": "50"}]}
            ]},
            {"data": "pipeline", "children": [
                {"data": "source", "children": [{"data": "value_source", "children": [{"type": "PARAM", "value": "{functions}"}]}]},
                {"data": "filter_step", "children": [
                    {"data": "comparison", "children": [
                        {"type": "NAME", "value": "lines"},
                        {"type": "COMP_OP", "value": ">="},
                        {"data": "param_ref", "children": [{"type": "NAME", "value": "min_lines"}]}
                    ]}
                ]},
                {"data": "python_step", "children": [{"type": "PYTHON_BLOCK", "value": "{ result = {'findings': rows, 'worst': rows[0].name} }"}]}
            ]}
        ]
    });
    let registry = registry(tree);
    let functions = json!([
        {"name": "huge", "lines": 120},
        {"name": "tiny", "lines": 4},
        {"name": "big", "lines": 60}
    ]);
    let out = registry.invoke(
        "long_functions",
        &args(&[("functions", functions)]),
        &Context::detached(),
    );
    assert_eq!(out["success"], json!(true));
    assert_eq!(out["detector"], json!("long_functions"));
    assert_eq!(out["category"], json!("complexity"));
    assert_eq!(out["severity"], json!("medium"));
    assert_eq!(out["worst"], json!("huge"));
    assert_eq!(out["findings"].as_array().map(Vec::len), Some(2));
}

#[test]
fn missing_required_argument() {
    let tree = json!({
        "data": "tool_def",
        "children": [
            {"type": "NAME", "value": "find_class"},
            {"data": "param_def", "children": [
                {"type": "NAME", "value": "name"},
                {"data": "type_str", "children": []},
                {"data": "param_modifiers", "children": [{"data": "param_required", "children": []}]}
            ]},
            {"data": "pipeline", "children": [
                {"data": "source", "children": [{"data": "reql_source", "children": [
                    {"type": "REQL_BLOCK", "value": "{SELECT ?c WHERE { ?c type {Class} . ?c name \"{name}\" }}"}
                ]}]}
            ]}
        ]
    });
    let registry = registry(tree);
    let out = registry.invoke("find_class", &Map::new(), &Context::detached());
    assert_eq!(
        out,
        json!({"success": false, "error": "Required parameter 'name' not provided"})
    );
}

#[test]
fn undeclared_format_argument_does_not_change_rendering() {
    let tree = json!({
        "data": "tool_def",
        "children": [
            {"type": "NAME", "value": "report"},
            {"data": "pipeline", "children": [
                {"data": "source", "children": [{"data": "value_source", "children": [
                    {"data": "list", "children": [{"type": "INT", "value": "1"}, {"type": "INT", "value": "2"}]}
                ]}]},
                {"data": "render_step", "children": []},
                {"data": "emit_step", "children": [{"type": "NAME", "value": "report"}]}
            ]}
        ]
    });
    let registry = registry(tree);
    let plain = registry.invoke("report", &Map::new(), &Context::detached());
    let with_format = registry.invoke("report", &args(&[("format", json!("json"))]), &Context::detached());
    assert_eq!(plain, json!({"success": true, "report": "1\n2"}));
    assert_eq!(with_format, plain);
}

#[test]
fn tool_body_tree_end_to_end() {
    let tree = json!({
        "data": "start",
        "children": [{
            "data": "tool_def",
            "children": [
                {"data": "tool_query", "children": []},
                {"type": "NAME", "value": "largest_files"},
                {"data": "tool_body", "children": [
                    {"data": "docstring", "children": [{"type": "TRIPLE_STRING", "value": "\"\"\"Largest files first.\"\"\""}]},
                    {"data": "param_def", "children": [
                        {"type": "NAME", "value": "top"},
                        {"data": "type_int", "children": []},
                        {"data": "param_modifiers", "children": [
                            {"data": "param_default", "children": [{"data": "val_int", "children": [{"type": "INT", "value": "2"}]}]}
                        ]}
                    ]},
                    {"data": "pipeline", "children": [
                        {"data": "source", "children": [{"data": "reql_source", "children": [
                            {"type": "REQL_BLOCK", "value": "{SELECT ?file ?loc WHERE { ?m inFile ?file . ?m lineCount ?loc }}"}
                        ]}]},
                        {"data": "step", "children": [{"data": "select_step", "children": [
                            {"data": "field_list", "children": [
                                {"data": "field_simple", "children": [{"type": "NAME", "value": "file"}]},
                                {"data": "field_alias", "children": [{"type": "NAME", "value": "loc"}, {"type": "NAME", "value": "lines"}]}
                            ]}
                        ]}]},
                        {"data": "step", "children": [{"data": "order_by_step", "children": [
                            {"data": "order_desc", "children": [{"type": "NAME", "value": "lines"}]}
                        ]}]},
                        {"data": "step", "children": [{"data": "limit_step", "children": [
                            {"data": "limit_value", "children": [{"data": "param_ref", "children": [{"type": "NAME", "value": "top"}]}]}
                        ]}]},
                        {"data": "step", "children": [{"data": "emit_step", "children": [{"type": "NAME", "value": "files"}]}]}
                    ]}
                ]}
            ]
        }]
    });
    let registry = registry(tree);
    let tool = registry.get("largest_files").unwrap();
    assert_eq!(tool.spec().description, "Largest files first.");

    let store = Arc::new(FixtureStore {
        rows: vec![
            json!({"?file": "a.py", "?loc": 10}),
            json!({"?file": "b.py", "?loc": 300}),
            json!({"?file": "c.py", "?loc": 40}),
        ],
    });
    let ctx = Context::new(store);
    let out = registry.invoke("largest_files", &Map::new(), &ctx);
    assert_eq!(
        out,
        json!({
            "success": true,
            "files": [{"file": "b.py", "lines": 300}, {"file": "c.py", "lines": 40}],
            "count": 2
        })
    );

    let out = registry.invoke("largest_files", &args(&[("top", json!("1"))]), &ctx);
    assert_eq!(out["files"], json!([{"file": "b.py", "lines": 300}]));
}
