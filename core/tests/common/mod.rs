#![allow(dead_code)]

use eql_core::{NodeTree, TreeNode};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// ```python
/// @app.route("/user")
/// def get_user():
///     user_id = request.args.get("id")
///     query = "SELECT * FROM users WHERE id = " + user_id
///     cursor.execute(query)
///     return render(cursor.fetchone())
///
/// def ping():
///     host = request.args.get("host")
///     safe = shlex.quote(host)
///     os.system("ping -c 1 " + safe)
/// ```
pub fn flask_app() -> NodeTree {
    NodeTree::from_json_str(
        r#"{
        "type": "Module", "line": 1, "column": 1,
        "children": [
            { "type": "FunctionDef", "name": "get_user", "line": 2, "column": 1,
              "decorators": ["app.route"],
              "children": [
                { "type": "Assign", "line": 3, "column": 5, "target": "user_id",
                  "children": [
                    { "type": "Call", "value": "request.args.get", "line": 3, "column": 15,
                      "arguments": [ { "type": "Constant", "value": "id", "line": 3, "column": 32 } ] }
                  ] },
                { "type": "Assign", "line": 4, "column": 5, "target": "query",
                  "children": [
                    { "type": "BinOp", "operator": "+", "line": 4, "column": 13,
                      "content": "\"SELECT * FROM users WHERE id = \" + user_id" }
                  ] },
                { "type": "Call", "value": "cursor.execute", "line": 5, "column": 5,
                  "arguments": [ { "type": "Name", "name": "query", "line": 5, "column": 20 } ] },
                { "type": "Return", "line": 6, "column": 5,
                  "children": [ { "type": "Call", "value": "render", "line": 6, "column": 12 } ] }
              ] },
            { "type": "FunctionDef", "name": "ping", "line": 30, "column": 1,
              "children": [
                { "type": "Call", "value": "request.args.get", "line": 31, "column": 12 },
                { "type": "Call", "value": "shlex.quote", "line": 32, "column": 12 },
                { "type": "Call", "value": "os.system", "line": 33, "column": 5 }
              ] }
        ]
    }"#,
    )
    .expect("fixture parses")
}

pub fn leaf(node_type: &str, line: u32) -> TreeNode {
    TreeNode::new(node_type, line, 1)
}
