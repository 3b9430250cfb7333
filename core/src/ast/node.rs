//! Arena-backed source tree.
//!
//! The tree comes from an external parser. Nodes are addressed by [`NodeId`]
//! and keep their parent so matching can look both up and down the tree.

use crate::ast::cache::fingerprint;
use crate::error::{CoreError, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub arguments: Vec<NodeId>,
    #[serde(default)]
    pub parent: Option<NodeId>,
}

impl TreeNode {
    pub fn new(node_type: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            node_type: node_type.into(),
            name: None,
            value: None,
            content: None,
            line,
            column,
            properties: BTreeMap::new(),
            children: Vec::new(),
            arguments: Vec::new(),
            parent: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The one piece of text string patterns are matched against.
    ///
    /// First present of `value`, `content`, `name`, then the first property
    /// (in key order) that is a string or an object carrying a string
    /// `value`/`content`.
    pub fn comparable_text(&self) -> Option<&str> {
        if let Some(text) = self
            .value
            .as_deref()
            .or(self.content.as_deref())
            .or(self.name.as_deref())
        {
            return Some(text);
        }

        self.properties.values().find_map(|v| match v {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map
                .get("value")
                .and_then(Value::as_str)
                .or_else(|| map.get("content").and_then(Value::as_str)),
            _ => None,
        })
    }

    /// Resolve a dotted property path.
    ///
    /// Looks in `properties` first, descending into objects and array
    /// indices, then falls back to the built-in fields.
    pub fn property(&self, path: &[String]) -> Option<Cow<'_, Value>> {
        let (first, rest) = path.split_first()?;

        if let Some(root) = self.properties.get(first) {
            let mut current = root;
            for segment in rest {
                current = match current {
                    Value::Object(map) => map.get(segment)?,
                    Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                    _ => return None,
                };
            }
            return Some(Cow::Borrowed(current));
        }

        if !rest.is_empty() {
            return None;
        }
        let builtin = match first.as_str() {
            "type" => Value::String(self.node_type.clone()),
            "name" => Value::String(self.name.clone()?),
            "value" => Value::String(self.value.clone()?),
            "content" => Value::String(self.content.clone()?),
            "line" => Value::from(self.line),
            "column" => Value::from(self.column),
            _ => return None,
        };
        Some(Cow::Owned(builtin))
    }
}

/// Text view of a JSON value, as used by string comparisons.
pub(crate) fn value_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Object(map) => ["value", "content", "name"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(Cow::Borrowed),
        _ => None,
    }
}

/// Numeric view: numbers, booleans as 1/0, and numeric strings.
pub(crate) fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeTree {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    #[serde(skip)]
    fingerprint: OnceCell<String>,
}

impl PartialEq for NodeTree {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.roots == other.roots
    }
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, mut node: TreeNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = parent;
        node.children.clear();
        node.arguments.clear();
        self.nodes.push(node);
        self.fingerprint = OnceCell::new();
        id
    }

    pub fn add_root(&mut self, node: TreeNode) -> NodeId {
        let id = self.push(node, None);
        self.roots.push(id);
        id
    }

    /// Panics if `parent` does not belong to this tree.
    pub fn add_child(&mut self, parent: NodeId, node: TreeNode) -> NodeId {
        let id = self.push(node, Some(parent));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Panics if `parent` does not belong to this tree.
    pub fn add_argument(&mut self, parent: NodeId, node: TreeNode) -> NodeId {
        let id = self.push(node, Some(parent));
        self.nodes[parent.0].arguments.push(id);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// All nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn is_parent_of(&self, parent: NodeId, child: NodeId) -> bool {
        self.parent(child) == Some(parent)
    }

    /// Children and arguments at every depth, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.get(id) {
            Some(node) => node.children.iter().chain(&node.arguments).rev().copied().collect(),
            None => return out,
        };

        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.get(current) {
                stack.extend(node.children.iter().chain(&node.arguments).rev().copied());
            }
        }
        out
    }

    /// sha1 over the serialized nodes, computed once per revision of the tree.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint
            .get_or_try_init(|| fingerprint(&self.nodes))
            .ok()
            .map(String::as_str)
    }

    /// Build a tree from the nested node shape an AST producer emits.
    ///
    /// Accepts a single root object or an array of roots. Keys other than
    /// the built-in fields are folded into `properties`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut tree = Self::new();
        match value {
            Value::Array(roots) => {
                for root in roots {
                    tree.insert_json(root, None, Slot::Child)?;
                }
            }
            Value::Object(_) => {
                tree.insert_json(value, None, Slot::Child)?;
            }
            other => {
                return Err(CoreError::Tree(format!(
                    "expected an object or array at the root, got {}",
                    json_kind(other)
                )))
            }
        }
        Ok(tree)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source)?;
        Self::from_json(&value)
    }

    fn insert_json(&mut self, value: &Value, parent: Option<NodeId>, slot: Slot) -> Result<NodeId> {
        let Value::Object(map) = value else {
            return Err(CoreError::Tree(format!(
                "expected a node object, got {}",
                json_kind(value)
            )));
        };

        let node_type = map
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CoreError::Tree("node without a 'type'".to_string()))?;

        let line = map.get("line").and_then(Value::as_u64).unwrap_or(0) as u32;
        let column = map.get("column").and_then(Value::as_u64).unwrap_or(0) as u32;
        let mut node = TreeNode::new(node_type, line, column);
        node.name = map.get("name").and_then(scalar_text);
        node.value = map.get("value").and_then(scalar_text);
        node.content = map.get("content").and_then(scalar_text);

        if let Some(Value::Object(props)) = map.get("properties") {
            node.properties = props.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        for (key, v) in map {
            if is_reserved(key) {
                continue;
            }
            node.properties.entry(key.clone()).or_insert_with(|| v.clone());
        }

        let id = match (parent, slot) {
            (None, _) => self.add_root(node),
            (Some(p), Slot::Child) => self.add_child(p, node),
            (Some(p), Slot::Argument) => self.add_argument(p, node),
        };

        for (key, slot) in [("children", Slot::Child), ("arguments", Slot::Argument)] {
            match map.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        self.insert_json(item, Some(id), slot)?;
                    }
                }
                Some(other) => {
                    return Err(CoreError::Tree(format!(
                        "'{}' of {} must be an array, got {}",
                        key,
                        node_type,
                        json_kind(other)
                    )))
                }
            }
        }

        Ok(id)
    }
}

impl Index<NodeId> for NodeTree {
    type Output = TreeNode;

    fn index(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Child,
    Argument,
}

fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        "type"
            | "name"
            | "value"
            | "content"
            | "line"
            | "column"
            | "properties"
            | "children"
            | "arguments"
    )
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
