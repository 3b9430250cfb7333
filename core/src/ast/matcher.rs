//! Structural matching of node patterns against tree nodes.

use crate::ast::node::{value_number, value_text, NodeId, NodeTree, TreeNode};
use crate::eql::query::{
    Constraint, NodePattern, PatternExpression, PropertyOperator, PropertyPattern, PropertyValue,
    RegexFlags,
};
use crate::eql::regex_cache::get_regex;
use serde_json::Value;
use std::borrow::Cow;

pub struct StructuralMatcher<'t> {
    tree: &'t NodeTree,
}

impl<'t> StructuralMatcher<'t> {
    pub fn new(tree: &'t NodeTree) -> Self {
        Self { tree }
    }

    pub fn matches_expression(&self, id: NodeId, expr: &PatternExpression) -> bool {
        self.matches_pattern(id, &expr.pattern)
            && expr
                .constraints
                .iter()
                .all(|c| self.matches_constraint(id, c))
    }

    pub fn matches_pattern(&self, id: NodeId, pattern: &NodePattern) -> bool {
        let Some(node) = self.tree.get(id) else {
            return false;
        };

        if !pattern.node_type.accepts(&node.node_type) {
            return false;
        }
        if let Some(name) = &pattern.name {
            if !node.name.as_deref().is_some_and(|n| name.matches(n)) {
                return false;
            }
        }
        if let Some(value) = &pattern.value {
            if !node.value.as_deref().is_some_and(|v| value.matches(v)) {
                return false;
            }
        }
        if let Some(op) = &pattern.operator {
            let actual = node.properties.get("operator").and_then(value_text);
            if actual.as_deref() != Some(op.as_str()) {
                return false;
            }
        }
        if !pattern.properties.iter().all(|p| property_matches(node, p)) {
            return false;
        }

        let children_ok = pattern
            .children
            .iter()
            .all(|cp| node.children.iter().any(|c| self.matches_pattern(*c, cp)));
        let arguments_ok = pattern
            .arguments
            .iter()
            .all(|ap| node.arguments.iter().any(|a| self.matches_pattern(*a, ap)));

        children_ok && arguments_ok
    }

    fn matches_constraint(&self, id: NodeId, constraint: &Constraint) -> bool {
        match constraint {
            Constraint::Property(prop) => self
                .tree
                .get(id)
                .is_some_and(|node| property_matches(node, prop)),
            Constraint::Descendant(pattern) => self
                .tree
                .descendants(id)
                .into_iter()
                .any(|d| self.matches_pattern(d, pattern)),
        }
    }
}

/// Evaluate one property constraint. A missing property fails every
/// operator except `!=`.
pub fn property_matches(node: &TreeNode, prop: &PropertyPattern) -> bool {
    let actual = node.property(&prop.path);
    let actual = actual.as_deref();

    match prop.operator {
        PropertyOperator::Exists => actual.is_some_and(|v| !v.is_null()),
        PropertyOperator::Eq => equals(actual, &prop.value),
        PropertyOperator::NotEq => !equals(actual, &prop.value),
        PropertyOperator::In => match &prop.value {
            PropertyValue::List(items) => items.iter().any(|item| equals(actual, item)),
            single => equals(actual, single),
        },
        op => actual.is_some_and(|v| compare(v, op, &prop.value)),
    }
}

fn equals(actual: Option<&Value>, expected: &PropertyValue) -> bool {
    let Some(actual) = actual else {
        return false;
    };

    match expected {
        PropertyValue::Null => actual.is_null(),
        PropertyValue::Bool(b) => match actual {
            Value::Bool(x) => x == b,
            Value::String(s) => s.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
            _ => false,
        },
        PropertyValue::Number(n) => match actual {
            Value::Number(_) | Value::String(_) => value_number(actual) == Some(*n),
            _ => false,
        },
        PropertyValue::String(s) => value_text(actual).is_some_and(|t| t == s.as_str()),
        PropertyValue::Regex { pattern, flags } => regex_match(actual, pattern, *flags),
        PropertyValue::List(items) => items.iter().any(|item| equals(Some(actual), item)),
    }
}

fn compare(actual: &Value, op: PropertyOperator, expected: &PropertyValue) -> bool {
    match op {
        PropertyOperator::Gt
        | PropertyOperator::Lt
        | PropertyOperator::Gte
        | PropertyOperator::Lte => {
            let (Some(a), Some(b)) = (value_number(actual), expected_number(expected)) else {
                return false;
            };
            match op {
                PropertyOperator::Gt => a > b,
                PropertyOperator::Lt => a < b,
                PropertyOperator::Gte => a >= b,
                _ => a <= b,
            }
        }
        PropertyOperator::Matches => match expected {
            PropertyValue::Regex { pattern, flags } => regex_match(actual, pattern, *flags),
            PropertyValue::String(pattern) => regex_match(actual, pattern, RegexFlags::default()),
            _ => false,
        },
        PropertyOperator::Contains => match actual {
            Value::Array(items) => items.iter().any(|item| equals(Some(item), expected)),
            _ => text_op(actual, expected, |t, n| t.contains(n)),
        },
        PropertyOperator::StartsWith => text_op(actual, expected, |t, n| t.starts_with(n)),
        PropertyOperator::EndsWith => text_op(actual, expected, |t, n| t.ends_with(n)),
        _ => false,
    }
}

fn expected_number(value: &PropertyValue) -> Option<f64> {
    match value {
        PropertyValue::Number(n) => Some(*n),
        PropertyValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn expected_text(value: &PropertyValue) -> Option<Cow<'_, str>> {
    match value {
        PropertyValue::String(s) => Some(Cow::Borrowed(s.as_str())),
        PropertyValue::Number(n) => Some(Cow::Owned(n.to_string())),
        PropertyValue::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

fn text_op(actual: &Value, expected: &PropertyValue, op: impl Fn(&str, &str) -> bool) -> bool {
    match (value_text(actual), expected_text(expected)) {
        (Some(text), Some(needle)) => op(&text, &needle),
        _ => false,
    }
}

fn regex_match(actual: &Value, pattern: &str, flags: RegexFlags) -> bool {
    let Some(text) = value_text(actual) else {
        return false;
    };
    get_regex(pattern, flags)
        .map(|re| re.is_match(&text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eql::parse_query;
    use crate::eql::query::Query;
    use serde_json::json;

    fn call_tree() -> NodeTree {
        let mut tree = NodeTree::new();
        let call = tree.add_root(
            TreeNode::new("CallExpr", 3, 1)
                .with_property("callee", json!({ "type": "MemberExpr", "name": "execute" }))
                .with_property("arity", 2)
                .with_property("async", false)
                .with_property("decorators", json!(["cached", "traced"]))
                .with_property("operator", "()"),
        );
        let body = tree.add_child(call, TreeNode::new("Block", 3, 10));
        tree.add_child(body, TreeNode::new("ReturnStmt", 4, 5));
        tree.add_argument(
            call,
            TreeNode::new("StringLiteral", 3, 12).with_value("SELECT * FROM t"),
        );
        tree
    }

    fn matches(src: &str, tree: &NodeTree, id: usize) -> bool {
        let Query::Pattern(expr) = parse_query(src).unwrap() else {
            panic!("expected pattern query");
        };
        StructuralMatcher::new(tree).matches_expression(NodeId(id), &expr)
    }

    #[test]
    fn test_property_operators() {
        let tree = call_tree();
        assert!(matches(r#"CallExpr[callee = "execute"]"#, &tree, 0));
        assert!(matches(r#"CallExpr[callee.type = MemberExpr]"#, &tree, 0));
        assert!(matches("CallExpr[arity >= 2, arity < 3, async = false]", &tree, 0));
        assert!(matches("CallExpr[async < 1]", &tree, 0));
        assert!(matches(r#"CallExpr[decorators CONTAINS "traced"]"#, &tree, 0));
        assert!(matches(r#"CallExpr[callee.name ~= /^EXEC/i]"#, &tree, 0));
        assert!(matches(r#"CallExpr[callee.name IN ("query", "execute")]"#, &tree, 0));
        assert!(matches("CallExpr[line = 3, type STARTS_WITH Call]", &tree, 0));
        assert!(!matches("CallExpr[arity > 2]", &tree, 0));
    }

    #[test]
    fn test_missing_property_semantics() {
        let tree = call_tree();
        assert!(!matches(r#"CallExpr[missing = "x"]"#, &tree, 0));
        assert!(matches(r#"CallExpr[missing != "x"]"#, &tree, 0));
        assert!(!matches("CallExpr[missing]", &tree, 0));
        assert!(!matches("CallExpr[missing > 1]", &tree, 0));
    }

    #[test]
    fn test_children_arguments_and_descendants() {
        let tree = call_tree();
        assert!(matches("CallExpr { Block }", &tree, 0));
        assert!(!matches("CallExpr { ReturnStmt }", &tree, 0));
        assert!(matches("CallExpr (StringLiteral)", &tree, 0));
        assert!(matches("CallExpr : (EXISTS ReturnStmt)", &tree, 0));
        assert!(matches("CallExpr : (EXISTS StringLiteral, arity = 2)", &tree, 0));
        assert!(!matches("Block : (EXISTS StringLiteral)", &tree, 1));
    }

    #[test]
    fn test_regex_flags_apply() {
        let mut tree = NodeTree::new();
        tree.add_root(TreeNode::new("Str", 1, 1).with_value("first\nsecond"));
        assert!(matches("Str[value ~= /^second$/m]", &tree, 0));
        assert!(!matches("Str[value ~= /^second$/]", &tree, 0));
        assert!(matches("Str[value ~= /first.second/s]", &tree, 0));
        assert!(!matches("Str[value ~= /first.second/]", &tree, 0));
        assert!(matches("Str[value MATCHES /FIRST \\n SECOND/xi]", &tree, 0));
    }

    #[test]
    fn test_programmatic_fields() {
        use crate::eql::query::StringPattern;
        let tree = call_tree();
        let m = StructuralMatcher::new(&tree);
        let p = NodePattern::exact("StringLiteral").with_value(StringPattern::contains("SELECT"));
        assert!(m.matches_pattern(NodeId(3), &p));
        let p = NodePattern::exact("CallExpr").with_operator("()");
        assert!(m.matches_pattern(NodeId(0), &p));
        let p = NodePattern::exact("CallExpr").with_name(StringPattern::exact("x"));
        assert!(!m.matches_pattern(NodeId(0), &p));
    }
}
