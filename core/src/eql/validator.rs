//! Static checks on a parsed query.
//!
//! Validation never fails: problems come back as data so callers can show
//! every issue at once. Only errors make a query unexecutable.

use super::query::{
    Constraint, LogicalOperator, NodePattern, NodeTypeSpec, PropertyOperator, PropertyPattern,
    PropertyValue, Query, RegexFlags, StringMatchKind, StringPattern, TaintPattern,
    WildcardFilter,
};
use super::regex_cache::get_regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Location inside the query, e.g. `AND[1].children[0]`. Empty for the root.
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

pub fn validate(query: &Query) -> ValidationReport {
    let mut validator = Validator::default();
    validator.check_query(query, "");
    ValidationReport {
        valid: validator.errors.is_empty(),
        errors: validator.errors,
        warnings: validator.warnings,
    }
}

#[derive(Default)]
struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

impl Validator {
    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn check_query(&mut self, query: &Query, path: &str) {
        match query {
            Query::Logical(expr) => {
                let name = match expr.operator {
                    LogicalOperator::And => "AND",
                    LogicalOperator::Or => "OR",
                    LogicalOperator::Not => "NOT",
                };
                match (expr.operator, expr.operands.len()) {
                    (_, 0) => self.error(path, format!("{} requires at least one operand", name)),
                    (LogicalOperator::Not, n) if n > 1 => self.warn(
                        path,
                        format!("NOT with {} operands negates their union", n),
                    ),
                    (LogicalOperator::And | LogicalOperator::Or, 1) => {
                        self.warn(path, format!("{} with a single operand is redundant", name))
                    }
                    _ => {}
                }
                for (i, operand) in expr.operands.iter().enumerate() {
                    self.check_query(operand, &join(path, &format!("{}[{}]", name, i)));
                }
            }
            Query::Pattern(expr) => {
                if expr.constraints.is_empty()
                    && expr.pattern.is_bare()
                    && expr.pattern.node_type == NodeTypeSpec::wildcard()
                {
                    self.warn(path, "bare wildcard matches every node");
                }
                self.check_node_pattern(&expr.pattern, path);
                for (i, constraint) in expr.constraints.iter().enumerate() {
                    let at = join(path, &format!("constraints[{}]", i));
                    match constraint {
                        Constraint::Property(prop) => self.check_property(prop, &at),
                        Constraint::Descendant(pattern) => self.check_node_pattern(pattern, &at),
                    }
                }
            }
            Query::Taint(expr) => {
                let base = join(path, "TAINT");
                self.check_flow_endpoint(&expr.source, &join(&base, "source"), "source");
                self.check_flow_endpoint(&expr.sink, &join(&base, "sink"), "sink");
                for (i, sanitizer) in expr.sanitizers.iter().enumerate() {
                    let at = join(&base, &format!("sanitizers[{}]", i));
                    self.check_node_type(&sanitizer.node_type, &at);
                    if sanitizer.patterns.is_empty() {
                        self.warn(&at, "sanitizer has no string pattern and matches by type only");
                    }
                    self.check_string_patterns(&sanitizer.patterns, &at);
                }
            }
        }
    }

    fn check_flow_endpoint(&mut self, pattern: &TaintPattern, path: &str, role: &str) {
        if pattern.node_type.is_wildcard() {
            self.error(path, format!("{} requires a concrete node type", role));
        } else {
            self.check_node_type(&pattern.node_type, path);
        }
        if pattern.patterns.is_empty() {
            self.error(path, format!("{} requires at least one string pattern", role));
        }
        self.check_string_patterns(&pattern.patterns, path);
    }

    fn check_node_type(&mut self, spec: &NodeTypeSpec, path: &str) {
        match spec {
            NodeTypeSpec::Exact(name) if name.trim().is_empty() => {
                self.error(path, "node pattern has no node type")
            }
            NodeTypeSpec::AnyOf(names) if names.is_empty() => {
                self.error(path, "node pattern has no node type")
            }
            NodeTypeSpec::AnyOf(names) if names.iter().any(|n| n.trim().is_empty()) => {
                self.error(path, "node type union contains an empty name")
            }
            NodeTypeSpec::Wildcard(WildcardFilter::Only(names))
            | NodeTypeSpec::Wildcard(WildcardFilter::Except(names))
                if names.is_empty() =>
            {
                self.error(path, "wildcard type list is empty")
            }
            _ => {}
        }
    }

    fn check_node_pattern(&mut self, pattern: &NodePattern, path: &str) {
        self.check_node_type(&pattern.node_type, path);
        if let Some(name) = &pattern.name {
            self.check_string_pattern(name, &join(path, "name"));
        }
        if let Some(value) = &pattern.value {
            self.check_string_pattern(value, &join(path, "value"));
        }
        for (i, prop) in pattern.properties.iter().enumerate() {
            self.check_property(prop, &join(path, &format!("properties[{}]", i)));
        }
        for (i, child) in pattern.children.iter().enumerate() {
            self.check_node_pattern(child, &join(path, &format!("children[{}]", i)));
        }
        for (i, arg) in pattern.arguments.iter().enumerate() {
            self.check_node_pattern(arg, &join(path, &format!("arguments[{}]", i)));
        }
    }

    fn check_property(&mut self, prop: &PropertyPattern, path: &str) {
        if prop.path.is_empty() || prop.path.iter().any(|s| s.is_empty()) {
            self.error(path, "property path has an empty segment");
        }

        if prop.operator.is_ordering()
            && !matches!(prop.value, PropertyValue::Number(_) | PropertyValue::Bool(_))
        {
            self.error(
                path,
                format!(
                    "ordering comparison on '{}' needs a numeric value, got {}",
                    prop.path.join("."),
                    prop.value
                ),
            );
        }

        if prop.operator == PropertyOperator::Matches
            && !matches!(
                prop.value,
                PropertyValue::Regex { .. } | PropertyValue::String(_)
            )
        {
            self.error(path, "MATCHES needs a regex or string value");
        }
        if prop.operator == PropertyOperator::Matches {
            if let PropertyValue::String(pattern) = &prop.value {
                self.check_regex(pattern, RegexFlags::default(), path);
            }
        }

        self.check_value_regexes(&prop.value, path);
    }

    fn check_value_regexes(&mut self, value: &PropertyValue, path: &str) {
        match value {
            PropertyValue::Regex { pattern, flags } => self.check_regex(pattern, *flags, path),
            PropertyValue::List(items) => {
                for item in items {
                    self.check_value_regexes(item, path);
                }
            }
            _ => {}
        }
    }

    fn check_string_patterns(&mut self, patterns: &[StringPattern], path: &str) {
        for (i, pattern) in patterns.iter().enumerate() {
            self.check_string_pattern(pattern, &join(path, &format!("patterns[{}]", i)));
        }
    }

    fn check_string_pattern(&mut self, pattern: &StringPattern, path: &str) {
        if pattern.kind == StringMatchKind::Regex {
            self.check_regex(&pattern.value, pattern.regex_flags(), path);
        }
    }

    fn check_regex(&mut self, pattern: &str, flags: RegexFlags, path: &str) {
        if let Err(e) = get_regex(pattern, flags) {
            self.error(path, format!("invalid regex /{}/: {}", pattern, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eql::parse_query;
    use crate::eql::query::{LogicalExpression, PatternExpression};

    fn report(src: &str) -> ValidationReport {
        validate(&parse_query(src).expect("parses"))
    }

    #[test]
    fn test_valid_query_has_no_issues() {
        let r = report(r#"AND(FunctionDecl, CallExpr[callee.name = "eval"])"#);
        assert!(r.valid);
        assert!(r.errors.is_empty());
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_empty_logical_is_error() {
        let q = Query::Logical(LogicalExpression {
            operator: LogicalOperator::Or,
            operands: vec![],
        });
        let r = validate(&q);
        assert!(!r.valid);
        assert!(r.errors[0].message.contains("at least one operand"));
    }

    #[test]
    fn test_nested_path_reported() {
        let r = report("AND(Foo, Bar { Baz[count > \"many\"] })");
        assert!(!r.valid);
        assert_eq!(r.errors[0].path, "AND[1].children[0].properties[0]");
    }

    #[test]
    fn test_taint_wildcard_source_and_empty_sink_rejected() {
        let r = report("TAINT(SOURCE: * { \"input\" }, SINK: CallExpr {})");
        assert!(!r.valid);
        let paths: Vec<_> = r.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["TAINT.source", "TAINT.sink"]);
    }

    #[test]
    fn test_sanitizer_without_patterns_warns() {
        let r = report(concat!(
            "TAINT(SOURCE: Identifier { \"input\" }, ",
            "SINK: CallExpr { \"query\" }, SANITIZER: *)"
        ));
        assert!(r.valid);
        assert_eq!(r.warnings.len(), 1);
        assert_eq!(r.warnings[0].path, "TAINT.sanitizers[0]");
    }

    #[test]
    fn test_invalid_regex_is_error() {
        let r = report("CallExpr[callee ~= /(open/]");
        assert!(!r.valid);
        assert!(r.errors[0].message.contains("invalid regex"));

        let r = report(concat!(
            "TAINT(SOURCE: Identifier { MATCHES /(unclosed/ }, ",
            "SINK: CallExpr { \"query\" })"
        ));
        assert_eq!(r.errors[0].path, "TAINT.source.patterns[0]");
    }

    #[test]
    fn test_structural_warnings() {
        let r = report("OR(NOT(Foo, Bar))");
        assert!(r.valid);
        assert_eq!(r.warnings.len(), 2);
        assert!(r.warnings.iter().any(|w| w.message.contains("negates their union")));

        let r = report("*");
        assert!(r.valid);
        assert!(r.warnings[0].message.contains("every node"));
        assert!(report("* IN Foo").warnings.is_empty());
    }

    #[test]
    fn test_empty_node_type_is_error() {
        let q = Query::Pattern(PatternExpression {
            pattern: NodePattern::new(NodeTypeSpec::AnyOf(vec![])),
            constraints: vec![Constraint::Descendant(NodePattern::exact(""))],
        });
        let r = validate(&q);
        assert_eq!(r.errors.len(), 2);
        assert_eq!(r.errors[1].path, "constraints[0]");
    }

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue {
            path: "AND[0]".into(),
            message: "boom".into(),
        };
        assert_eq!(issue.to_string(), "AND[0]: boom");
    }
}
