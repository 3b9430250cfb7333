//! Typed EQL query tree.
//!
//! Produced by the parser, checked by the validator and consumed by the
//! pattern matching engine. Every type here is plain serializable data so a
//! query can be fingerprinted for the result cache.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    Logical(LogicalExpression),
    Pattern(PatternExpression),
    Taint(TaintExpression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalExpression {
    pub operator: LogicalOperator,
    pub operands: Vec<Query>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternExpression {
    pub pattern: NodePattern,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintExpression {
    pub source: SourcePattern,
    pub sink: SinkPattern,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sanitizers: Vec<SanitizerPattern>,
}

/// Which node types a pattern accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", content = "types", rename_all = "snake_case")]
pub enum NodeTypeSpec {
    Exact(String),
    AnyOf(Vec<String>),
    Wildcard(WildcardFilter),
}

/// Restriction on a wildcard: `*`, `* IN A|B` or `* NOT IN A|B`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", content = "types", rename_all = "snake_case")]
pub enum WildcardFilter {
    #[default]
    Unrestricted,
    Only(Vec<String>),
    Except(Vec<String>),
}

impl NodeTypeSpec {
    pub fn wildcard() -> Self {
        NodeTypeSpec::Wildcard(WildcardFilter::Unrestricted)
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, NodeTypeSpec::Exact(_))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, NodeTypeSpec::Wildcard(_))
    }

    pub fn accepts(&self, node_type: &str) -> bool {
        match self {
            NodeTypeSpec::Exact(name) => name == node_type,
            NodeTypeSpec::AnyOf(names) => names.iter().any(|n| n == node_type),
            NodeTypeSpec::Wildcard(WildcardFilter::Unrestricted) => true,
            NodeTypeSpec::Wildcard(WildcardFilter::Only(names)) => {
                names.iter().any(|n| n == node_type)
            }
            NodeTypeSpec::Wildcard(WildcardFilter::Except(names)) => {
                !names.iter().any(|n| n == node_type)
            }
        }
    }
}

/// Structural pattern matched against a single tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePattern {
    pub node_type: NodeTypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<StringPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<StringPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyPattern>,
    /// Each must be satisfied by at least one direct child.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodePattern>,
    /// Each must be satisfied by at least one argument node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<NodePattern>,
}

impl NodePattern {
    pub fn new(node_type: NodeTypeSpec) -> Self {
        Self {
            node_type,
            name: None,
            value: None,
            operator: None,
            properties: Vec::new(),
            children: Vec::new(),
            arguments: Vec::new(),
        }
    }

    pub fn exact(name: impl Into<String>) -> Self {
        Self::new(NodeTypeSpec::Exact(name.into()))
    }

    pub fn with_name(mut self, name: StringPattern) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_value(mut self, value: StringPattern) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_property(mut self, property: PropertyPattern) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_child(mut self, child: NodePattern) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_argument(mut self, argument: NodePattern) -> Self {
        self.arguments.push(argument);
        self
    }

    pub(crate) fn is_bare(&self) -> bool {
        self.name.is_none()
            && self.value.is_none()
            && self.operator.is_none()
            && self.properties.is_empty()
            && self.children.is_empty()
            && self.arguments.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatchKind {
    Exact,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// Flags of a regex literal: `i`, `m`, `s` and `x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
    pub ignore_whitespace: bool,
}

impl RegexFlags {
    pub fn case_insensitive() -> Self {
        Self {
            case_insensitive: true,
            ..Self::default()
        }
    }

    /// Parses the letters after a regex literal. Returns the first letter
    /// that is not a known flag.
    pub fn parse(letters: &str) -> Result<Self, char> {
        let mut flags = Self::default();
        for c in letters.chars() {
            match c {
                'i' => flags.case_insensitive = true,
                'm' => flags.multi_line = true,
                's' => flags.dot_matches_new_line = true,
                'x' => flags.ignore_whitespace = true,
                other => return Err(other),
            }
        }
        Ok(flags)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for RegexFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, letter) in [
            (self.case_insensitive, "i"),
            (self.multi_line, "m"),
            (self.dot_matches_new_line, "s"),
            (self.ignore_whitespace, "x"),
        ] {
            if set {
                f.write_str(letter)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringPattern {
    pub kind: StringMatchKind,
    pub value: String,
    pub case_sensitive: bool,
    /// Regex flags other than case, which `case_sensitive` governs.
    #[serde(default, skip_serializing_if = "RegexFlags::is_empty")]
    pub flags: RegexFlags,
}

impl StringPattern {
    pub fn new(kind: StringMatchKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            case_sensitive: true,
            flags: RegexFlags::default(),
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self::new(StringMatchKind::Exact, value)
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self::new(StringMatchKind::Contains, value)
    }

    pub fn regex(value: impl Into<String>) -> Self {
        Self::new(StringMatchKind::Regex, value)
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn with_flags(mut self, flags: RegexFlags) -> Self {
        self.case_sensitive = !flags.case_insensitive;
        self.flags = RegexFlags {
            case_insensitive: false,
            ..flags
        };
        self
    }

    /// Flags used when `kind` is `Regex`.
    pub fn regex_flags(&self) -> RegexFlags {
        RegexFlags {
            case_insensitive: !self.case_sensitive,
            ..self.flags
        }
    }

    /// Invalid regexes never match; the validator reports them up front.
    pub fn matches(&self, text: &str) -> bool {
        if self.kind == StringMatchKind::Regex {
            return crate::eql::regex_cache::get_regex(&self.value, self.regex_flags())
                .map(|re| re.is_match(text))
                .unwrap_or(false);
        }

        if self.case_sensitive {
            compare(self.kind, text, &self.value)
        } else {
            compare(self.kind, &text.to_lowercase(), &self.value.to_lowercase())
        }
    }
}

fn compare(kind: StringMatchKind, text: &str, needle: &str) -> bool {
    match kind {
        StringMatchKind::Exact => text == needle,
        StringMatchKind::Contains => text.contains(needle),
        StringMatchKind::StartsWith => text.starts_with(needle),
        StringMatchKind::EndsWith => text.ends_with(needle),
        StringMatchKind::Regex => false,
    }
}

/// Comparison applied to the value found at a property path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyOperator {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Matches,
    Contains,
    StartsWith,
    EndsWith,
    Exists,
    In,
}

impl PropertyOperator {
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            PropertyOperator::Gt
                | PropertyOperator::Lt
                | PropertyOperator::Gte
                | PropertyOperator::Lte
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            PropertyOperator::Eq => "=",
            PropertyOperator::NotEq => "!=",
            PropertyOperator::Gt => ">",
            PropertyOperator::Lt => "<",
            PropertyOperator::Gte => ">=",
            PropertyOperator::Lte => "<=",
            PropertyOperator::Matches => "MATCHES",
            PropertyOperator::Contains => "CONTAINS",
            PropertyOperator::StartsWith => "STARTS_WITH",
            PropertyOperator::EndsWith => "ENDS_WITH",
            PropertyOperator::Exists => "EXISTS",
            PropertyOperator::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Regex {
        pattern: String,
        #[serde(default, skip_serializing_if = "RegexFlags::is_empty")]
        flags: RegexFlags,
    },
    List(Vec<PropertyValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyPattern {
    pub path: Vec<String>,
    pub operator: PropertyOperator,
    pub value: PropertyValue,
}

impl PropertyPattern {
    pub fn new(path: &str, operator: PropertyOperator, value: PropertyValue) -> Self {
        Self {
            path: path.split('.').map(str::to_string).collect(),
            operator,
            value,
        }
    }

    pub fn exists(path: &str) -> Self {
        Self::new(path, PropertyOperator::Exists, PropertyValue::Null)
    }
}

/// Expression-level condition on a matched node. Never affects confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "pattern", rename_all = "snake_case")]
pub enum Constraint {
    Property(PropertyPattern),
    /// Some descendant at any depth satisfies the pattern.
    Descendant(NodePattern),
}

/// Source, sink and sanitizer patterns share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintPattern {
    pub node_type: NodeTypeSpec,
    #[serde(default)]
    pub patterns: Vec<StringPattern>,
}

impl TaintPattern {
    pub fn new(node_type: NodeTypeSpec, patterns: Vec<StringPattern>) -> Self {
        Self { node_type, patterns }
    }
}

pub type SourcePattern = TaintPattern;
pub type SinkPattern = TaintPattern;
pub type SanitizerPattern = TaintPattern;

// Canonical EQL rendering. Used as the `pattern` label of match results.

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Logical(expr) => {
                let op = match expr.operator {
                    LogicalOperator::And => "AND",
                    LogicalOperator::Or => "OR",
                    LogicalOperator::Not => "NOT",
                };
                write!(f, "{}(", op)?;
                write_list(f, &expr.operands)?;
                f.write_str(")")
            }
            Query::Pattern(expr) => {
                write!(f, "{}", expr.pattern)?;
                if !expr.constraints.is_empty() {
                    f.write_str(" : (")?;
                    write_list(f, &expr.constraints)?;
                    f.write_str(")")?;
                }
                Ok(())
            }
            Query::Taint(expr) => {
                write!(f, "TAINT(SOURCE: {}, SINK: {}", expr.source, expr.sink)?;
                for sanitizer in &expr.sanitizers {
                    write!(f, ", SANITIZER: {}", sanitizer)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for NodeTypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTypeSpec::Exact(name) => f.write_str(name),
            NodeTypeSpec::AnyOf(names) => f.write_str(&names.join("|")),
            NodeTypeSpec::Wildcard(WildcardFilter::Unrestricted) => f.write_str("*"),
            NodeTypeSpec::Wildcard(WildcardFilter::Only(names)) => {
                write!(f, "* IN {}", names.join("|"))
            }
            NodeTypeSpec::Wildcard(WildcardFilter::Except(names)) => {
                write!(f, "* NOT IN {}", names.join("|"))
            }
        }
    }
}

impl fmt::Display for NodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_type)?;
        if self.is_bare() {
            return Ok(());
        }

        let mut props: Vec<String> = Vec::new();
        if let Some(name) = &self.name {
            props.push(field_constraint("name", name));
        }
        if let Some(value) = &self.value {
            props.push(field_constraint("value", value));
        }
        if let Some(op) = &self.operator {
            props.push(format!("operator = {}", Quoted(op)));
        }
        props.extend(self.properties.iter().map(|p| p.to_string()));
        if !props.is_empty() {
            write!(f, "[{}]", props.join(", "))?;
        }
        if !self.children.is_empty() {
            f.write_str(" { ")?;
            write_list(f, &self.children)?;
            f.write_str(" }")?;
        }
        if !self.arguments.is_empty() {
            f.write_str("(")?;
            write_list(f, &self.arguments)?;
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Display for StringPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StringMatchKind::Exact => write_quoted(f, &self.value),
            StringMatchKind::Contains => {
                f.write_str("CONTAINS ")?;
                write_quoted(f, &self.value)
            }
            StringMatchKind::StartsWith => {
                f.write_str("STARTS_WITH ")?;
                write_quoted(f, &self.value)
            }
            StringMatchKind::EndsWith => {
                f.write_str("ENDS_WITH ")?;
                write_quoted(f, &self.value)
            }
            StringMatchKind::Regex => {
                f.write_str("MATCHES ")?;
                write_regex(f, &self.value, self.regex_flags())
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("none"),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Number(n) => write!(f, "{}", n),
            PropertyValue::String(s) => write_quoted(f, s),
            PropertyValue::Regex { pattern, flags } => write_regex(f, pattern, *flags),
            PropertyValue::List(items) => {
                f.write_str("(")?;
                write_list(f, items)?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for PropertyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.join(".");
        match self.operator {
            PropertyOperator::Exists => write!(f, "{} EXISTS", path),
            op => write!(f, "{} {} {}", path, op.symbol(), self.value),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Property(p) => write!(f, "{}", p),
            Constraint::Descendant(p) => write!(f, "EXISTS {}", p),
        }
    }
}

impl fmt::Display for TaintPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{ ", self.node_type)?;
        write_list(f, &self.patterns)?;
        f.write_str(" }")
    }
}

fn field_constraint(field: &str, pattern: &StringPattern) -> String {
    match pattern.kind {
        StringMatchKind::Exact => format!("{} = {}", field, pattern),
        _ => format!("{} {}", field, pattern),
    }
}

/// A string literal as the EQL lexer reads it back.
struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_quoted(f, self.0)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in text.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("\"")
}

/// `/body/flags` with unescaped slashes and line breaks escaped.
fn write_regex(f: &mut fmt::Formatter<'_>, pattern: &str, flags: RegexFlags) -> fmt::Result {
    f.write_str("/")?;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                f.write_str("\\")?;
                match chars.next() {
                    Some('\n') => f.write_str("n")?,
                    Some(next) => write!(f, "{}", next)?,
                    None => f.write_str("\\")?,
                }
            }
            '/' => f.write_str("\\/")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "/{}", flags)
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_accepts() {
        assert!(NodeTypeSpec::Exact("Call".into()).accepts("Call"));
        assert!(!NodeTypeSpec::Exact("Call".into()).accepts("call"));
        assert!(NodeTypeSpec::AnyOf(vec!["A".into(), "B".into()]).accepts("B"));
        assert!(NodeTypeSpec::wildcard().accepts("Anything"));
        assert!(NodeTypeSpec::Wildcard(WildcardFilter::Only(vec!["A".into()])).accepts("A"));
        assert!(!NodeTypeSpec::Wildcard(WildcardFilter::Except(vec!["A".into()])).accepts("A"));
    }

    #[test]
    fn test_string_pattern_kinds() {
        assert!(StringPattern::exact("eval").matches("eval"));
        assert!(!StringPattern::exact("eval").matches("Eval"));
        assert!(StringPattern::exact("eval").case_insensitive().matches("EVAL"));
        assert!(StringPattern::contains("exec").matches("os.execv"));
        assert!(StringPattern::new(StringMatchKind::StartsWith, "req").matches("request.args"));
        assert!(StringPattern::new(StringMatchKind::EndsWith, ".html").matches("index.html"));
        assert!(StringPattern::regex(r"^exec(ute)?$").matches("execute"));
        assert!(StringPattern::regex("inner").case_insensitive().matches("innerHTML"));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        assert!(!StringPattern::regex("(unclosed").matches("(unclosed"));
    }

    #[test]
    fn test_display_renders_eql() {
        let q = Query::Logical(LogicalExpression {
            operator: LogicalOperator::And,
            operands: vec![
                Query::Pattern(PatternExpression {
                    pattern: NodePattern::exact("FunctionDecl"),
                    constraints: vec![],
                }),
                Query::Pattern(PatternExpression {
                    pattern: NodePattern::exact("CallExpr").with_property(PropertyPattern::new(
                        "callee.name",
                        PropertyOperator::Eq,
                        PropertyValue::String("eval".into()),
                    )),
                    constraints: vec![],
                }),
            ],
        });
        assert_eq!(
            q.to_string(),
            r#"AND(FunctionDecl, CallExpr[callee.name = "eval"])"#
        );
    }
}
