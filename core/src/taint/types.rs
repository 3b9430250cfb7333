use crate::ast::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which role a taint pattern plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintRole {
    Source,
    Sink,
    Sanitizer,
}

impl TaintRole {
    /// Lowercased words that hint a node plays this role.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            TaintRole::Source => &["user", "input", "request", "param", "query", "body"],
            TaintRole::Sink => &["eval", "exec", "query", "execute", "innerhtml", "outerhtml"],
            TaintRole::Sanitizer => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkCategory {
    CodeExecution,
    SqlInjection,
    CommandExecution,
    Xss,
    PathTraversal,
    Generic,
}

// 分类顺序即优先级
const SINK_RULES: &[(SinkCategory, &[&str])] = &[
    (SinkCategory::CodeExecution, &["eval", "compile", "new function"]),
    (SinkCategory::SqlInjection, &["query", "execute", "sql", "cursor"]),
    (
        SinkCategory::CommandExecution,
        &["exec", "system", "spawn", "popen", "shell"],
    ),
    (
        SinkCategory::Xss,
        &["innerhtml", "outerhtml", "document.write", "insertadjacenthtml"],
    ),
    (
        SinkCategory::PathTraversal,
        &["readfile", "writefile", "open", "path", "sendfile"],
    ),
];

impl SinkCategory {
    /// Classify from the sink's comparable text and name.
    pub fn classify(text: Option<&str>, name: Option<&str>) -> Self {
        let haystack = [text, name]
            .iter()
            .flatten()
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        SINK_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| haystack.contains(n)))
            .map(|(category, _)| *category)
            .unwrap_or(SinkCategory::Generic)
    }

    pub fn cwe(self) -> Option<&'static str> {
        match self {
            SinkCategory::CodeExecution => Some("CWE-94"),
            SinkCategory::SqlInjection => Some("CWE-89"),
            SinkCategory::CommandExecution => Some("CWE-78"),
            SinkCategory::Xss => Some("CWE-79"),
            SinkCategory::PathTraversal => Some("CWE-22"),
            SinkCategory::Generic => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SinkCategory::CodeExecution => "code_execution",
            SinkCategory::SqlInjection => "sql_injection",
            SinkCategory::CommandExecution => "command_execution",
            SinkCategory::Xss => "xss",
            SinkCategory::PathTraversal => "path_traversal",
            SinkCategory::Generic => "generic",
        }
    }
}

impl fmt::Display for SinkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RiskLevel::Critical
        } else if score >= 0.6 {
            RiskLevel::High
        } else if score >= 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A node matched as a source, sink or sanitizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEndpoint {
    pub node: NodeId,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub line: u32,
    pub column: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathNode {
    pub node: NodeId,
    pub node_type: String,
    pub line: u32,
    pub column: u32,
}

impl From<&FlowEndpoint> for PathNode {
    fn from(endpoint: &FlowEndpoint) -> Self {
        Self {
            node: endpoint.node,
            node_type: endpoint.node_type.clone(),
            line: endpoint.line,
            column: endpoint.column,
        }
    }
}

/// A source reaching a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintFlowResult {
    pub source: FlowEndpoint,
    pub sink: FlowEndpoint,
    pub path: Vec<PathNode>,
    /// Sanitizer matches lying on the path.
    pub sanitizers: Vec<FlowEndpoint>,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub confidence: f64,
    pub sink_category: SinkCategory,
    /// Line distance between source and sink.
    pub flow_distance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDetails {
    pub recommendations: Vec<String>,
    pub cwe: Vec<String>,
}

impl TaintFlowResult {
    pub fn is_sanitized(&self) -> bool {
        !self.sanitizers.is_empty()
    }

    pub fn details(&self) -> FlowDetails {
        let mut recommendations: Vec<String> = match self.sink_category {
            SinkCategory::SqlInjection => vec![
                "Use parameterized queries or prepared statements instead of string concatenation"
                    .to_string(),
            ],
            SinkCategory::Xss => vec![
                "Encode output for the HTML context before rendering".to_string(),
                "Deploy a Content-Security-Policy to limit script execution".to_string(),
            ],
            SinkCategory::CodeExecution => {
                vec!["Avoid evaluating dynamically constructed code".to_string()]
            }
            SinkCategory::CommandExecution => vec![
                "Pass arguments as an array instead of building a shell command string"
                    .to_string(),
                "Validate command arguments against an allow-list".to_string(),
            ],
            SinkCategory::PathTraversal => vec![
                "Canonicalize the path and check it stays inside the allowed base directory"
                    .to_string(),
            ],
            SinkCategory::Generic => Vec::new(),
        };

        if !self.is_sanitized() {
            recommendations.push(
                "Validate or sanitize untrusted input before it reaches the sink".to_string(),
            );
        }

        FlowDetails {
            recommendations,
            cwe: self
                .sink_category
                .cwe()
                .map(|c| vec![c.to_string()])
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_order() {
        assert_eq!(
            SinkCategory::classify(Some("eval(query)"), None),
            SinkCategory::CodeExecution
        );
        assert_eq!(
            SinkCategory::classify(Some("cursor.execute"), None),
            SinkCategory::SqlInjection
        );
        assert_eq!(
            SinkCategory::classify(None, Some("os.popen")),
            SinkCategory::CommandExecution
        );
        assert_eq!(
            SinkCategory::classify(Some("el.innerHTML"), None),
            SinkCategory::Xss
        );
        assert_eq!(
            SinkCategory::classify(Some("fs.readFile"), None),
            SinkCategory::PathTraversal
        );
        assert_eq!(SinkCategory::classify(Some("print"), None), SinkCategory::Generic);
        assert_eq!(SinkCategory::classify(None, None), SinkCategory::Generic);
    }

    #[test]
    fn test_risk_buckets() {
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.79), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert!(RiskLevel::Critical > RiskLevel::Low);
    }

    #[test]
    fn test_cwe_mapping() {
        assert_eq!(SinkCategory::SqlInjection.cwe(), Some("CWE-89"));
        assert_eq!(SinkCategory::Generic.cwe(), None);
        assert_eq!(SinkCategory::Xss.to_string(), "xss");
    }
}
