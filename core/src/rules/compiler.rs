use crate::ast::{MatchResult, NodeTree, QueryEngine, QueryOptions};
use crate::eql::{compile, CompiledQuery, ValidationIssue};
use crate::rules::model::{Rule, Severity};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub query: CompiledQuery,
}

/// Why a rule was not compiled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleDiagnostic {
    pub rule_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompiledRuleSet {
    pub rules: Vec<CompiledRule>,
    pub rejected: Vec<RuleDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    pub results: Vec<MatchResult>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    /// Also reject rules whose query only raises warnings.
    pub deny_warnings: bool,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_warnings(mut self, deny: bool) -> Self {
        self.deny_warnings = deny;
        self
    }

    /// Compile each enabled rule. Bad rules are logged and collected in
    /// `rejected`; they never stop the rest of the set.
    pub fn compile(&self, rules: impl IntoIterator<Item = Rule>) -> CompiledRuleSet {
        let mut set = CompiledRuleSet::default();
        let mut seen = HashSet::new();

        for rule in rules {
            if !rule.enabled {
                debug!(rule = %rule.id, "rule disabled, skipping");
                continue;
            }
            if !seen.insert(rule.id.clone()) {
                set.reject(&rule.id, "duplicate rule id".to_string());
                continue;
            }

            match compile(&rule.query) {
                Ok(query) if self.deny_warnings && !query.warnings().is_empty() => {
                    set.reject(&rule.id, join_issues(query.warnings()));
                }
                Ok(query) => {
                    for warning in query.warnings() {
                        debug!(rule = %rule.id, %warning, "query warning");
                    }
                    set.rules.push(CompiledRule { rule, query });
                }
                Err(e) => set.reject(&rule.id, e.to_string()),
            }
        }

        info!(
            compiled = set.rules.len(),
            rejected = set.rejected.len(),
            "rule set compiled"
        );
        set
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CompiledRuleSet {
    fn reject(&mut self, rule_id: &str, message: String) {
        warn!(rule = %rule_id, %message, "rule rejected");
        self.rejected.push(RuleDiagnostic {
            rule_id: rule_id.to_string(),
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules targeting `language` (case-insensitive).
    pub fn for_language(&self, language: &str) -> CompiledRuleSet {
        CompiledRuleSet {
            rules: self
                .rules
                .iter()
                .filter(|r| r.rule.language.eq_ignore_ascii_case(language))
                .cloned()
                .collect(),
            rejected: Vec::new(),
        }
    }

    pub fn execute(&self, engine: &QueryEngine, tree: &NodeTree) -> Vec<RuleMatch> {
        self.execute_with(engine, tree, &QueryOptions::default())
    }

    /// Run every rule in parallel. Rules with no results are omitted; the
    /// output keeps rule order.
    pub fn execute_with(
        &self,
        engine: &QueryEngine,
        tree: &NodeTree,
        options: &QueryOptions,
    ) -> Vec<RuleMatch> {
        self.rules
            .par_iter()
            .filter_map(|compiled| {
                let results = engine.execute(&compiled.query, tree, options);
                if results.is_empty() {
                    return None;
                }
                let rule = &compiled.rule;
                Some(RuleMatch {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    severity: rule.severity,
                    category: rule.category.clone(),
                    cwe: rule.cwe.clone(),
                    results,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TreeNode;

    fn rule(id: &str, query: &str) -> Rule {
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            severity: Severity::High,
            language: "python".to_string(),
            query: query.to_string(),
            category: None,
            cwe: None,
            enabled: true,
        }
    }

    #[test]
    fn test_bad_rules_are_rejected_not_fatal() {
        let mut disabled = rule("off", "Call");
        disabled.enabled = false;

        let set = RuleCompiler::new().compile(vec![
            rule("ok", "Call"),
            rule("lex", "Call & Name"),
            rule("parse", "AND("),
            rule("invalid", "TAINT(SOURCE: * { \"x\" }, SINK: Call { \"y\" })"),
            rule("ok", "Name"),
            disabled,
        ]);

        assert_eq!(set.len(), 1);
        let rejected: Vec<_> = set.rejected.iter().map(|d| d.rule_id.as_str()).collect();
        assert_eq!(rejected, vec!["lex", "parse", "invalid", "ok"]);
        assert!(set.rejected[3].message.contains("duplicate"));
    }

    #[test]
    fn test_deeply_nested_rule_is_rejected() {
        let deep = format!("{}Call{}", "NOT(".repeat(50_000), ")".repeat(50_000));
        let set = RuleCompiler::new().compile(vec![rule("deep", &deep), rule("ok", "Call")]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rejected[0].rule_id, "deep");
        assert!(set.rejected[0].message.contains("nested too deeply"));
    }

    #[test]
    fn test_deny_warnings() {
        let set = RuleCompiler::new()
            .deny_warnings(true)
            .compile(vec![rule("single-and", "AND(Call)")]);
        assert!(set.is_empty());
        assert!(set.rejected[0].message.contains("single operand"));
    }

    #[test]
    fn test_execute_in_rule_order() {
        let mut tree = NodeTree::new();
        let module = tree.add_root(TreeNode::new("Module", 1, 1));
        tree.add_child(module, TreeNode::new("Call", 2, 1).with_value("eval"));

        let mut js = rule("js-only", "Module");
        js.language = "javascript".to_string();
        let set = RuleCompiler::new().compile(vec![
            rule("calls", "Call"),
            rule("none", "ClassDef"),
            rule("modules", "Module"),
            js,
        ]);

        let engine = QueryEngine::default();
        let matches = set.execute(&engine, &tree);
        let ids: Vec<_> = matches.iter().map(|m| m.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["calls", "modules", "js-only"]);

        let py = set.for_language("Python").execute(&engine, &tree);
        assert_eq!(py.len(), 2);
    }
}
