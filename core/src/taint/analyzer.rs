use crate::ast::{NodeId, NodeTree, TreeNode};
use crate::eql::query::{
    SanitizerPattern, SinkPattern, SourcePattern, TaintExpression, TaintPattern,
};
use crate::scoring::{DefaultScoring, ScoringStrategy};
use crate::taint::types::{
    FlowEndpoint, PathNode, RiskLevel, SinkCategory, TaintFlowResult, TaintRole,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Intra-tree source to sink analysis.
///
/// Reachability is approximate: a source reaches a sink when one is the
/// direct parent of the other or their lines are close enough.
#[derive(Clone)]
pub struct TaintAnalyzer {
    scoring: Arc<dyn ScoringStrategy>,
    proximity_lines: u32,
}

impl Default for TaintAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TaintAnalyzer {
    pub const DEFAULT_PROXIMITY_LINES: u32 = 10;

    pub fn new() -> Self {
        Self {
            scoring: Arc::new(DefaultScoring),
            proximity_lines: Self::DEFAULT_PROXIMITY_LINES,
        }
    }

    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringStrategy>) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_proximity_lines(mut self, lines: u32) -> Self {
        self.proximity_lines = lines;
        self
    }

    pub fn proximity_lines(&self) -> u32 {
        self.proximity_lines
    }

    pub fn analyze(&self, expr: &TaintExpression, tree: &NodeTree) -> Vec<TaintFlowResult> {
        self.analyze_taint_flows(
            std::slice::from_ref(&expr.source),
            std::slice::from_ref(&expr.sink),
            &expr.sanitizers,
            tree,
        )
    }

    pub fn analyze_taint_flows(
        &self,
        sources: &[SourcePattern],
        sinks: &[SinkPattern],
        sanitizers: &[SanitizerPattern],
        tree: &NodeTree,
    ) -> Vec<TaintFlowResult> {
        let source_hits = self.collect(sources, TaintRole::Source, tree);
        let sink_hits = self.collect(sinks, TaintRole::Sink, tree);
        if source_hits.is_empty() || sink_hits.is_empty() {
            debug!(
                sources = source_hits.len(),
                sinks = sink_hits.len(),
                "taint analysis skipped: missing endpoints"
            );
            return Vec::new();
        }
        let sanitizer_hits = self.collect(sanitizers, TaintRole::Sanitizer, tree);

        let mut flows = Vec::new();
        for source in &source_hits {
            for sink in &sink_hits {
                if source.node == sink.node {
                    continue;
                }
                let Some(path) = self.find_path(source, sink, tree) else {
                    continue;
                };

                let on_path: Vec<FlowEndpoint> = sanitizer_hits
                    .iter()
                    .filter(|s| self.lies_on_path(s, &path, tree))
                    .cloned()
                    .collect();

                let sink_node = &tree[sink.node];
                let category =
                    SinkCategory::classify(sink_node.comparable_text(), sink_node.name.as_deref());
                let confidence =
                    self.scoring
                        .flow_confidence(source.confidence, sink.confidence, on_path.len());
                let risk_score =
                    self.scoring
                        .risk(source.confidence, sink.confidence, on_path.len(), category);

                trace!(
                    source = %source.node,
                    sink = %sink.node,
                    %category,
                    sanitizers = on_path.len(),
                    risk_score,
                    "taint flow"
                );

                flows.push(TaintFlowResult {
                    source: source.clone(),
                    sink: sink.clone(),
                    path,
                    sanitizers: on_path,
                    risk_level: RiskLevel::from_score(risk_score),
                    risk_score,
                    confidence,
                    sink_category: category,
                    flow_distance: source.line.abs_diff(sink.line),
                });
            }
        }

        debug!(
            sources = source_hits.len(),
            sinks = sink_hits.len(),
            sanitizers = sanitizer_hits.len(),
            flows = flows.len(),
            "taint analysis finished"
        );
        flows
    }

    /// Nodes matching a single pattern, in arena order.
    pub fn find_matches(
        &self,
        pattern: &TaintPattern,
        role: TaintRole,
        tree: &NodeTree,
    ) -> Vec<FlowEndpoint> {
        tree.iter()
            .filter(|(_, node)| matches_taint_pattern(pattern, node))
            .map(|(id, node)| {
                let keyword_hit = node
                    .comparable_text()
                    .map(|text| {
                        let lower = text.to_lowercase();
                        role.keywords().iter().any(|k| lower.contains(k))
                    })
                    .unwrap_or(false);
                FlowEndpoint {
                    node: id,
                    node_type: node.node_type.clone(),
                    text: node.comparable_text().map(str::to_string),
                    line: node.line,
                    column: node.column,
                    confidence: self.scoring.taint_match(pattern, keyword_hit),
                }
            })
            .collect()
    }

    /// Matches of all patterns, one per node keeping the best confidence.
    fn collect(
        &self,
        patterns: &[TaintPattern],
        role: TaintRole,
        tree: &NodeTree,
    ) -> Vec<FlowEndpoint> {
        let mut by_node: BTreeMap<NodeId, FlowEndpoint> = BTreeMap::new();
        for pattern in patterns {
            for hit in self.find_matches(pattern, role, tree) {
                match by_node.get(&hit.node) {
                    Some(existing) if existing.confidence >= hit.confidence => {}
                    _ => {
                        by_node.insert(hit.node, hit);
                    }
                }
            }
        }
        by_node.into_values().collect()
    }

    fn find_path(
        &self,
        source: &FlowEndpoint,
        sink: &FlowEndpoint,
        tree: &NodeTree,
    ) -> Option<Vec<PathNode>> {
        let related =
            tree.is_parent_of(source.node, sink.node) || tree.is_parent_of(sink.node, source.node);
        let near = source.line.abs_diff(sink.line) <= self.proximity_lines;

        if related || near {
            Some(vec![PathNode::from(source), PathNode::from(sink)])
        } else {
            None
        }
    }

    fn lies_on_path(&self, sanitizer: &FlowEndpoint, path: &[PathNode], tree: &NodeTree) -> bool {
        let adjacent = path.iter().any(|p| {
            p.node == sanitizer.node
                || tree.is_parent_of(p.node, sanitizer.node)
                || tree.is_parent_of(sanitizer.node, p.node)
        });
        if adjacent {
            return true;
        }

        let lo = path.iter().map(|p| p.line).min();
        let hi = path.iter().map(|p| p.line).max();
        matches!((lo, hi), (Some(lo), Some(hi)) if (lo..=hi).contains(&sanitizer.line))
    }
}

/// Type test plus every string pattern against the comparable text.
pub fn matches_taint_pattern(pattern: &TaintPattern, node: &TreeNode) -> bool {
    if !pattern.node_type.accepts(&node.node_type) {
        return false;
    }
    if pattern.patterns.is_empty() {
        return true;
    }
    match node.comparable_text() {
        Some(text) => pattern.patterns.iter().all(|p| p.matches(text)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eql::query::{NodeTypeSpec, StringPattern};

    fn pattern(node_type: &str, needle: &str) -> TaintPattern {
        TaintPattern::new(
            NodeTypeSpec::Exact(node_type.into()),
            vec![StringPattern::contains(needle)],
        )
    }

    /// def handler():
    ///     user_id = request.args.get("id")      # line 2
    ///     sql = "SELECT ... " + user_id         # line 3
    ///     cursor.execute(sql)                   # line 4
    fn sqli_tree() -> NodeTree {
        let mut tree = NodeTree::new();
        let func = tree.add_root(TreeNode::new("FunctionDef", 1, 1).with_name("handler"));
        tree.add_child(
            func,
            TreeNode::new("Attribute", 2, 15).with_value("request.args.get"),
        );
        tree.add_child(
            func,
            TreeNode::new("BinOp", 3, 11).with_content("\"SELECT ...\" + user_id"),
        );
        let call = tree.add_child(func, TreeNode::new("Call", 4, 5).with_value("cursor.execute"));
        tree.add_argument(call, TreeNode::new("Name", 4, 20).with_name("sql"));
        tree
    }

    #[test]
    fn test_unsanitized_sql_flow() {
        let tree = sqli_tree();
        let flows = TaintAnalyzer::new().analyze_taint_flows(
            &[pattern("Attribute", "request")],
            &[pattern("Call", "execute")],
            &[],
            &tree,
        );
        assert_eq!(flows.len(), 1);
        let flow = &flows[0];
        assert_eq!(flow.sink_category, SinkCategory::SqlInjection);
        assert_eq!(flow.flow_distance, 2);
        assert_eq!(flow.path.len(), 2);
        // source 0.5+0.2+0.1+0.2, sink the same
        assert!((flow.confidence - 1.0).abs() < 1e-9);
        assert_eq!(flow.risk_level, RiskLevel::Critical);
        let details = flow.details();
        assert_eq!(details.cwe, vec!["CWE-89".to_string()]);
        assert!(details
            .recommendations
            .iter()
            .any(|r| r.contains("parameterized")));
        assert!(details.recommendations.iter().any(|r| r.contains("sanitize")));
    }

    #[test]
    fn test_sanitizer_between_lines_reduces_scores() {
        let mut tree = sqli_tree();
        let root = tree.roots()[0];
        tree.add_child(root, TreeNode::new("Call", 3, 1).with_value("escape_string"));

        let flows = TaintAnalyzer::new().analyze_taint_flows(
            &[pattern("Attribute", "request")],
            &[pattern("Call", "execute")],
            &[pattern("Call", "escape")],
            &tree,
        );
        assert_eq!(flows.len(), 1);
        let flow = &flows[0];
        assert_eq!(flow.sanitizers.len(), 1);
        assert!((flow.confidence - 0.3).abs() < 1e-9);
        assert!((flow.risk_score - 0.8).abs() < 1e-9);
        assert!(!flow
            .details()
            .recommendations
            .iter()
            .any(|r| r.contains("sanitize untrusted")));
    }

    #[test]
    fn test_distant_unrelated_nodes_do_not_flow() {
        let mut tree = NodeTree::new();
        let module = tree.add_root(TreeNode::new("Module", 1, 1));
        tree.add_child(module, TreeNode::new("Attribute", 2, 1).with_value("request.form"));
        tree.add_child(module, TreeNode::new("Call", 40, 1).with_value("os.system"));

        let analyzer = TaintAnalyzer::new();
        let flows = analyzer.analyze_taint_flows(
            &[pattern("Attribute", "request")],
            &[pattern("Call", "system")],
            &[],
            &tree,
        );
        assert!(flows.is_empty());

        let wide = analyzer.with_proximity_lines(50).analyze_taint_flows(
            &[pattern("Attribute", "request")],
            &[pattern("Call", "system")],
            &[],
            &tree,
        );
        assert_eq!(wide.len(), 1);
        assert_eq!(wide[0].sink_category, SinkCategory::CommandExecution);
    }

    #[test]
    fn test_parent_child_flow_ignores_distance() {
        let mut tree = NodeTree::new();
        let call = tree.add_root(TreeNode::new("Call", 1, 1).with_value("eval"));
        tree.add_argument(call, TreeNode::new("Attribute", 99, 1).with_value("request.body"));

        let flows = TaintAnalyzer::new().analyze_taint_flows(
            &[pattern("Attribute", "request")],
            &[pattern("Call", "eval")],
            &[],
            &tree,
        );
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow_distance, 98);
        assert_eq!(flows[0].sink_category, SinkCategory::CodeExecution);
    }

    #[test]
    fn test_wildcard_type_matches_any_node() {
        let tree = sqli_tree();
        let any_source = TaintPattern::new(
            NodeTypeSpec::wildcard(),
            vec![StringPattern::contains("request")],
        );
        let hits = TaintAnalyzer::new().find_matches(&any_source, TaintRole::Source, &tree);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_type, "Attribute");
    }

    #[test]
    fn test_nodes_without_text_never_match_string_patterns() {
        let node = TreeNode::new("Call", 1, 1);
        assert!(!matches_taint_pattern(&pattern("Call", "x"), &node));
        assert!(matches_taint_pattern(
            &TaintPattern::new(NodeTypeSpec::Exact("Call".into()), vec![]),
            &node
        ));
    }
}
