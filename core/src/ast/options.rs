use crate::ast::query::MatchResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResultFilter {
    MinConfidence(f64),
    NodeTypes(Vec<String>),
    ExcludeNegated,
    /// Every inner filter must accept.
    All(Vec<ResultFilter>),
}

impl ResultFilter {
    pub fn accepts(&self, result: &MatchResult) -> bool {
        match self {
            ResultFilter::MinConfidence(min) => result.confidence >= *min,
            ResultFilter::NodeTypes(types) => types.iter().any(|t| *t == result.metadata.node_type),
            ResultFilter::ExcludeNegated => !result.metadata.negated,
            ResultFilter::All(filters) => filters.iter().all(|f| f.accepts(result)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    ConfidenceDesc,
    ConfidenceAsc,
    /// By line, then column.
    SourceOrder,
}

/// Post-processing of match results: filter, then sort, then limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub filter: Option<ResultFilter>,
    #[serde(default)]
    pub sort: Option<SortOrder>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: ResultFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn apply(&self, mut results: Vec<MatchResult>) -> Vec<MatchResult> {
        if let Some(filter) = &self.filter {
            results.retain(|r| filter.accepts(r));
        }

        match self.sort {
            Some(SortOrder::ConfidenceDesc) => {
                results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence))
            }
            Some(SortOrder::ConfidenceAsc) => {
                results.sort_by(|a, b| a.confidence.total_cmp(&b.confidence))
            }
            Some(SortOrder::SourceOrder) => results.sort_by_key(|r| {
                (r.metadata.line, r.metadata.column, r.node)
            }),
            None => {}
        }

        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::query::MatchMetadata;
    use crate::ast::NodeId;

    fn result(
        id: usize,
        node_type: &str,
        line: u32,
        confidence: f64,
        negated: bool,
    ) -> MatchResult {
        MatchResult {
            node: NodeId(id),
            pattern: "X".into(),
            confidence,
            metadata: MatchMetadata {
                node_type: node_type.into(),
                line,
                column: 1,
                negated,
                flow: None,
            },
        }
    }

    fn sample() -> Vec<MatchResult> {
        vec![
            result(0, "A", 9, 0.5, false),
            result(1, "B", 2, 0.9, false),
            result(2, "A", 5, 0.7, true),
            result(3, "C", 1, 0.9, false),
        ]
    }

    fn ids(results: &[MatchResult]) -> Vec<usize> {
        results.iter().map(|r| r.node.0).collect()
    }

    #[test]
    fn test_default_keeps_order() {
        assert_eq!(ids(&QueryOptions::new().apply(sample())), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_filter_sort_limit_order() {
        let opts = QueryOptions::new()
            .with_filter(ResultFilter::All(vec![
                ResultFilter::MinConfidence(0.6),
                ResultFilter::ExcludeNegated,
            ]))
            .with_sort(SortOrder::ConfidenceDesc)
            .with_limit(1);
        // ties keep arena order
        assert_eq!(ids(&opts.apply(sample())), vec![1]);
    }

    #[test]
    fn test_sorts() {
        let asc = QueryOptions::new().with_sort(SortOrder::ConfidenceAsc);
        assert_eq!(ids(&asc.apply(sample())), vec![0, 2, 1, 3]);
        let src = QueryOptions::new().with_sort(SortOrder::SourceOrder);
        assert_eq!(ids(&src.apply(sample())), vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_node_type_filter() {
        let opts = QueryOptions::new().with_filter(ResultFilter::NodeTypes(vec!["A".into()]));
        assert_eq!(ids(&opts.apply(sample())), vec![0, 2]);
    }
}
