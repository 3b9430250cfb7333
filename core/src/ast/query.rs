use crate::ast::cache::{fingerprint, CacheKey, QueryCache};
use crate::ast::matcher::StructuralMatcher;
use crate::ast::node::{NodeId, NodeTree};
use crate::ast::options::QueryOptions;
use crate::config::EngineConfig;
use crate::eql::query::{LogicalOperator, Query, TaintExpression};
use crate::eql::{validate, CompiledQuery};
use crate::error::EngineError;
use crate::scoring::{DefaultScoring, ScoringStrategy};
use crate::taint::{TaintAnalyzer, TaintFlowResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub node: NodeId,
    /// Canonical EQL text of the query that produced the match.
    pub pattern: String,
    pub confidence: f64,
    pub metadata: MatchMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchMetadata {
    pub node_type: String,
    pub line: u32,
    pub column: u32,
    pub negated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<TaintFlowResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub queries_executed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Time spent producing results, cache lookups included.
    pub total_time: Duration,
    pub cache_entries: usize,
}

impl EngineStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    pub fn average_time(&self) -> Duration {
        if self.queries_executed == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_time.as_nanos() / u128::from(self.queries_executed);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

#[derive(Default)]
struct Counters {
    queries_executed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_nanos: AtomicU64,
}

/// A node matched while evaluating a sub-expression.
#[derive(Debug, Clone)]
struct Hit {
    confidence: f64,
    negated: bool,
    flow: Option<TaintFlowResult>,
}

/// Evaluates EQL queries over a node tree.
///
/// The engine is `Send + Sync`; one instance can serve many threads. Results
/// are memoized in a [`QueryCache`] that may be shared between engines.
pub struct QueryEngine {
    config: EngineConfig,
    cache: Option<Arc<QueryCache>>,
    scoring: Arc<dyn ScoringStrategy>,
    taint: TaintAnalyzer,
    counters: Counters,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl QueryEngine {
    pub fn new(config: EngineConfig) -> Self {
        let cache = config
            .cache_enabled
            .then(|| Arc::new(QueryCache::new(config.cache_capacity)));
        let scoring: Arc<dyn ScoringStrategy> = Arc::new(DefaultScoring);
        let taint = TaintAnalyzer::new()
            .with_scoring(scoring.clone())
            .with_proximity_lines(config.proximity_lines);

        Self {
            config,
            cache,
            scoring,
            taint,
            counters: Counters::default(),
        }
    }

    /// Use a cache shared with other engines. Engines sharing a cache should
    /// use the same scoring strategy.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringStrategy>) -> Self {
        self.taint = self.taint.with_scoring(scoring.clone());
        self.scoring = scoring;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.cache.as_ref()
    }

    pub fn taint_analyzer(&self) -> &TaintAnalyzer {
        &self.taint
    }

    /// Validate and run a query.
    pub fn execute_query(
        &self,
        query: &Query,
        tree: &NodeTree,
        options: &QueryOptions,
    ) -> Result<Vec<MatchResult>, EngineError> {
        let report = validate(query);
        if !report.valid {
            return Err(EngineError::InvalidQuery {
                errors: report.errors,
            });
        }
        Ok(self.run(query, None, tree, options))
    }

    /// Run a query that was already validated by [`crate::eql::compile`].
    pub fn execute(
        &self,
        compiled: &CompiledQuery,
        tree: &NodeTree,
        options: &QueryOptions,
    ) -> Vec<MatchResult> {
        self.run(compiled.query(), compiled.fingerprint(), tree, options)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            queries_executed: self.counters.queries_executed.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            total_time: Duration::from_nanos(self.counters.total_nanos.load(Ordering::Relaxed)),
            cache_entries: self.cache.as_ref().map(|c| c.len()).unwrap_or(0),
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            debug!("query cache cleared");
        }
    }

    fn run(
        &self,
        query: &Query,
        query_fp: Option<&str>,
        tree: &NodeTree,
        options: &QueryOptions,
    ) -> Vec<MatchResult> {
        let started = Instant::now();
        self.counters.queries_executed.fetch_add(1, Ordering::Relaxed);

        let options = self.effective_options(options);
        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| Some((cache, self.cache_key(query, query_fp, tree, &options)?)));

        let results = match cached {
            Some((cache, key)) => match cache.get(&key) {
                Some(hit) => {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(query = %key.query, "query cache hit");
                    hit.as_ref().clone()
                }
                None => {
                    self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
                    debug!(query = %key.query, "query cache miss");
                    let results = self.evaluate(query, tree, &options);
                    cache.insert(key, Arc::new(results.clone()));
                    results
                }
            },
            None => self.evaluate(query, tree, &options),
        };

        let elapsed = started.elapsed();
        self.counters
            .total_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        debug!(
            results = results.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "query executed"
        );
        results
    }

    fn effective_options<'a>(&self, options: &'a QueryOptions) -> Cow<'a, QueryOptions> {
        match (options.limit, self.config.default_limit) {
            (None, Some(limit)) => Cow::Owned(options.clone().with_limit(limit)),
            _ => Cow::Borrowed(options),
        }
    }

    fn cache_key(
        &self,
        query: &Query,
        query_fp: Option<&str>,
        tree: &NodeTree,
        options: &QueryOptions,
    ) -> Option<CacheKey> {
        let query_fp = match query_fp {
            Some(fp) => fp.to_string(),
            None => match fingerprint(query) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!("Failed to fingerprint query, skipping cache: {}", e);
                    return None;
                }
            },
        };
        let Some(tree_fp) = tree.fingerprint() else {
            warn!("Failed to fingerprint node tree, skipping cache");
            return None;
        };
        // proximity changes taint results, so it is part of the options key
        let options_fp = match fingerprint(&(options, self.config.proximity_lines)) {
            Ok(fp) => fp,
            Err(e) => {
                warn!("Failed to fingerprint query options, skipping cache: {}", e);
                return None;
            }
        };
        Some(CacheKey::new(query_fp, tree_fp, options_fp))
    }

    fn evaluate(&self, query: &Query, tree: &NodeTree, options: &QueryOptions) -> Vec<MatchResult> {
        let label = query.to_string();

        let results: Vec<MatchResult> = match query {
            // one result per flow, anchored at the sink
            Query::Taint(expr) => self
                .taint
                .analyze(expr, tree)
                .into_iter()
                .map(|flow| {
                    let sink = flow.sink.node;
                    let hit = Hit {
                        confidence: flow.confidence,
                        negated: false,
                        flow: Some(flow),
                    };
                    to_result(sink, hit, &label, tree)
                })
                .collect(),
            other => self
                .eval(other, tree)
                .into_iter()
                .map(|(id, hit)| to_result(id, hit, &label, tree))
                .collect(),
        };

        options.apply(results)
    }

    fn eval(&self, query: &Query, tree: &NodeTree) -> BTreeMap<NodeId, Hit> {
        match query {
            Query::Pattern(expr) => {
                let matcher = StructuralMatcher::new(tree);
                let confidence = self.scoring.structural(&expr.pattern);
                tree.ids()
                    .filter(|id| matcher.matches_expression(*id, expr))
                    .map(|id| {
                        (
                            id,
                            Hit {
                                confidence,
                                negated: false,
                                flow: None,
                            },
                        )
                    })
                    .collect()
            }
            Query::Taint(expr) => self.eval_taint(expr, tree),
            Query::Logical(expr) => match expr.operator {
                LogicalOperator::And => self.eval_and(&expr.operands, tree),
                LogicalOperator::Or => self.eval_or(&expr.operands, tree),
                LogicalOperator::Not => self.eval_not(&expr.operands, tree),
            },
        }
    }

    /// Flows collapsed to their sinks, keeping the most confident flow.
    fn eval_taint(&self, expr: &TaintExpression, tree: &NodeTree) -> BTreeMap<NodeId, Hit> {
        let mut hits = BTreeMap::new();
        for flow in self.taint.analyze(expr, tree) {
            let hit = Hit {
                confidence: flow.confidence,
                negated: false,
                flow: Some(flow.clone()),
            };
            keep_best(&mut hits, flow.sink.node, hit);
        }
        hits
    }

    fn eval_and(&self, operands: &[Query], tree: &NodeTree) -> BTreeMap<NodeId, Hit> {
        let Some((first, rest)) = operands.split_first() else {
            return BTreeMap::new();
        };

        let mut acc = self.eval(first, tree);
        for operand in rest {
            if acc.is_empty() {
                break;
            }
            let mut next = self.eval(operand, tree);
            acc = acc
                .into_iter()
                .filter_map(|(id, mut hit)| {
                    let other = next.remove(&id)?;
                    hit.confidence = hit.confidence.min(other.confidence);
                    hit.negated &= other.negated;
                    if hit.flow.is_none() {
                        hit.flow = other.flow;
                    }
                    Some((id, hit))
                })
                .collect();
        }
        acc
    }

    fn eval_or(&self, operands: &[Query], tree: &NodeTree) -> BTreeMap<NodeId, Hit> {
        let mut acc = BTreeMap::new();
        for operand in operands {
            for (id, hit) in self.eval(operand, tree) {
                keep_best(&mut acc, id, hit);
            }
        }
        acc
    }

    /// Complement of the union of the operands.
    fn eval_not(&self, operands: &[Query], tree: &NodeTree) -> BTreeMap<NodeId, Hit> {
        let matched: BTreeSet<NodeId> = operands
            .iter()
            .flat_map(|op| self.eval(op, tree).into_keys())
            .collect();
        let confidence = self.scoring.negated();

        tree.ids()
            .filter(|id| !matched.contains(id))
            .map(|id| {
                (
                    id,
                    Hit {
                        confidence,
                        negated: true,
                        flow: None,
                    },
                )
            })
            .collect()
    }
}

fn keep_best(hits: &mut BTreeMap<NodeId, Hit>, id: NodeId, hit: Hit) {
    match hits.get(&id) {
        Some(existing) if existing.confidence >= hit.confidence => {}
        _ => {
            hits.insert(id, hit);
        }
    }
}

fn to_result(id: NodeId, hit: Hit, label: &str, tree: &NodeTree) -> MatchResult {
    let node = &tree[id];
    MatchResult {
        node: id,
        pattern: label.to_string(),
        confidence: hit.confidence,
        metadata: MatchMetadata {
            node_type: node.node_type.clone(),
            line: node.line,
            column: node.column,
            negated: hit.negated,
            flow: hit.flow,
        },
    }
}
