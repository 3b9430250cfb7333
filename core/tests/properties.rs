use eql_core::eql::{tokenize, TokenKind};
use eql_core::{
    parse_query, EngineConfig, MatchResult, NodeId, NodeTree, QueryEngine, QueryOptions, TreeNode,
};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::{BTreeMap, BTreeSet};

const TYPES: &[&str] = &["A", "B", "C", "D"];
const ATOMS: &[&str] = &["A", "B", "C", "*[line > 10]", "* IN A|D", "A { B }", "* NOT IN C"];

fn tree_strategy() -> impl Strategy<Value = NodeTree> {
    prop::collection::vec((0..TYPES.len(), any::<Index>(), 1u32..40), 1..24).prop_map(|specs| {
        let mut tree = NodeTree::new();
        for (i, (ty, parent, line)) in specs.into_iter().enumerate() {
            let node = TreeNode::new(TYPES[ty], line, 1).with_name(format!("n{}", line));
            if i == 0 {
                tree.add_root(node);
            } else {
                tree.add_child(NodeId(parent.index(i)), node);
            }
        }
        tree
    })
}

fn atom() -> impl Strategy<Value = &'static str> {
    prop::sample::select(ATOMS)
}

fn engine() -> QueryEngine {
    QueryEngine::new(EngineConfig {
        cache_enabled: false,
        ..EngineConfig::default()
    })
}

fn results(engine: &QueryEngine, src: &str, tree: &NodeTree) -> Vec<MatchResult> {
    engine
        .execute_query(&parse_query(src).unwrap(), tree, &QueryOptions::default())
        .unwrap()
}

fn confidences(engine: &QueryEngine, src: &str, tree: &NodeTree) -> BTreeMap<NodeId, f64> {
    results(engine, src, tree)
        .into_iter()
        .map(|r| (r.node, r.confidence))
        .collect()
}

/// Per-node `pick` over nodes present in both maps (`AND`) or either map (`OR`).
fn combine(
    a: &BTreeMap<NodeId, f64>,
    b: &BTreeMap<NodeId, f64>,
    both: bool,
    pick: fn(f64, f64) -> f64,
) -> BTreeMap<NodeId, f64> {
    let ids: BTreeSet<NodeId> = a.keys().chain(b.keys()).copied().collect();
    ids.into_iter()
        .filter_map(|id| match (a.get(&id), b.get(&id)) {
            (Some(x), Some(y)) => Some((id, pick(*x, *y))),
            (Some(x), None) | (None, Some(x)) if !both => Some((id, *x)),
            _ => None,
        })
        .collect()
}

proptest! {
    #[test]
    fn lexer_never_panics_and_ends_in_eof(src in ".{0,64}") {
        if let Ok(tokens) = tokenize(&src) {
            prop_assert_eq!(tokens.iter().filter(|t| t.kind == TokenKind::Eof).count(), 1);
            prop_assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
        }
    }

    #[test]
    fn parser_never_panics(src in "[A-Z(),*\\[\\]{}:| ]{0,40}") {
        let _ = parse_query(&src);
    }

    #[test]
    fn logical_algebra_matches_set_algebra(tree in tree_strategy(), a in atom(), b in atom()) {
        let engine = engine();
        let all: BTreeSet<NodeId> = tree.ids().collect();
        let ca = confidences(&engine, a, &tree);
        let cb = confidences(&engine, b, &tree);

        // AND keeps the weaker operand, OR the stronger
        let and = confidences(&engine, &format!("AND({}, {})", a, b), &tree);
        prop_assert_eq!(and, combine(&ca, &cb, true, f64::min));

        let or = confidences(&engine, &format!("OR({}, {})", a, b), &tree);
        prop_assert_eq!(or, combine(&ca, &cb, false, f64::max));

        let not = results(&engine, &format!("NOT({})", a), &tree);
        let not_ids: BTreeSet<NodeId> = not.iter().map(|r| r.node).collect();
        let expected: BTreeSet<NodeId> =
            all.iter().filter(|id| !ca.contains_key(*id)).copied().collect();
        prop_assert_eq!(not_ids, expected);
        for r in &not {
            prop_assert!(r.metadata.negated);
            prop_assert_eq!(r.confidence, 0.5);
        }

        let double = results(&engine, &format!("NOT(NOT({}))", a), &tree);
        let double_ids: BTreeSet<NodeId> = double.iter().map(|r| r.node).collect();
        prop_assert_eq!(double_ids, ca.keys().copied().collect::<BTreeSet<_>>());
        prop_assert!(double.iter().all(|r| r.metadata.negated && r.confidence == 0.5));
    }

    #[test]
    fn confidences_stay_in_unit_interval(tree in tree_strategy(), a in atom(), b in atom()) {
        let engine = engine();
        for src in [
            format!("AND({}, {})", a, b),
            format!("OR({}, NOT({}))", a, b),
            r#"TAINT(SOURCE: A { STARTS_WITH "n" }, SINK: B { CONTAINS "1" }, SANITIZER: C)"#
                .to_string(),
        ] {
            let results = engine
                .execute_query(&parse_query(&src).unwrap(), &tree, &QueryOptions::default())
                .unwrap();
            for r in &results {
                prop_assert!((0.0..=1.0).contains(&r.confidence));
                if let Some(flow) = &r.metadata.flow {
                    prop_assert!((0.0..=1.0).contains(&flow.risk_score));
                    prop_assert!((0.0..=1.0).contains(&flow.confidence));
                }
            }
        }
    }

    #[test]
    fn cached_and_uncached_agree(tree in tree_strategy(), a in atom(), b in atom()) {
        let cached = QueryEngine::default();
        let uncached = engine();
        let query = parse_query(&format!("OR({}, {})", a, b)).unwrap();
        let options = QueryOptions::default();
        let first = cached.execute_query(&query, &tree, &options).unwrap();
        let second = cached.execute_query(&query, &tree, &options).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, uncached.execute_query(&query, &tree, &options).unwrap());
        prop_assert_eq!(cached.stats().cache_hits, 1);
    }
}
