//! Confidence and risk scoring.
//!
//! Every number the engine attaches to a match goes through a
//! [`ScoringStrategy`], so tuning never touches the matching code.

use crate::eql::query::{NodePattern, TaintPattern};
use crate::taint::SinkCategory;

pub trait ScoringStrategy: Send + Sync {
    /// Confidence of a structural node-pattern match.
    fn structural(&self, pattern: &NodePattern) -> f64;

    /// Confidence of a source, sink or sanitizer match. `keyword_hit` is true
    /// when the node text contains a keyword typical for the role.
    fn taint_match(&self, pattern: &TaintPattern, keyword_hit: bool) -> f64;

    /// Confidence of a node matched by NOT.
    fn negated(&self) -> f64;

    /// Confidence of a whole flow given its endpoint confidences.
    fn flow_confidence(&self, source: f64, sink: f64, sanitizers: usize) -> f64;

    fn risk(&self, source: f64, sink: f64, sanitizers: usize, category: SinkCategory) -> f64;
}

/// The stock constants.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScoring;

impl DefaultScoring {
    pub const BASE: f64 = 0.5;
    pub const EXACT_TYPE_STRUCTURAL: f64 = 0.3;
    pub const PER_PROPERTY: f64 = 0.1;
    pub const EXACT_TYPE_TAINT: f64 = 0.2;
    pub const PER_STRING_PATTERN: f64 = 0.1;
    pub const KEYWORD: f64 = 0.2;
    pub const SANITIZED_FACTOR: f64 = 0.3;
    pub const PER_SANITIZER_RISK: f64 = 0.2;
    pub const EXECUTION_RISK: f64 = 0.3;
}

impl ScoringStrategy for DefaultScoring {
    fn structural(&self, pattern: &NodePattern) -> f64 {
        let mut score = Self::BASE;
        if pattern.node_type.is_exact() {
            score += Self::EXACT_TYPE_STRUCTURAL;
        }
        score += Self::PER_PROPERTY * pattern.properties.len() as f64;
        clamp_unit(score)
    }

    fn taint_match(&self, pattern: &TaintPattern, keyword_hit: bool) -> f64 {
        let mut score = Self::BASE;
        if pattern.node_type.is_exact() {
            score += Self::EXACT_TYPE_TAINT;
        }
        score += Self::PER_STRING_PATTERN * pattern.patterns.len() as f64;
        if keyword_hit {
            score += Self::KEYWORD;
        }
        clamp_unit(score)
    }

    fn negated(&self) -> f64 {
        Self::BASE
    }

    fn flow_confidence(&self, source: f64, sink: f64, sanitizers: usize) -> f64 {
        let mean = (source + sink) / 2.0;
        if sanitizers > 0 {
            clamp_unit(mean * Self::SANITIZED_FACTOR)
        } else {
            clamp_unit(mean)
        }
    }

    fn risk(&self, source: f64, sink: f64, sanitizers: usize, category: SinkCategory) -> f64 {
        let mut risk = (source + sink) / 2.0 - Self::PER_SANITIZER_RISK * sanitizers as f64;
        if matches!(
            category,
            SinkCategory::CodeExecution | SinkCategory::CommandExecution
        ) {
            risk += Self::EXECUTION_RISK;
        }
        clamp_unit(risk)
    }
}

/// Clamp into [0, 1]. NaN maps to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eql::query::{NodeTypeSpec, PropertyPattern, StringPattern};

    #[test]
    fn test_structural_scores() {
        let s = DefaultScoring;
        assert!((s.structural(&NodePattern::new(NodeTypeSpec::wildcard())) - 0.5).abs() < 1e-9);
        assert!((s.structural(&NodePattern::exact("Call")) - 0.8).abs() < 1e-9);

        let heavy = (0..5).fold(NodePattern::exact("Call"), |p, i| {
            p.with_property(PropertyPattern::exists(&format!("p{}", i)))
        });
        assert_eq!(s.structural(&heavy), 1.0);
    }

    #[test]
    fn test_taint_match_scores() {
        let s = DefaultScoring;
        let p = TaintPattern::new(
            NodeTypeSpec::Exact("Identifier".into()),
            vec![StringPattern::exact("userInput")],
        );
        assert!((s.taint_match(&p, false) - 0.8).abs() < 1e-9);
        assert!((s.taint_match(&p, true) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flow_and_risk() {
        let s = DefaultScoring;
        assert!((s.flow_confidence(0.8, 1.0, 0) - 0.9).abs() < 1e-9);
        assert!((s.flow_confidence(0.8, 1.0, 3) - 0.27).abs() < 1e-9);

        assert_eq!(s.risk(1.0, 1.0, 0, SinkCategory::CodeExecution), 1.0);
        assert!((s.risk(0.8, 0.8, 1, SinkCategory::SqlInjection) - 0.6).abs() < 1e-9);
        assert_eq!(s.risk(0.5, 0.5, 4, SinkCategory::Generic), 0.0);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(-1.0), 0.0);
        assert_eq!(clamp_unit(2.0), 1.0);
    }
}
