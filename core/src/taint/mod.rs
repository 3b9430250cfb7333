// 污点分析：源 -> 汇聚点，经过净化器

pub mod analyzer;
pub mod types;

pub use analyzer::{matches_taint_pattern, TaintAnalyzer};
pub use types::{
    FlowDetails, FlowEndpoint, PathNode, RiskLevel, SinkCategory, TaintFlowResult, TaintRole,
};
