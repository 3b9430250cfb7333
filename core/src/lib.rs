// EQL Detection Core
// 检测核心：EQL 查询语言、模式匹配引擎和污点分析

pub mod ast;
pub mod config;
pub mod eql;
pub mod rules;
pub mod scoring;
pub mod taint;

// 重新导出常用类型
pub use ast::{
    EngineStats, MatchMetadata, MatchResult, NodeId, NodeTree, QueryCache, QueryEngine,
    QueryOptions, ResultFilter, SortOrder, TreeNode,
};
pub use config::EngineConfig;
pub use eql::{compile, parse_query, validate, CompiledQuery, Query, ValidationReport};
pub use scoring::{DefaultScoring, ScoringStrategy};
pub use taint::{RiskLevel, SinkCategory, TaintAnalyzer, TaintFlowResult};

// 规则系统
pub use rules::{
    compiler::{CompiledRuleSet, RuleCompiler, RuleDiagnostic, RuleMatch},
    loader::load_rules_from_dir,
    model::{Rule, RuleSet, Severity},
};

pub mod error {
    use crate::eql::validator::{ValidationIssue, ValidationReport};
    use thiserror::Error;

    /// Malformed token stream.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("{message} at line {line}, column {column}")]
    pub struct LexError {
        pub message: String,
        pub line: usize,
        pub column: usize,
    }

    /// Malformed grammar. `position` is the byte offset of the offending token.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("{message} at position {position} (line {line}, column {column})")]
    pub struct ParseError {
        pub message: String,
        pub position: usize,
        pub line: usize,
        pub column: usize,
    }

    /// Anything that stops an EQL string from becoming an executable query.
    #[derive(Error, Debug, Clone)]
    pub enum CompileError {
        #[error("Lex error: {0}")]
        Lex(#[from] LexError),

        #[error("Parse error: {0}")]
        Parse(#[from] ParseError),

        #[error("Invalid query: {}", summarize(&.0.errors))]
        Invalid(ValidationReport),
    }

    #[derive(Error, Debug, Clone)]
    pub enum EngineError {
        #[error("Invalid query: {}", summarize(.errors))]
        InvalidQuery { errors: Vec<ValidationIssue> },
    }

    #[derive(Error, Debug)]
    pub enum CoreError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("YAML error: {0}")]
        Yaml(#[from] serde_yaml::Error),

        #[error("JSON error: {0}")]
        Json(#[from] serde_json::Error),

        #[error("Config error: {0}")]
        Config(String),

        #[error("Invalid node tree: {0}")]
        Tree(String),

        #[error(transparent)]
        Compile(#[from] CompileError),

        #[error(transparent)]
        Engine(#[from] EngineError),
    }

    fn summarize(issues: &[ValidationIssue]) -> String {
        issues
            .iter()
            .map(|issue| issue.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub type Result<T> = std::result::Result<T, CoreError>;
}
