// EQL 查询语言：词法、语法、校验

pub mod lexer;
pub mod parser;
pub mod query;
pub mod regex_cache;
pub mod token;
pub mod validator;

pub use lexer::tokenize;
pub use parser::parse;
pub use query::*;
pub use token::{Token, TokenKind};
pub use validator::{validate, ValidationIssue, ValidationReport};

use crate::ast::cache::fingerprint;
use crate::error::CompileError;

/// Lex and parse without validating.
pub fn parse_query(source: &str) -> Result<Query, CompileError> {
    let tokens = tokenize(source)?;
    Ok(parse(tokens)?)
}

/// A query that lexed, parsed and validated cleanly.
///
/// Compile once and execute many times; the engine trusts the validation
/// done here. Fields are read-only so the fingerprint always describes the
/// query it was computed from.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    source: String,
    query: Query,
    warnings: Vec<ValidationIssue>,
    fingerprint: Option<String>,
}

pub fn compile(source: &str) -> Result<CompiledQuery, CompileError> {
    let query = parse_query(source)?;
    CompiledQuery::from_query(source, query)
}

impl CompiledQuery {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn from_query(source: impl Into<String>, query: Query) -> Result<Self, CompileError> {
        let report = validate(&query);
        if !report.valid {
            return Err(CompileError::Invalid(report));
        }
        let fingerprint = fingerprint(&query).ok();
        Ok(Self {
            source: source.into(),
            query,
            warnings: report.warnings,
            fingerprint,
        })
    }
}
