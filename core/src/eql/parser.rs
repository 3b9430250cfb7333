//! EQL parser.
//!
//! Recursive descent over the token stream produced by the lexer. Parses a
//! complete query and rejects anything left over after it.

use super::query::{
    Constraint, LogicalExpression, LogicalOperator, NodePattern, NodeTypeSpec, PatternExpression,
    PropertyOperator, PropertyPattern, PropertyValue, Query, RegexFlags, StringMatchKind,
    StringPattern, TaintExpression, TaintPattern, WildcardFilter,
};
use super::token::{Token, TokenKind};
use crate::error::ParseError;

/// Deepest nesting of expressions and node patterns a query may use.
pub const MAX_NESTING_DEPTH: usize = 128;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let (offset, line, column) = tokens
                .last()
                .map(|t| (t.offset + t.text.len(), t.line, t.column + t.text.len()))
                .unwrap_or((0, 1, 1));
            tokens.push(Token::new(TokenKind::Eof, "", offset, line, column));
        }
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Runs `f` one nesting level deeper, failing past [`MAX_NESTING_DEPTH`].
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            let tok = self.peek().clone();
            return Err(self.error_at(&tok, "query nested too deeply"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected {} {}", kind, context)))
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: token.offset,
            line: token.line,
            column: token.column,
        }
    }

    fn unexpected(&self, expectation: &str) -> ParseError {
        let tok = self.peek();
        self.error_at(tok, format!("{}, found {}", expectation, describe(tok)))
    }

    pub fn parse(&mut self) -> Result<Query, ParseError> {
        if self.check(TokenKind::Eof) {
            let tok = self.peek().clone();
            return Err(self.error_at(&tok, "empty query"));
        }

        let query = self.parse_expression()?;
        self.eat(TokenKind::Semicolon);

        if !self.check(TokenKind::Eof) {
            return Err(self.unexpected("expected end of query"));
        }
        Ok(query)
    }

    fn parse_expression(&mut self) -> Result<Query, ParseError> {
        self.nested(Self::parse_expression_at_depth)
    }

    fn parse_expression_at_depth(&mut self) -> Result<Query, ParseError> {
        match self.peek_kind() {
            TokenKind::Taint => self.parse_taint(),
            TokenKind::And => self.parse_logical(LogicalOperator::And),
            TokenKind::Or => self.parse_logical(LogicalOperator::Or),
            TokenKind::Not => self.parse_logical(LogicalOperator::Not),
            TokenKind::Identifier
            | TokenKind::Wildcard
            | TokenKind::All
            | TokenKind::Any
            | TokenKind::None => self.parse_pattern_expression(),
            _ => Err(self.unexpected("expected expression")),
        }
    }

    fn parse_logical(&mut self, operator: LogicalOperator) -> Result<Query, ParseError> {
        let keyword = self.advance();
        self.expect(TokenKind::LParen, &format!("after {}", keyword.kind))?;

        let mut operands = vec![self.parse_expression()?];
        while self.eat(TokenKind::Comma) {
            operands.push(self.parse_expression()?);
        }
        self.expect(TokenKind::RParen, &format!("to close {}", keyword.kind))?;

        Ok(Query::Logical(LogicalExpression { operator, operands }))
    }

    fn parse_taint(&mut self) -> Result<Query, ParseError> {
        self.advance();
        self.expect(TokenKind::LParen, "after TAINT")?;

        let source = self.parse_flow_pattern(TokenKind::Source)?;
        self.expect(TokenKind::Comma, "after SOURCE pattern")?;
        let sink = self.parse_flow_pattern(TokenKind::Sink)?;

        let mut sanitizers = Vec::new();
        while self.eat(TokenKind::Comma) {
            sanitizers.push(self.parse_flow_pattern(TokenKind::Sanitizer)?);
        }
        self.expect(TokenKind::RParen, "to close TAINT")?;

        Ok(Query::Taint(TaintExpression {
            source,
            sink,
            sanitizers,
        }))
    }

    /// `KEYWORD : nodeTypes { stringPattern, ... }`
    fn parse_flow_pattern(&mut self, role: TokenKind) -> Result<TaintPattern, ParseError> {
        self.expect(role, "pattern")?;
        self.expect(TokenKind::Colon, &format!("after {}", role))?;
        let node_type = self.parse_node_types()?;

        let mut patterns = Vec::new();
        if self.eat(TokenKind::LBrace) {
            if !self.check(TokenKind::RBrace) {
                patterns.push(self.parse_string_pattern()?);
                while self.eat(TokenKind::Comma) {
                    patterns.push(self.parse_string_pattern()?);
                }
            }
            self.expect(TokenKind::RBrace, &format!("to close {} patterns", role))?;
        }

        Ok(TaintPattern::new(node_type, patterns))
    }

    fn parse_pattern_expression(&mut self) -> Result<Query, ParseError> {
        let pattern = self.parse_node_pattern()?;

        let mut constraints = Vec::new();
        if self.eat(TokenKind::Colon) {
            self.expect(TokenKind::LParen, "to open constraints")?;
            constraints.push(self.parse_constraint()?);
            while self.eat(TokenKind::Comma) {
                constraints.push(self.parse_constraint()?);
            }
            self.expect(TokenKind::RParen, "to close constraints")?;
        }

        Ok(Query::Pattern(PatternExpression {
            pattern,
            constraints,
        }))
    }

    fn parse_constraint(&mut self) -> Result<Constraint, ParseError> {
        if self.eat(TokenKind::Exists) {
            Ok(Constraint::Descendant(self.parse_node_pattern()?))
        } else {
            Ok(Constraint::Property(self.parse_property()?))
        }
    }

    fn parse_node_types(&mut self) -> Result<NodeTypeSpec, ParseError> {
        match self.peek_kind() {
            TokenKind::Wildcard | TokenKind::All | TokenKind::Any => {
                self.advance();
                if self.check(TokenKind::Not) && self.peek_kind_at(1) == TokenKind::In {
                    self.advance();
                    self.advance();
                    Ok(NodeTypeSpec::Wildcard(WildcardFilter::Except(
                        self.parse_type_union()?,
                    )))
                } else if self.eat(TokenKind::In) {
                    Ok(NodeTypeSpec::Wildcard(WildcardFilter::Only(
                        self.parse_type_union()?,
                    )))
                } else {
                    Ok(NodeTypeSpec::wildcard())
                }
            }
            TokenKind::None => {
                let tok = self.peek().clone();
                Err(self.error_at(&tok, "'none' cannot be used as a node type"))
            }
            TokenKind::Identifier => {
                let mut names = self.parse_type_union()?;
                if names.len() == 1 {
                    Ok(NodeTypeSpec::Exact(names.remove(0)))
                } else {
                    Ok(NodeTypeSpec::AnyOf(names))
                }
            }
            _ => Err(self.unexpected("expected node type")),
        }
    }

    fn parse_type_union(&mut self) -> Result<Vec<String>, ParseError> {
        let mut names = vec![self.expect(TokenKind::Identifier, "as node type")?.text];
        while self.eat(TokenKind::Pipe) {
            names.push(self.expect(TokenKind::Identifier, "after '|'")?.text);
        }
        Ok(names)
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern, ParseError> {
        self.nested(Self::parse_node_pattern_at_depth)
    }

    fn parse_node_pattern_at_depth(&mut self) -> Result<NodePattern, ParseError> {
        let mut pattern = NodePattern::new(self.parse_node_types()?);
        let (mut seen_props, mut seen_children, mut seen_args) = (false, false, false);

        loop {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::LBracket => {
                    if std::mem::replace(&mut seen_props, true) {
                        return Err(self.error_at(&tok, "duplicate property block"));
                    }
                    pattern.properties = self.parse_delimited(
                        TokenKind::LBracket,
                        TokenKind::RBracket,
                        Self::parse_property,
                    )?;
                }
                TokenKind::LBrace => {
                    if std::mem::replace(&mut seen_children, true) {
                        return Err(self.error_at(&tok, "duplicate child block"));
                    }
                    pattern.children = self.parse_delimited(
                        TokenKind::LBrace,
                        TokenKind::RBrace,
                        Self::parse_node_pattern,
                    )?;
                }
                TokenKind::LParen => {
                    if std::mem::replace(&mut seen_args, true) {
                        return Err(self.error_at(&tok, "duplicate argument block"));
                    }
                    pattern.arguments = self.parse_delimited(
                        TokenKind::LParen,
                        TokenKind::RParen,
                        Self::parse_node_pattern,
                    )?;
                }
                _ => break,
            }
        }

        Ok(pattern)
    }

    /// `open item (, item)* close`, allowing an empty list.
    fn parse_delimited<T>(
        &mut self,
        open: TokenKind,
        close: TokenKind,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        self.expect(open, "to open list")?;
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        items.push(item(self)?);
        while self.eat(TokenKind::Comma) {
            items.push(item(self)?);
        }
        self.expect(close, &format!("after {}", open))?;
        Ok(items)
    }

    fn parse_path_segment(&mut self) -> Result<String, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Identifier | TokenKind::Number => {
                self.advance();
                Ok(tok.text)
            }
            kind if kind.is_keyword() => {
                self.advance();
                Ok(tok.text)
            }
            _ => Err(self.unexpected("expected property name")),
        }
    }

    fn parse_property(&mut self) -> Result<PropertyPattern, ParseError> {
        let mut path = vec![self.parse_path_segment()?];
        while self.eat(TokenKind::Dot) {
            path.push(self.parse_path_segment()?);
        }

        let (operator, value) = match self.peek_kind() {
            TokenKind::Eq | TokenKind::EqEq => {
                self.advance();
                (PropertyOperator::Eq, self.parse_value()?)
            }
            TokenKind::NotEq => {
                self.advance();
                (PropertyOperator::NotEq, self.parse_value()?)
            }
            TokenKind::Gt => {
                self.advance();
                (PropertyOperator::Gt, self.parse_value()?)
            }
            TokenKind::Lt => {
                self.advance();
                (PropertyOperator::Lt, self.parse_value()?)
            }
            TokenKind::Gte => {
                self.advance();
                (PropertyOperator::Gte, self.parse_value()?)
            }
            TokenKind::Lte => {
                self.advance();
                (PropertyOperator::Lte, self.parse_value()?)
            }
            TokenKind::Tilde | TokenKind::Matches => {
                self.advance();
                let (pattern, flags) = self.parse_regex_operand()?;
                (
                    PropertyOperator::Matches,
                    PropertyValue::Regex { pattern, flags },
                )
            }
            TokenKind::Contains => {
                self.advance();
                (PropertyOperator::Contains, self.parse_text_operand()?)
            }
            TokenKind::StartsWith => {
                self.advance();
                (PropertyOperator::StartsWith, self.parse_text_operand()?)
            }
            TokenKind::EndsWith => {
                self.advance();
                (PropertyOperator::EndsWith, self.parse_text_operand()?)
            }
            TokenKind::In => {
                self.advance();
                let values = self.parse_delimited(
                    TokenKind::LParen,
                    TokenKind::RParen,
                    Self::parse_value,
                )?;
                (PropertyOperator::In, PropertyValue::List(values))
            }
            TokenKind::Exists => {
                self.advance();
                (PropertyOperator::Exists, PropertyValue::Null)
            }
            // a bare path is an existence check
            _ => (PropertyOperator::Exists, PropertyValue::Null),
        };

        Ok(PropertyPattern {
            path,
            operator,
            value,
        })
    }

    fn parse_value(&mut self) -> Result<PropertyValue, ParseError> {
        let tok = self.peek().clone();
        let value = match tok.kind {
            TokenKind::String => PropertyValue::String(tok.text.clone()),
            TokenKind::Number => {
                let n = tok
                    .text
                    .parse::<f64>()
                    .map_err(|_| self.error_at(&tok, format!("invalid number '{}'", tok.text)))?;
                PropertyValue::Number(n)
            }
            TokenKind::Regex => {
                let (pattern, flags) = self.regex_literal(&tok)?;
                PropertyValue::Regex { pattern, flags }
            }
            TokenKind::None => PropertyValue::Null,
            TokenKind::Identifier => match tok.text.to_ascii_lowercase().as_str() {
                "true" => PropertyValue::Bool(true),
                "false" => PropertyValue::Bool(false),
                "null" => PropertyValue::Null,
                _ => PropertyValue::String(tok.text.clone()),
            },
            _ => return Err(self.unexpected("expected value")),
        };
        self.advance();
        Ok(value)
    }

    fn parse_text_operand(&mut self) -> Result<PropertyValue, ParseError> {
        match self.peek_kind() {
            TokenKind::String | TokenKind::Identifier => {
                Ok(PropertyValue::String(self.advance().text))
            }
            _ => Err(self.unexpected("expected string")),
        }
    }

    fn parse_regex_operand(&mut self) -> Result<(String, RegexFlags), ParseError> {
        match self.peek_kind() {
            TokenKind::Regex => {
                let tok = self.advance();
                self.regex_literal(&tok)
            }
            TokenKind::String => Ok((self.advance().text, RegexFlags::default())),
            _ => Err(self.unexpected("expected regex")),
        }
    }

    fn parse_string_pattern(&mut self) -> Result<StringPattern, ParseError> {
        let kind = match self.peek_kind() {
            TokenKind::Contains => Some(StringMatchKind::Contains),
            TokenKind::StartsWith => Some(StringMatchKind::StartsWith),
            TokenKind::EndsWith => Some(StringMatchKind::EndsWith),
            _ => None,
        };
        if let Some(kind) = kind {
            self.advance();
            return match self.peek_kind() {
                TokenKind::String | TokenKind::Identifier => {
                    Ok(StringPattern::new(kind, self.advance().text))
                }
                _ => Err(self.unexpected("expected string")),
            };
        }

        match self.peek_kind() {
            TokenKind::Matches | TokenKind::Regex => {
                self.eat(TokenKind::Matches);
                let (pattern, flags) = self.parse_regex_operand()?;
                Ok(StringPattern::regex(pattern).with_flags(flags))
            }
            TokenKind::String | TokenKind::Identifier => {
                Ok(StringPattern::exact(self.advance().text))
            }
            _ => Err(self.unexpected("expected string pattern")),
        }
    }

    fn regex_literal(&self, tok: &Token) -> Result<(String, RegexFlags), ParseError> {
        let Some((body, letters)) = tok.regex_parts() else {
            return Ok((tok.text.clone(), RegexFlags::default()));
        };
        let flags = RegexFlags::parse(letters)
            .map_err(|c| self.error_at(tok, format!("unknown regex flag '{}'", c)))?;
        Ok((unescape_slashes(body), flags))
    }
}

/// `\/` only exists to get past the literal's delimiter.
fn unescape_slashes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('/') => out.push('/'),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn describe(tok: &Token) -> String {
    match tok.kind {
        TokenKind::Identifier => format!("identifier '{}'", tok.text),
        TokenKind::String => format!("string {:?}", tok.text),
        TokenKind::Number | TokenKind::Regex => format!("{} '{}'", tok.kind, tok.text),
        kind => kind.to_string(),
    }
}

/// Parse a token stream into a query.
pub fn parse(tokens: Vec<Token>) -> Result<Query, ParseError> {
    Parser::new(tokens).parse()
}
