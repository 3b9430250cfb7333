use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    // keywords
    And,
    Or,
    Not,
    Taint,
    Source,
    Sink,
    Sanitizer,
    Exists,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Matches,

    // wildcard markers
    All,
    Any,
    None,
    Wildcard, // *

    // literals
    Identifier,
    String,
    Regex,
    Number,

    // operators
    EqEq,  // ==
    NotEq, // !=
    Gte,   // >=
    Lte,   // <=
    Tilde, // ~=
    Eq,    // =
    Gt,    // >
    Lt,    // <

    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Pipe,

    Eof,
}

impl TokenKind {
    /// Reserved words are matched case-insensitively.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word.to_ascii_uppercase().as_str() {
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "NOT" => TokenKind::Not,
            "TAINT" => TokenKind::Taint,
            "SOURCE" => TokenKind::Source,
            "SINK" => TokenKind::Sink,
            "SANITIZER" => TokenKind::Sanitizer,
            "EXISTS" => TokenKind::Exists,
            "IN" => TokenKind::In,
            "CONTAINS" => TokenKind::Contains,
            "STARTS_WITH" => TokenKind::StartsWith,
            "ENDS_WITH" => TokenKind::EndsWith,
            "MATCHES" => TokenKind::Matches,
            "ALL" => TokenKind::All,
            "ANY" => TokenKind::Any,
            "NONE" => TokenKind::None,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::And
                | TokenKind::Or
                | TokenKind::Not
                | TokenKind::Taint
                | TokenKind::Source
                | TokenKind::Sink
                | TokenKind::Sanitizer
                | TokenKind::Exists
                | TokenKind::In
                | TokenKind::Contains
                | TokenKind::StartsWith
                | TokenKind::EndsWith
                | TokenKind::Matches
                | TokenKind::All
                | TokenKind::Any
                | TokenKind::None
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::And => "AND",
            TokenKind::Or => "OR",
            TokenKind::Not => "NOT",
            TokenKind::Taint => "TAINT",
            TokenKind::Source => "SOURCE",
            TokenKind::Sink => "SINK",
            TokenKind::Sanitizer => "SANITIZER",
            TokenKind::Exists => "EXISTS",
            TokenKind::In => "IN",
            TokenKind::Contains => "CONTAINS",
            TokenKind::StartsWith => "STARTS_WITH",
            TokenKind::EndsWith => "ENDS_WITH",
            TokenKind::Matches => "MATCHES",
            TokenKind::All => "all",
            TokenKind::Any => "any",
            TokenKind::None => "none",
            TokenKind::Wildcard => "'*'",
            TokenKind::Identifier => "identifier",
            TokenKind::String => "string literal",
            TokenKind::Regex => "regex literal",
            TokenKind::Number => "number",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Gte => "'>='",
            TokenKind::Lte => "'<='",
            TokenKind::Tilde => "'~='",
            TokenKind::Eq => "'='",
            TokenKind::Gt => "'>'",
            TokenKind::Lt => "'<'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Pipe => "'|'",
            TokenKind::Eof => "end of input",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A lexed EQL token.
///
/// `text` holds the unescaped value for string literals and the raw
/// `/body/flags` literal for regexes; for everything else it is the source
/// slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        text: impl Into<String>,
        offset: usize,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            kind,
            text: text.into(),
            offset,
            line,
            column,
        }
    }

    /// Splits a regex literal into `(body, flags)`.
    pub fn regex_parts(&self) -> Option<(&str, &str)> {
        if self.kind != TokenKind::Regex {
            return None;
        }
        let inner = self.text.strip_prefix('/')?;
        let close = inner.rfind('/')?;
        Some((&inner[..close], &inner[close + 1..]))
    }
}
