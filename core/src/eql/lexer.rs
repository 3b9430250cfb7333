//! EQL lexer.
//!
//! Tokenizes query strings like
//! `TAINT(SOURCE: Identifier { "userInput" }, SINK: CallExpr { "query" })`.

use super::token::{Token, TokenKind};
use crate::error::LexError;

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    // only whitespace seen since the last newline
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
            if !ch.is_whitespace() {
                self.at_line_start = false;
            }
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>, line: usize, column: usize) -> LexError {
        LexError {
            message: message.into(),
            line,
            column,
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' && self.at_line_start {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();
            let (start, line, column) = (self.pos, self.line, self.column);
            let Some(ch) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, "", self.pos, self.line, self.column));
                break;
            };

            let token = match ch {
                '"' | '\'' | '`' => self.lex_string(ch)?,
                '/' => self.lex_regex()?,
                c if c.is_ascii_digit() => self.lex_number(),
                '-' if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number(),
                c if c.is_ascii_alphabetic() || c == '_' => self.lex_word(),
                _ => {
                    let kind = self.lex_symbol(ch).ok_or_else(|| {
                        self.error(format!("unrecognized character '{}'", ch), line, column)
                    })?;
                    Token::new(kind, &self.src[start..self.pos], start, line, column)
                }
            };
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn lex_symbol(&mut self, ch: char) -> Option<TokenKind> {
        let next = self.peek_nth(1);
        let two = match (ch, next) {
            ('=', Some('=')) => Some(TokenKind::EqEq),
            ('!', Some('=')) => Some(TokenKind::NotEq),
            ('>', Some('=')) => Some(TokenKind::Gte),
            ('<', Some('=')) => Some(TokenKind::Lte),
            ('~', Some('=')) => Some(TokenKind::Tilde),
            _ => None,
        };
        if let Some(kind) = two {
            self.advance();
            self.advance();
            return Some(kind);
        }

        let kind = match ch {
            '=' => TokenKind::Eq,
            '>' => TokenKind::Gt,
            '<' => TokenKind::Lt,
            '*' => TokenKind::Wildcard,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '|' => TokenKind::Pipe,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, LexError> {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance();
        let mut value = String::new();

        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal", line, column)),
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    None => return Err(self.error("unterminated string literal", line, column)),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other) => value.push(other),
                },
                Some(c) => value.push(c),
            }
        }

        Ok(Token::new(TokenKind::String, value, start, line, column))
    }

    fn lex_regex(&mut self) -> Result<Token, LexError> {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance();
        let mut in_class = false;

        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(self.error("unterminated regex literal", line, column));
                }
                Some('\\') => {
                    if matches!(self.peek(), None | Some('\n')) {
                        return Err(self.error("unterminated regex literal", line, column));
                    }
                    self.advance();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }

        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.advance();
        }

        Ok(Token::new(
            TokenKind::Regex,
            &self.src[start..self.pos],
            start,
            line,
            column,
        ))
    }

    fn lex_number(&mut self) -> Token {
        let (start, line, column) = (self.pos, self.line, self.column);
        if self.peek() == Some('-') {
            self.advance();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        Token::new(TokenKind::Number, &self.src[start..self.pos], start, line, column)
    }

    fn lex_word(&mut self) -> Token {
        let (start, line, column) = (self.pos, self.line, self.column);
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            self.advance();
        }
        let word = &self.src[start..self.pos];
        let kind = TokenKind::keyword(word).unwrap_or(TokenKind::Identifier);
        Token::new(kind, word, start, line, column)
    }
}

/// Tokenize an EQL source string. The result always ends in exactly one EOF token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}
