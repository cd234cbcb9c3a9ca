//! Hand-written parser for the textual form of [`TypeSpec`].
//!
//! Handles qualified names with generic arguments, tuples (labels dropped),
//! closures with `async`/`throws`, protocol compositions, and the `T?`,
//! `[T]`, `[K: V]` sugars. Attributes such as `@escaping` and the `inout`
//! marker are accepted and dropped.

use std::collections::BTreeSet;

use crate::error::{CoreError, Result};
use crate::types::{ClosureType, NamedType, TypeSpec, ARRAY, DICTIONARY, OPTIONAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Attribute(&'a str),
    LParen,
    RParen,
    LAngle,
    RAngle,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Amp,
    Arrow,
    Question,
    Bang,
}

/// Parse a type spec string.
///
/// Examples:
/// - `"Swift.Int"`
/// - `"Swift.Dictionary<Swift.String, Mod.Item>"`
/// - `"(Swift.Int, Swift.Bool) throws -> Swift.String"`
/// - `"Mod.P & Mod.Q"`
pub fn parse_type_spec(input: &str) -> Result<TypeSpec> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(invalid(input, "empty type spec"));
    }
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let spec = parser.parse_type()?;
    if let Some(tok) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing {tok:?}")));
    }
    Ok(spec)
}

fn invalid(input: &str, detail: impl Into<String>) -> CoreError {
    CoreError::InvalidTypeSpec {
        input: input.to_string(),
        detail: detail.into(),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let tok = match c {
            c if c.is_whitespace() => continue,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '<' => Token::LAngle,
            '>' => Token::RAngle,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '&' => Token::Amp,
            '?' => Token::Question,
            '!' => Token::Bang,
            '-' => match chars.next() {
                Some((_, '>')) => Token::Arrow,
                _ => return Err(invalid(input, format!("stray '-' at offset {start}"))),
            },
            '@' => {
                let mut end = start + 1;
                while let Some(&(i, n)) = chars.peek() {
                    if !is_ident_char(n) {
                        break;
                    }
                    end = i + n.len_utf8();
                    chars.next();
                }
                if end == start + 1 {
                    return Err(invalid(input, format!("empty attribute at offset {start}")));
                }
                Token::Attribute(&input[start + 1..end])
            }
            c if is_ident_start(c) => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, n)) = chars.peek() {
                    if !is_ident_char(n) {
                        break;
                    }
                    end = i + n.len_utf8();
                    chars.next();
                }
                Token::Ident(&input[start..end])
            }
            other => {
                return Err(invalid(
                    input,
                    format!("unexpected character '{other}' at offset {start}"),
                ))
            }
        };
        tokens.push(tok);
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, detail: impl Into<String>) -> CoreError {
        invalid(self.input, detail)
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<Token<'a>> {
        self.tokens.get(self.pos + offset).copied()
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: Token<'a>) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token<'a>) -> Result<()> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(self.error(format!("expected {expected:?}, found {tok:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn skip_attributes(&mut self) {
        while let Some(Token::Attribute(name)) = self.peek() {
            self.pos += 1;
            // `@convention(c)` carries an argument list; `@escaping (A) -> B` does not.
            if name == "convention" && self.peek() == Some(Token::LParen) {
                let mut depth = 0usize;
                while let Some(tok) = self.next() {
                    match tok {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn parse_type(&mut self) -> Result<TypeSpec> {
        self.skip_attributes();
        let mut spec = match self.peek() {
            Some(Token::LParen) => self.parse_paren()?,
            Some(Token::LBracket) => self.parse_bracket()?,
            Some(Token::Ident(_)) => TypeSpec::Named(self.parse_named()?),
            Some(tok) => return Err(self.error(format!("expected a type, found {tok:?}"))),
            None => return Err(self.error("expected a type, found end of input")),
        };

        loop {
            match self.peek() {
                Some(Token::Question) | Some(Token::Bang) => {
                    self.pos += 1;
                    spec = TypeSpec::generic_named(OPTIONAL, vec![spec]);
                }
                Some(Token::Amp) => spec = self.parse_protocol_list(spec)?,
                _ => break,
            }
        }
        Ok(spec)
    }

    fn parse_named(&mut self) -> Result<NamedType> {
        let name = match self.next() {
            Some(Token::Ident(text)) => text.to_string(),
            Some(tok) => return Err(self.error(format!("expected a type name, found {tok:?}"))),
            None => return Err(self.error("expected a type name, found end of input")),
        };
        if name.ends_with('.') {
            return Err(self.error(format!("type name '{name}' ends with '.'")));
        }

        let mut generic_args = Vec::new();
        if self.eat(Token::LAngle) {
            loop {
                generic_args.push(self.parse_type()?);
                if self.eat(Token::Comma) {
                    continue;
                }
                self.expect(Token::RAngle)?;
                break;
            }
        }
        Ok(NamedType { name, generic_args })
    }

    fn parse_protocol_list(&mut self, first: TypeSpec) -> Result<TypeSpec> {
        let mut protocols = BTreeSet::new();
        match first {
            TypeSpec::Named(named) => {
                protocols.insert(named);
            }
            TypeSpec::ProtocolList(existing) => protocols.extend(existing),
            other => {
                return Err(self.error(format!(
                    "'{other}' cannot be part of a protocol composition"
                )))
            }
        }
        while self.eat(Token::Amp) {
            protocols.insert(self.parse_named()?);
        }
        Ok(TypeSpec::ProtocolList(protocols))
    }

    fn parse_tuple_element(&mut self) -> Result<TypeSpec> {
        self.skip_attributes();
        // Labels: `x: T` or `_ x: T`.
        match (self.peek_at(0), self.peek_at(1), self.peek_at(2)) {
            (Some(Token::Ident(_)), Some(Token::Colon), _) => self.pos += 2,
            (Some(Token::Ident(_)), Some(Token::Ident(_)), Some(Token::Colon)) => self.pos += 3,
            _ => {}
        }
        self.skip_attributes();
        if self.peek() == Some(Token::Ident("inout")) {
            self.pos += 1;
        }
        self.parse_type()
    }

    fn parse_paren(&mut self) -> Result<TypeSpec> {
        self.expect(Token::LParen)?;
        let mut elements = Vec::new();
        if !self.eat(Token::RParen) {
            loop {
                elements.push(self.parse_tuple_element()?);
                if self.eat(Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen)?;
                break;
            }
        }

        let mut throws = false;
        let mut is_async = false;
        loop {
            match self.peek() {
                Some(Token::Ident("async")) => is_async = true,
                Some(Token::Ident("throws")) | Some(Token::Ident("rethrows")) => throws = true,
                _ => break,
            }
            self.pos += 1;
        }

        if self.eat(Token::Arrow) {
            let return_type = self.parse_type()?;
            return Ok(TypeSpec::Closure(ClosureType {
                arguments: Box::new(TypeSpec::Tuple(elements)),
                return_type: Box::new(return_type),
                throws,
                is_async,
            }));
        }
        if throws || is_async {
            return Err(self.error("expected '->' after closure effects"));
        }
        Ok(TypeSpec::Tuple(elements))
    }

    fn parse_bracket(&mut self) -> Result<TypeSpec> {
        self.expect(Token::LBracket)?;
        let element = self.parse_type()?;
        let spec = if self.eat(Token::Colon) {
            let value = self.parse_type()?;
            TypeSpec::generic_named(DICTIONARY, vec![element, value])
        } else {
            TypeSpec::generic_named(ARRAY, vec![element])
        };
        self.expect(Token::RBracket)?;
        Ok(spec)
    }
}
