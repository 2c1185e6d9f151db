//! Query subset understood by the local store
//!
//! ```text
//! SELECT * FROM c [WHERE <cond> [AND <cond>]...]
//! SELECT VALUE c.path FROM c [WHERE ...]
//!
//! <cond> := c.path (= | != | <>) <operand>
//!         | [NOT] IS_DEFINED(c.path)
//! <operand> := @param | 'text' | "text" | number | true | false | null
//! ```

use crate::error::{Error, Result};
use crate::store::types::Query;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Param(String),
    Str(String),
    Number(serde_json::Number),
    Star,
    Eq,
    NotEq,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::invalid_query("Unterminated string literal")),
                        Some('\\') => {
                            if let Some(next) = chars.get(i + 1) {
                                value.push(*next);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '@' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if i == start + 1 {
                    return Err(Error::invalid_query("Empty parameter name"));
                }
                tokens.push(Token::Param(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E' | '+' | '-'))
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = serde_json::from_str::<serde_json::Number>(&literal).map_err(|_| {
                    Error::invalid_query(format!("Invalid number literal '{}'", literal))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::invalid_query(format!(
                    "Unexpected character '{}'",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Projection {
    All,
    Value(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare {
        path: Vec<String>,
        negated: bool,
        operand: Value,
    },
    Defined {
        path: Vec<String>,
        expected: bool,
    },
}

/// A parsed, parameter-bound query
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LocalQuery {
    projection: Projection,
    conditions: Vec<Condition>,
}

struct Parser<'q> {
    tokens: Vec<Token>,
    pos: usize,
    query: &'q Query,
    alias: String,
}

impl<'q> Parser<'q> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&mut self, keyword: &str) -> Result<()> {
        match self.next() {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => Ok(()),
            other => Err(Error::invalid_query(format!(
                "Expected {}, found {:?}",
                keyword, other
            ))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(word)) => Ok(word),
            other => Err(Error::invalid_query(format!(
                "Expected identifier, found {:?}",
                other
            ))),
        }
    }

    /// Split `c.a.b` into `["a", "b"]`, checking the alias
    fn path(&self, reference: &str) -> Result<Vec<String>> {
        let mut parts = reference.split('.');
        let root = parts.next().unwrap_or_default();
        if root != self.alias {
            return Err(Error::invalid_query(format!(
                "Unknown source '{}' (expected alias '{}')",
                root, self.alias
            )));
        }
        let path: Vec<String> = parts.map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(Error::invalid_query(format!("Malformed path '{}'", reference)));
        }
        Ok(path)
    }

    fn operand(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Param(name)) => self.query.parameter(&name).cloned().ok_or_else(|| {
                Error::invalid_query(format!("Parameter {} is not bound", name))
            }),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(Value::Bool(false))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("null") => Ok(Value::Null),
            other => Err(Error::invalid_query(format!(
                "Expected a value, found {:?}",
                other
            ))),
        }
    }

    fn condition(&mut self) -> Result<Condition> {
        let mut expected = true;
        if self.peek_keyword("NOT") {
            self.next();
            expected = false;
        }

        if self.peek_keyword("IS_DEFINED") {
            self.next();
            if self.next() != Some(Token::LParen) {
                return Err(Error::invalid_query("Expected '(' after IS_DEFINED"));
            }
            let reference = self.ident()?;
            let path = self.path(&reference)?;
            if self.next() != Some(Token::RParen) {
                return Err(Error::invalid_query("Expected ')' after IS_DEFINED argument"));
            }
            return Ok(Condition::Defined { path, expected });
        }

        if !expected {
            return Err(Error::invalid_query("NOT is only supported before IS_DEFINED"));
        }

        let reference = self.ident()?;
        let path = self.path(&reference)?;
        let negated = match self.next() {
            Some(Token::Eq) => false,
            Some(Token::NotEq) => true,
            other => {
                return Err(Error::invalid_query(format!(
                    "Expected comparison operator, found {:?}",
                    other
                )))
            }
        };
        let operand = self.operand()?;

        Ok(Condition::Compare {
            path,
            negated,
            operand,
        })
    }
}

impl LocalQuery {
    pub(crate) fn parse(query: &Query) -> Result<Self> {
        let tokens = tokenize(&query.text)?;

        // The alias follows FROM; find it first so projections can be checked
        let from = tokens
            .iter()
            .position(|t| matches!(t, Token::Ident(w) if w.eq_ignore_ascii_case("FROM")))
            .ok_or_else(|| Error::invalid_query("Query has no FROM clause"))?;
        let alias = match tokens.get(from + 1) {
            Some(Token::Ident(alias)) if !alias.contains('.') => alias.clone(),
            _ => return Err(Error::invalid_query("FROM must name a single alias")),
        };

        let mut parser = Parser {
            tokens,
            pos: 0,
            query,
            alias,
        };

        parser.keyword("SELECT")?;
        let projection = if parser.peek() == Some(&Token::Star) {
            parser.next();
            Projection::All
        } else if parser.peek_keyword("VALUE") {
            parser.next();
            let reference = parser.ident()?;
            Projection::Value(parser.path(&reference)?)
        } else {
            return Err(Error::invalid_query("Only SELECT * and SELECT VALUE are supported"));
        };

        parser.keyword("FROM")?;
        parser.ident()?;

        let mut conditions = Vec::new();
        if parser.peek().is_some() {
            parser.keyword("WHERE")?;
            conditions.push(parser.condition()?);
            while parser.peek().is_some() {
                parser.keyword("AND")?;
                conditions.push(parser.condition()?);
            }
        }

        Ok(Self {
            projection,
            conditions,
        })
    }

    pub(crate) fn matches(&self, document: &Value) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Compare {
                path,
                negated,
                operand,
            } => match lookup(document, path) {
                // Comparisons against undefined properties are never true
                None => false,
                Some(value) => (value == operand) != *negated,
            },
            Condition::Defined { path, expected } => lookup(document, path).is_some() == *expected,
        })
    }

    pub(crate) fn project(&self, document: &Value) -> Option<Value> {
        match &self.projection {
            Projection::All => Some(document.clone()),
            Projection::Value(path) => lookup(document, path).cloned(),
        }
    }
}

fn lookup<'v>(document: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter()
        .try_fold(document, |current, segment| current.get(segment.as_str()))
}
