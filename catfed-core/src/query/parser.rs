//! Recursive-descent parser for filter expressions
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := "(" expr ")"
//!          | "exists" path
//!          | path "like" 'pattern'
//!          | path op literal
//! op      := "=" | "<>" | "!=" | "<" | "<=" | ">" | ">="
//! literal := 'quoted text' | number
//! ```
//!
//! Keywords are case-insensitive. A path may be dotted (`CARD.identifier`);
//! only its last segment names the attribute.
//!
//! Nesting (`not`, parentheses) is limited to [`MAX_NESTING`] levels and a
//! filter to [`MAX_TERMS`] predicates, so evaluating or dropping the parsed
//! tree never recurses without bound.

use crate::dag::AttributeKey;
use crate::error::{FederationError, Result};

use super::filter::{Comparison, Filter, Literal};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Op(Comparison),
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos];
        let start = pos;
        match ch {
            b' ' | b'\t' | b'\n' | b'\r' => {
                pos += 1;
                continue;
            }
            b'(' => {
                pos += 1;
                tokens.push(Spanned {
                    token: Token::LParen,
                    offset: start,
                });
            }
            b')' => {
                pos += 1;
                tokens.push(Spanned {
                    token: Token::RParen,
                    offset: start,
                });
            }
            b'\'' => {
                // '' inside a literal is an escaped quote
                let mut text = String::new();
                pos += 1;
                loop {
                    match input[pos..].find('\'') {
                        Some(rel) => {
                            text.push_str(&input[pos..pos + rel]);
                            pos += rel + 1;
                            if bytes.get(pos) == Some(&b'\'') {
                                text.push('\'');
                                pos += 1;
                            } else {
                                break;
                            }
                        }
                        None => {
                            return Err(FederationError::invalid_query(
                                "unterminated string literal",
                                start,
                            ))
                        }
                    }
                }
                tokens.push(Spanned {
                    token: Token::Str(text),
                    offset: start,
                });
            }
            b'=' | b'<' | b'>' | b'!' => {
                let next = bytes.get(pos + 1).copied();
                let (op, width) = match (ch, next) {
                    (b'=', _) => (Comparison::Eq, 1),
                    (b'<', Some(b'>')) => (Comparison::Ne, 2),
                    (b'<', Some(b'=')) => (Comparison::Le, 2),
                    (b'<', _) => (Comparison::Lt, 1),
                    (b'>', Some(b'=')) => (Comparison::Ge, 2),
                    (b'>', _) => (Comparison::Gt, 1),
                    (b'!', Some(b'=')) => (Comparison::Ne, 2),
                    _ => return Err(FederationError::invalid_query("unexpected '!'", start)),
                };
                pos += width;
                tokens.push(Spanned {
                    token: Token::Op(op),
                    offset: start,
                });
            }
            b'-' | b'0'..=b'9' => {
                pos += 1;
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                let text = &input[start..pos];
                let value = text.parse::<f64>().map_err(|_| {
                    FederationError::invalid_query(format!("invalid number '{text}'"), start)
                })?;
                tokens.push(Spanned {
                    token: Token::Number(value),
                    offset: start,
                });
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric()
                        || matches!(bytes[pos], b'_' | b'.' | b':'))
                {
                    pos += 1;
                }
                tokens.push(Spanned {
                    token: Token::Ident(input[start..pos].to_string()),
                    offset: start,
                });
            }
            _ => {
                let found = input[start..].chars().next().unwrap_or('?');
                return Err(FederationError::invalid_query(
                    format!("unexpected character '{found}'"),
                    start,
                ));
            }
        }
    }

    Ok(tokens)
}

const MAX_NESTING: usize = 256;
const MAX_TERMS: usize = 1024;

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
    terms: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.offset).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn expr(&mut self) -> Result<Filter> {
        let mut left = self.and()?;
        while self.at_keyword("or") {
            self.advance();
            let right = self.and()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Filter> {
        let mut left = self.unary()?;
        while self.at_keyword("and") {
            self.advance();
            let right = self.unary()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn enter(&mut self, offset: usize) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(FederationError::invalid_query(
                "filter nested too deeply",
                offset,
            ));
        }
        Ok(())
    }

    fn count_term(&mut self, offset: usize) -> Result<()> {
        self.terms += 1;
        if self.terms > MAX_TERMS {
            return Err(FederationError::invalid_query(
                format!("filter has more than {MAX_TERMS} terms"),
                offset,
            ));
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<Filter> {
        if self.at_keyword("not") {
            self.enter(self.offset())?;
            self.advance();
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Filter::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Filter> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::LParen) => {
                self.enter(offset)?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(FederationError::invalid_query("expected ')'", self.offset())),
                }
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("exists") => {
                self.count_term(offset)?;
                let key = self.path()?;
                Ok(Filter::Exists(key))
            }
            Some(Token::Ident(path)) => {
                self.count_term(offset)?;
                let key = attribute_key(&path);
                self.predicate(key)
            }
            Some(_) => Err(FederationError::invalid_query(
                "expected attribute name, 'not', 'exists' or '('",
                offset,
            )),
            None => Err(FederationError::invalid_query(
                "unexpected end of filter",
                offset,
            )),
        }
    }

    fn path(&mut self) -> Result<AttributeKey> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Ident(path)) => Ok(attribute_key(&path)),
            _ => Err(FederationError::invalid_query(
                "expected attribute name",
                offset,
            )),
        }
    }

    fn predicate(&mut self, key: AttributeKey) -> Result<Filter> {
        let offset = self.offset();
        if self.at_keyword("like") {
            self.advance();
            let pattern_offset = self.offset();
            return match self.advance() {
                Some(Token::Str(pattern)) => {
                    let regex = Filter::like_regex(&pattern).map_err(|e| {
                        FederationError::invalid_query(e.to_string(), pattern_offset)
                    })?;
                    Ok(Filter::Like {
                        key,
                        pattern,
                        regex,
                    })
                }
                _ => Err(FederationError::invalid_query(
                    "'like' expects a quoted pattern",
                    pattern_offset,
                )),
            };
        }

        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            _ => {
                return Err(FederationError::invalid_query(
                    format!("expected operator after '{key}'"),
                    offset,
                ))
            }
        };

        let literal_offset = self.offset();
        let literal = match self.advance() {
            Some(Token::Str(text)) => Literal::Text(text),
            Some(Token::Number(n)) => Literal::Number(n),
            _ => {
                return Err(FederationError::invalid_query(
                    "expected quoted text or number",
                    literal_offset,
                ))
            }
        };

        Ok(Filter::Compare { key, op, literal })
    }
}

fn attribute_key(path: &str) -> AttributeKey {
    let name = path.rsplit('.').next().unwrap_or(path);
    AttributeKey::from(name)
}

/// Parse a filter expression
pub fn parse(input: &str) -> Result<Filter> {
    if input.trim().is_empty() {
        return Err(FederationError::invalid_query("filter is empty", 0));
    }

    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
        terms: 0,
    };

    let filter = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(FederationError::invalid_query(
            "unexpected trailing input",
            parser.offset(),
        ));
    }
    Ok(filter)
}
