//! Compiled filter expressions and their evaluation against attributes

use chrono::{DateTime, Utc};
use regex::Regex;
use std::cmp::Ordering;

use crate::dag::{AttributeKey, AttributeValue, Attributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

/// Literal on the right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Number(f64),
}

/// Parsed filter tree
#[derive(Debug, Clone)]
pub enum Filter {
    Compare {
        key: AttributeKey,
        op: Comparison,
        literal: Literal,
    },
    Like {
        key: AttributeKey,
        pattern: String,
        regex: Regex,
    },
    Exists(AttributeKey),
    Not(Box<Filter>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    /// Translate a `like` pattern (`%` any run, `_` one char) to an anchored regex
    pub(crate) fn like_regex(pattern: &str) -> Result<Regex, regex::Error> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push_str("(?s)^");
        for ch in pattern.chars() {
            match ch {
                '%' => expr.push_str(".*"),
                '_' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        Regex::new(&expr)
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        match self {
            Filter::Compare { key, op, literal } => match attributes.get(key) {
                Some(value) => compare(value, literal)
                    .map(|ordering| op.holds(ordering))
                    .unwrap_or(false),
                None => false,
            },
            Filter::Like { key, regex, .. } => attributes
                .get(key)
                .map(|value| regex.is_match(&value.as_text()))
                .unwrap_or(false),
            Filter::Exists(key) => attributes.contains(key),
            Filter::Not(inner) => !inner.matches(attributes),
            Filter::And(left, right) => left.matches(attributes) && right.matches(attributes),
            Filter::Or(left, right) => left.matches(attributes) || right.matches(attributes),
        }
    }
}

/// `None` when the literal cannot be compared with the value's kind
fn compare(value: &AttributeValue, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (AttributeValue::Timestamp(ts), Literal::Text(text)) => {
            let other: DateTime<Utc> = DateTime::parse_from_rfc3339(text).ok()?.into();
            Some(ts.cmp(&other))
        }
        (AttributeValue::Integer(_) | AttributeValue::Real(_), Literal::Number(n)) => {
            value.as_f64()?.partial_cmp(n)
        }
        (AttributeValue::Integer(_) | AttributeValue::Real(_), Literal::Text(_)) => None,
        (_, Literal::Text(text)) => Some(value.as_text().as_str().cmp(text.as_str())),
        (_, Literal::Number(n)) => {
            let parsed: f64 = value.as_text().parse().ok()?;
            parsed.partial_cmp(n)
        }
    }
}
