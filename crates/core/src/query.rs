//! Query normalization.
//!
//! A catalog query is either literal JPQL text or an ordered sequence of text
//! fragments interleaved with bind parameters. Each fragment consumes as many
//! following parameters as it has `?` placeholders:
//!
//! ```text
//! ["select user from User user", "where user.name = ?", "bob"]
//!   => select user from User user where user.name = 'bob'
//! ```
//!
//! Normalization produces one canonical string that is sent verbatim to the
//! catalog and doubles as the cache key, so it must only depend on the
//! fragments, the parameter values and their order.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bind parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Param {
    /// Render as a JPQL literal.
    ///
    /// Strings are single-quoted with embedded quotes doubled. Non-finite
    /// floats have no JPQL literal and render as `null`.
    pub fn to_jpql(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) if !f.is_finite() => "null".to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for Param {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One element of a fragment query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryPart {
    Text(String),
    Param(Param),
    /// Nested sequence, flattened in place during normalization.
    Group(Vec<QueryPart>),
}

/// A query as handed to the client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    parts: Vec<QueryPart>,
}

impl Query {
    /// An empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// A query made of a single literal string.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![QueryPart::Text(text.into())],
        }
    }

    /// Build from already-assembled parts.
    pub fn from_parts(parts: Vec<QueryPart>) -> Self {
        Self { parts }
    }

    /// Append a text fragment.
    pub fn push(mut self, fragment: impl Into<String>) -> Self {
        self.parts.push(QueryPart::Text(fragment.into()));
        self
    }

    /// Append a bind parameter for the most recent fragment.
    pub fn bind(mut self, param: impl Into<Param>) -> Self {
        self.parts.push(QueryPart::Param(param.into()));
        self
    }

    /// Append another query as a nested group.
    pub fn group(mut self, other: Query) -> Self {
        self.parts.push(QueryPart::Group(other.parts));
        self
    }

    /// Return a query with `prefix` placed before this one.
    pub fn prefixed(self, prefix: impl Into<String>) -> Self {
        Self {
            parts: vec![
                QueryPart::Text(prefix.into()),
                QueryPart::Group(self.parts),
            ],
        }
    }

    pub fn parts(&self) -> &[QueryPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Normalize into canonical text plus the ordered parameter list.
    pub fn normalize(&self) -> Result<NormalizedQuery> {
        let mut flat = Vec::new();
        flatten(&self.parts, &mut flat);

        let mut pieces: Vec<String> = Vec::new();
        let mut params = Vec::new();
        let mut position = 0;

        while position < flat.len() {
            let fragment = match flat[position] {
                QueryPart::Text(text) => text,
                QueryPart::Param(_) => return Err(Error::DanglingParam(position)),
                QueryPart::Group(_) => unreachable!("groups are flattened"),
            };
            position += 1;

            let expected = count_placeholders(fragment);
            let mut bound = Vec::with_capacity(expected);
            while bound.len() < expected {
                match flat.get(position) {
                    Some(QueryPart::Param(param)) => {
                        bound.push(param.clone());
                        position += 1;
                    }
                    _ => {
                        return Err(Error::QueryArity {
                            fragment: fragment.clone(),
                            expected,
                            actual: bound.len(),
                        });
                    }
                }
            }

            let rendered = substitute(fragment, &bound);
            if !rendered.is_empty() {
                pieces.push(rendered);
            }
            params.extend(bound);
        }

        Ok(NormalizedQuery {
            text: pieces.join(" "),
            params,
        })
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<Vec<QueryPart>> for Query {
    fn from(parts: Vec<QueryPart>) -> Self {
        Self::from_parts(parts)
    }
}

/// Canonical form of a [`Query`].
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedQuery {
    /// JPQL text with every placeholder substituted.
    pub text: String,
    /// Bound parameters in order of appearance.
    pub params: Vec<Param>,
}

impl NormalizedQuery {
    /// Key under which results of this query are cached.
    pub fn cache_key(&self) -> String {
        format!("query:{}", self.text)
    }
}

impl fmt::Display for NormalizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn flatten<'a>(parts: &'a [QueryPart], out: &mut Vec<&'a QueryPart>) {
    for part in parts {
        match part {
            QueryPart::Group(inner) => flatten(inner, out),
            other => out.push(other),
        }
    }
}

/// Count `?` placeholders outside quoted literals.
fn count_placeholders(fragment: &str) -> usize {
    let mut quoted = false;
    let mut count = 0;
    for c in fragment.chars() {
        match c {
            '\'' => quoted = !quoted,
            '?' if !quoted => count += 1,
            _ => {}
        }
    }
    count
}

/// Substitute placeholders and collapse whitespace outside quoted literals.
fn substitute(fragment: &str, params: &[Param]) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut params = params.iter();
    let mut quoted = false;
    let mut pending_space = false;

    for c in fragment.trim().chars() {
        if quoted {
            out.push(c);
            if c == '\'' {
                quoted = false;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        match c {
            '\'' => {
                quoted = true;
                out.push(c);
            }
            '?' => match params.next() {
                Some(param) => out.push_str(&param.to_jpql()),
                None => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}
