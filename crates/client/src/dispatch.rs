//! Argument-shape dispatch for the multi-shaped client operations.
//!
//! The typed API takes one input enum per operation ([`QueryInput`],
//! [`WriteInput`], [`EntitiesInput`], [`LogoutInput`]); every variant is
//! reduced to a canonical form by a single exhaustive match.
//!
//! Callers that assemble arguments at runtime (scripting front ends, the
//! CLI) go through [`Overloads`]: a table of argument-kind signatures, each
//! bound to a handler building the input enum. Exact signatures win over
//! wildcard ones; an unmatched shape is [`ClientError::NoMatchingOverload`].

use crate::error::{ClientError, ClientResult};
use crate::http::RequestOptions;
use serde_json::Value;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use topcat_core::Query;

/// A dynamically typed call argument.
#[derive(Clone, Debug)]
pub enum Arg {
    Bool(bool),
    Text(String),
    Fragments(Query),
    Entities(Vec<Value>),
    Options(RequestOptions),
    Cancel(CancellationToken),
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Bool(_) => ArgKind::Bool,
            Self::Text(_) => ArgKind::Text,
            Self::Fragments(_) => ArgKind::Fragments,
            Self::Entities(_) => ArgKind::Entities,
            Self::Options(_) => ArgKind::Options,
            Self::Cancel(_) => ArgKind::Cancel,
        }
    }
}

/// Kind tag of an [`Arg`]. `Any` only appears in signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Text,
    Fragments,
    Entities,
    Options,
    Cancel,
    Any,
}

impl ArgKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Bool => "boolean",
            Self::Text => "string",
            Self::Fragments => "fragments",
            Self::Entities => "entities",
            Self::Options => "options",
            Self::Cancel => "cancel",
            Self::Any => "*",
        }
    }

    fn accepts(self, actual: ArgKind) -> bool {
        self == ArgKind::Any || self == actual
    }
}

fn signature_text(kinds: &[ArgKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.tag())
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds an input from arguments already known to match its signature.
pub type Handler<T> = fn(Vec<Arg>) -> Option<T>;

/// Signature table for one operation.
pub struct Overloads<T> {
    bindings: Vec<(Vec<ArgKind>, Handler<T>)>,
}

impl<T> Default for Overloads<T> {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }
}

impl<T> Overloads<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `signature`. An empty signature binds the
    /// zero-argument call.
    pub fn bind(mut self, signature: &[ArgKind], handler: Handler<T>) -> Self {
        self.bindings.push((signature.to_vec(), handler));
        self
    }

    /// Select the most specific matching binding and invoke it.
    pub fn resolve(&self, args: Vec<Arg>) -> ClientResult<T> {
        let kinds: Vec<ArgKind> = args.iter().map(Arg::kind).collect();
        let no_match = || ClientError::NoMatchingOverload {
            signature: signature_text(&kinds),
        };

        let (_, handler) = self
            .bindings
            .iter()
            .filter(|(signature, _)| {
                signature.len() == kinds.len()
                    && signature
                        .iter()
                        .zip(&kinds)
                        .all(|(expected, actual)| expected.accepts(*actual))
            })
            .min_by_key(|(signature, _)| {
                signature
                    .iter()
                    .filter(|kind| **kind == ArgKind::Any)
                    .count()
            })
            .ok_or_else(no_match)?;

        handler(args).ok_or_else(no_match)
    }
}

/// Input of [`CatalogClient::query`](crate::CatalogClient::query).
#[derive(Clone, Debug)]
pub enum QueryInput {
    Text(String),
    Fragments(Query),
    TimedText(CancellationToken, String),
    TimedFragments(CancellationToken, Query),
    WithOptions(Query, RequestOptions),
}

impl QueryInput {
    pub fn into_canonical(self) -> (Query, RequestOptions) {
        match self {
            Self::Text(text) => (Query::text(text), RequestOptions::default()),
            Self::Fragments(query) => (query, RequestOptions::default()),
            Self::TimedText(cancel, text) => {
                (Query::text(text), RequestOptions::with_cancel(cancel))
            }
            Self::TimedFragments(cancel, query) => (query, RequestOptions::with_cancel(cancel)),
            Self::WithOptions(query, options) => (query, options),
        }
    }

    pub fn from_args(args: Vec<Arg>) -> ClientResult<Self> {
        QUERY_OVERLOADS.resolve(args)
    }
}

static QUERY_OVERLOADS: LazyLock<Overloads<QueryInput>> = LazyLock::new(|| {
    use ArgKind::*;
    Overloads::new()
        .bind(&[Fragments, Options], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Fragments(query), Arg::Options(options)]) => {
                Some(QueryInput::WithOptions(query, options))
            }
            _ => None,
        })
        .bind(&[Cancel, Fragments], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Cancel(cancel), Arg::Fragments(query)]) => {
                Some(QueryInput::TimedFragments(cancel, query))
            }
            _ => None,
        })
        .bind(&[Cancel, Text], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Cancel(cancel), Arg::Text(text)]) => Some(QueryInput::TimedText(cancel, text)),
            _ => None,
        })
        .bind(&[Fragments], |args| match <[Arg; 1]>::try_from(args) {
            Ok([Arg::Fragments(query)]) => Some(QueryInput::Fragments(query)),
            _ => None,
        })
        .bind(&[Text], |args| match <[Arg; 1]>::try_from(args) {
            Ok([Arg::Text(text)]) => Some(QueryInput::Text(text)),
            _ => None,
        })
});

impl From<&str> for QueryInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Query> for QueryInput {
    fn from(query: Query) -> Self {
        Self::Fragments(query)
    }
}

impl From<(Query, RequestOptions)> for QueryInput {
    fn from((query, options): (Query, RequestOptions)) -> Self {
        Self::WithOptions(query, options)
    }
}

impl From<(CancellationToken, Query)> for QueryInput {
    fn from((cancel, query): (CancellationToken, Query)) -> Self {
        Self::TimedFragments(cancel, query)
    }
}

impl From<(CancellationToken, &str)> for QueryInput {
    fn from((cancel, text): (CancellationToken, &str)) -> Self {
        Self::TimedText(cancel, text.to_string())
    }
}

/// Input of [`CatalogClient::write`](crate::CatalogClient::write).
#[derive(Clone, Debug)]
pub enum WriteInput {
    Entities(Vec<Value>),
    TimedEntities(CancellationToken, Vec<Value>),
    WithOptions(Vec<Value>, RequestOptions),
}

impl WriteInput {
    pub fn into_canonical(self) -> (Vec<Value>, RequestOptions) {
        match self {
            Self::Entities(entities) => (entities, RequestOptions::default()),
            Self::TimedEntities(cancel, entities) => (entities, RequestOptions::with_cancel(cancel)),
            Self::WithOptions(entities, options) => (entities, options),
        }
    }

    pub fn from_args(args: Vec<Arg>) -> ClientResult<Self> {
        WRITE_OVERLOADS.resolve(args)
    }
}

static WRITE_OVERLOADS: LazyLock<Overloads<WriteInput>> = LazyLock::new(|| {
    use ArgKind::*;
    Overloads::new()
        .bind(&[Entities, Options], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Entities(entities), Arg::Options(options)]) => {
                Some(WriteInput::WithOptions(entities, options))
            }
            _ => None,
        })
        .bind(&[Cancel, Entities], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Cancel(cancel), Arg::Entities(entities)]) => {
                Some(WriteInput::TimedEntities(cancel, entities))
            }
            _ => None,
        })
        .bind(&[Entities], |args| match <[Arg; 1]>::try_from(args) {
            Ok([Arg::Entities(entities)]) => Some(WriteInput::Entities(entities)),
            _ => None,
        })
});

impl From<Vec<Value>> for WriteInput {
    fn from(entities: Vec<Value>) -> Self {
        Self::Entities(entities)
    }
}

impl From<(Vec<Value>, RequestOptions)> for WriteInput {
    fn from((entities, options): (Vec<Value>, RequestOptions)) -> Self {
        Self::WithOptions(entities, options)
    }
}

impl From<(CancellationToken, Vec<Value>)> for WriteInput {
    fn from((cancel, entities): (CancellationToken, Vec<Value>)) -> Self {
        Self::TimedEntities(cancel, entities)
    }
}

/// Input of [`CatalogClient::entities`](crate::CatalogClient::entities).
#[derive(Clone, Debug)]
pub enum EntitiesInput {
    Type(String),
    TypeText(String, String),
    TypeQuery(String, Query),
    TypeTimed(String, CancellationToken),
    TypeTimedText(String, CancellationToken, String),
    TypeTimedQuery(String, CancellationToken, Query),
    WithOptions(String, Query, RequestOptions),
}

impl EntitiesInput {
    pub fn into_canonical(self) -> (String, Query, RequestOptions) {
        match self {
            Self::Type(ty) => (ty, Query::new(), RequestOptions::default()),
            Self::TypeText(ty, text) => (ty, Query::text(text), RequestOptions::default()),
            Self::TypeQuery(ty, query) => (ty, query, RequestOptions::default()),
            Self::TypeTimed(ty, cancel) => (ty, Query::new(), RequestOptions::with_cancel(cancel)),
            Self::TypeTimedText(ty, cancel, text) => {
                (ty, Query::text(text), RequestOptions::with_cancel(cancel))
            }
            Self::TypeTimedQuery(ty, cancel, query) => {
                (ty, query, RequestOptions::with_cancel(cancel))
            }
            Self::WithOptions(ty, query, options) => (ty, query, options),
        }
    }

    pub fn from_args(args: Vec<Arg>) -> ClientResult<Self> {
        ENTITIES_OVERLOADS.resolve(args)
    }
}

static ENTITIES_OVERLOADS: LazyLock<Overloads<EntitiesInput>> = LazyLock::new(|| {
    use ArgKind::*;
    Overloads::new()
        .bind(&[Text, Fragments, Options], |args| {
            match <[Arg; 3]>::try_from(args) {
                Ok([Arg::Text(ty), Arg::Fragments(query), Arg::Options(options)]) => {
                    Some(EntitiesInput::WithOptions(ty, query, options))
                }
                _ => None,
            }
        })
        .bind(&[Text, Cancel, Fragments], |args| {
            match <[Arg; 3]>::try_from(args) {
                Ok([Arg::Text(ty), Arg::Cancel(cancel), Arg::Fragments(query)]) => {
                    Some(EntitiesInput::TypeTimedQuery(ty, cancel, query))
                }
                _ => None,
            }
        })
        .bind(&[Text, Cancel, Text], |args| match <[Arg; 3]>::try_from(args) {
            Ok([Arg::Text(ty), Arg::Cancel(cancel), Arg::Text(text)]) => {
                Some(EntitiesInput::TypeTimedText(ty, cancel, text))
            }
            _ => None,
        })
        .bind(&[Text, Fragments], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Text(ty), Arg::Fragments(query)]) => Some(EntitiesInput::TypeQuery(ty, query)),
            _ => None,
        })
        .bind(&[Text, Text], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Text(ty), Arg::Text(text)]) => Some(EntitiesInput::TypeText(ty, text)),
            _ => None,
        })
        .bind(&[Text, Cancel], |args| match <[Arg; 2]>::try_from(args) {
            Ok([Arg::Text(ty), Arg::Cancel(cancel)]) => Some(EntitiesInput::TypeTimed(ty, cancel)),
            _ => None,
        })
        .bind(&[Text], |args| match <[Arg; 1]>::try_from(args) {
            Ok([Arg::Text(ty)]) => Some(EntitiesInput::Type(ty)),
            _ => None,
        })
});

impl From<&str> for EntitiesInput {
    fn from(ty: &str) -> Self {
        Self::Type(ty.to_string())
    }
}

impl From<(&str, &str)> for EntitiesInput {
    fn from((ty, text): (&str, &str)) -> Self {
        Self::TypeText(ty.to_string(), text.to_string())
    }
}

impl From<(&str, Query)> for EntitiesInput {
    fn from((ty, query): (&str, Query)) -> Self {
        Self::TypeQuery(ty.to_string(), query)
    }
}

impl From<(&str, Query, RequestOptions)> for EntitiesInput {
    fn from((ty, query, options): (&str, Query, RequestOptions)) -> Self {
        Self::WithOptions(ty.to_string(), query, options)
    }
}

impl From<(&str, CancellationToken)> for EntitiesInput {
    fn from((ty, cancel): (&str, CancellationToken)) -> Self {
        Self::TypeTimed(ty.to_string(), cancel)
    }
}

/// Input of [`CatalogClient::logout`](crate::CatalogClient::logout).
#[derive(Clone, Copy, Debug, Default)]
pub enum LogoutInput {
    /// Full logout, invalidating the session server-side.
    #[default]
    Default,
    Soft(bool),
}

impl LogoutInput {
    /// Whether the server-side session is left alive.
    pub fn into_canonical(self) -> bool {
        match self {
            Self::Default => false,
            Self::Soft(is_soft) => is_soft,
        }
    }

    pub fn from_args(args: Vec<Arg>) -> ClientResult<Self> {
        LOGOUT_OVERLOADS.resolve(args)
    }
}

static LOGOUT_OVERLOADS: LazyLock<Overloads<LogoutInput>> = LazyLock::new(|| {
    Overloads::new()
        .bind(&[ArgKind::Bool], |args| match <[Arg; 1]>::try_from(args) {
            Ok([Arg::Bool(is_soft)]) => Some(LogoutInput::Soft(is_soft)),
            _ => None,
        })
        .bind(&[], |_| Some(LogoutInput::Default))
});

impl From<bool> for LogoutInput {
    fn from(is_soft: bool) -> Self {
        Self::Soft(is_soft)
    }
}

impl From<()> for LogoutInput {
    fn from(_: ()) -> Self {
        Self::Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_and_one_argument_logout_are_distinct() {
        assert!(!LogoutInput::from_args(vec![]).unwrap().into_canonical());
        assert!(
            LogoutInput::from_args(vec![Arg::Bool(true)])
                .unwrap()
                .into_canonical()
        );
    }

    #[test]
    fn test_query_shapes_reduce_to_canonical_form() {
        let cancel = CancellationToken::new();
        let input = QueryInput::from_args(vec![
            Arg::Cancel(cancel.clone()),
            Arg::Text("select f from Facility f".to_string()),
        ])
        .unwrap();
        let (query, options) = input.into_canonical();
        assert_eq!(query, Query::text("select f from Facility f"));
        assert!(options.cancel.is_some());

        let (query, options) = QueryInput::from("select x from X x").into_canonical();
        assert_eq!(query, Query::text("select x from X x"));
        assert!(options.cancel.is_none());
    }

    #[test]
    fn test_entities_shapes() {
        let input = EntitiesInput::from_args(vec![
            Arg::Text("dataset".to_string()),
            Arg::Text("where dataset.id = 1".to_string()),
        ])
        .unwrap();
        let (ty, query, _) = input.into_canonical();
        assert_eq!(ty, "dataset");
        assert_eq!(query, Query::text("where dataset.id = 1"));

        let (ty, query, _) = EntitiesInput::from_args(vec![Arg::Text("user".to_string())])
            .unwrap()
            .into_canonical();
        assert_eq!(ty, "user");
        assert!(query.is_empty());
    }

    #[test]
    fn test_write_shapes() {
        let entities = vec![json!({"Dataset": {"name": "x"}})];
        let (out, options) = WriteInput::from_args(vec![
            Arg::Entities(entities.clone()),
            Arg::Options(RequestOptions::default()),
        ])
        .unwrap()
        .into_canonical();
        assert_eq!(out, entities);
        assert!(options.cancel.is_none());
    }

    #[test]
    fn test_unmatched_shape_is_reported() {
        let err = QueryInput::from_args(vec![Arg::Bool(true)]).unwrap_err();
        match err {
            ClientError::NoMatchingOverload { signature } => assert_eq!(signature, "boolean"),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = LogoutInput::from_args(vec![Arg::Bool(true), Arg::Bool(false)]).unwrap_err();
        assert!(matches!(err, ClientError::NoMatchingOverload { .. }));

        let err = QueryInput::from_args(vec![]).unwrap_err();
        match err {
            ClientError::NoMatchingOverload { signature } => assert!(signature.is_empty()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exact_signature_beats_wildcard() {
        let table: Overloads<&'static str> = Overloads::new()
            .bind(&[ArgKind::Any], |_| Some("any"))
            .bind(&[ArgKind::Text], |_| Some("text"));
        assert_eq!(table.resolve(vec![Arg::Text("x".into())]).unwrap(), "text");
        assert_eq!(table.resolve(vec![Arg::Bool(false)]).unwrap(), "any");
    }
}
