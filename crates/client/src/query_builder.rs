//! Fluent queries over one entity type.

use crate::client::{CatalogClient, entity_query};
use crate::error::ClientResult;
use crate::http::RequestOptions;
use topcat_core::{Param, Query, Row};

/// Sort direction of an `order by` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Builds `select <alias> from <Type> <alias> where ... order by ... include
/// ... limit ...`, with `<alias>` equal to the entity type.
///
/// ```ignore
/// let datasets = client
///     .query_builder("dataset")
///     .where_("dataset.investigation.id = ?", [42])
///     .order_by("dataset.name", Direction::Asc)
///     .limit(0, 50)
///     .run()
///     .await?;
/// ```
pub struct QueryBuilder<'a> {
    client: &'a CatalogClient,
    entity_type: String,
    conditions: Vec<Query>,
    order: Vec<String>,
    includes: Vec<String>,
    limit: Option<(u64, u64)>,
    options: RequestOptions,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(client: &'a CatalogClient, entity_type: &str) -> Self {
        Self {
            client,
            entity_type: entity_type.to_string(),
            conditions: Vec::new(),
            order: Vec::new(),
            includes: Vec::new(),
            limit: None,
            options: RequestOptions::default(),
        }
    }

    /// Add a condition; conditions are parenthesized and joined with `and`.
    pub fn where_<P>(mut self, fragment: &str, params: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<Param>,
    {
        let condition = params
            .into_iter()
            .fold(Query::text(format!("({})", fragment.trim())), |query, param| {
                query.bind(param)
            });
        self.conditions.push(condition);
        self
    }

    /// Add a prebuilt condition.
    pub fn where_query(mut self, condition: Query) -> Self {
        self.conditions
            .push(Query::text("(").group(condition).push(")"));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order
            .push(format!("{field} {}", direction.keyword()));
        self
    }

    /// Eagerly load a related entity, e.g. `dataset.investigation`.
    pub fn include(mut self, relation: &str) -> Self {
        self.includes.push(relation.to_string());
        self
    }

    pub fn limit(mut self, offset: u64, count: u64) -> Self {
        self.limit = Some((offset, count));
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// The query this builder describes, consumable by
    /// [`CatalogClient::query`].
    pub fn build(&self) -> Query {
        let mut tail = Query::new();
        for (index, condition) in self.conditions.iter().enumerate() {
            let keyword = if index == 0 { "where" } else { "and" };
            tail = tail.push(keyword).group(condition.clone());
        }
        if !self.order.is_empty() {
            tail = tail.push(format!("order by {}", self.order.join(", ")));
        }
        if !self.includes.is_empty() {
            tail = tail.push(format!("include {}", self.includes.join(", ")));
        }
        if let Some((offset, count)) = self.limit {
            tail = tail.push(format!("limit {offset}, {count}"));
        }
        entity_query(&self.entity_type, tail)
    }

    pub async fn run(&self) -> ClientResult<Vec<Row>> {
        self.client
            .query((self.build(), self.options.clone()))
            .await
    }

    /// First row of [`run`](Self::run).
    pub async fn first(&self) -> ClientResult<Option<Row>> {
        Ok(self.run().await?.into_iter().next())
    }
}
