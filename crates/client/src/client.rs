//! Catalog client bound to one facility.

use crate::cache::{CacheRegistry, ResultCache};
use crate::dispatch::{EntitiesInput, QueryInput, WriteInput};
use crate::download_api::DownloadApi;
use crate::error::{ClientError, ClientResult};
use crate::http::{IcatHttp, RequestOptions};
use crate::query_builder::QueryBuilder;
use crate::session_store::{SessionEvent, SessionStore};
use crate::signout::{ExternalSignOut, NoSignOut};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use topcat_core::entity::capitalize;
use topcat_core::{Facility, Query, Row, Session};

/// Raw rows as returned by `entityManager`, shared between cache waiters.
pub type Rows = Arc<Vec<Value>>;

/// Query result cache keyed by normalized query text.
pub type QueryCache = ResultCache<Rows, ClientError>;

/// Registry handing out one [`QueryCache`] per facility.
pub type QueryCacheRegistry = CacheRegistry<Rows, ClientError>;

/// Default lifetime of cached query results.
pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(10 * 60 * 60);

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

/// Catalog access for one facility.
///
/// Clients for the same facility share session state through the
/// [`SessionStore`] and cached rows through the [`QueryCacheRegistry`].
pub struct CatalogClient {
    pub(crate) facility: Arc<Facility>,
    pub(crate) http: IcatHttp,
    pub(crate) sessions: Arc<SessionStore>,
    caches: Arc<QueryCacheRegistry>,
    cache: OnceLock<Arc<QueryCache>>,
    pub(crate) lifecycle: Arc<RwLock<()>>,
    pub(crate) download_api: Option<DownloadApi>,
    pub(crate) sign_out: Arc<dyn ExternalSignOut>,
    query_ttl: Duration,
}

impl CatalogClient {
    pub fn new(
        facility: Arc<Facility>,
        http: reqwest::Client,
        sessions: Arc<SessionStore>,
        caches: Arc<QueryCacheRegistry>,
    ) -> ClientResult<Self> {
        let icat = IcatHttp::new(http, facility.icat_url())?;
        let lifecycle = sessions.lifecycle(facility.name());
        Ok(Self {
            facility,
            http: icat,
            sessions,
            caches,
            cache: OnceLock::new(),
            lifecycle,
            download_api: None,
            sign_out: Arc::new(NoSignOut),
            query_ttl: DEFAULT_QUERY_TTL,
        })
    }

    /// Use `api` for the facility-admin check at login.
    pub fn with_download_api(mut self, api: DownloadApi) -> Self {
        self.download_api = Some(api);
        self
    }

    /// Use `sign_out` for plugins with an external logout page.
    pub fn with_sign_out(mut self, sign_out: Arc<dyn ExternalSignOut>) -> Self {
        self.sign_out = sign_out;
        self
    }

    pub fn with_query_ttl(mut self, ttl: Duration) -> Self {
        self.query_ttl = ttl;
        self
    }

    pub fn facility(&self) -> &Arc<Facility> {
        &self.facility
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn download_api(&self) -> Option<&DownloadApi> {
        self.download_api.as_ref()
    }

    /// Snapshot of the established session, if any.
    pub fn session(&self) -> Option<Session> {
        self.sessions.get(self.facility.name())
    }

    pub fn is_logged_in(&self) -> bool {
        self.session().is_some()
    }

    /// Whether a login for this facility is still running.
    pub fn is_logging_in(&self) -> bool {
        self.sessions.is_pending(self.facility.name())
    }

    /// Subscribe to "session changed" notifications for every facility.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sessions.subscribe()
    }

    /// This facility's query cache, obtained from the registry on first use.
    pub fn cache(&self) -> &Arc<QueryCache> {
        self.cache
            .get_or_init(|| self.caches.for_facility(self.facility.name()))
    }

    pub(crate) fn require_session_id(&self) -> ClientResult<String> {
        self.sessions
            .session_id(self.facility.name())
            .ok_or_else(|| ClientError::NotLoggedIn(self.facility.name().to_string()))
    }

    /// Catalog server version.
    pub async fn version(&self) -> ClientResult<String> {
        let response: VersionResponse = self
            .http
            .get("version", &[], &RequestOptions::default())
            .await?;
        Ok(response.version)
    }

    /// Extend the session's lifetime on the server.
    pub async fn refresh_session(&self) -> ClientResult<()> {
        let _guard = self.lifecycle.read().await;
        let session_id = self.require_session_id()?;
        self.http
            .put(&format!("session/{session_id}"), &RequestOptions::default())
            .await?;
        tracing::debug!(facility = %self.facility.name(), "session refreshed");
        Ok(())
    }

    /// Run a query, serving repeated queries from the cache.
    pub async fn query(&self, input: impl Into<QueryInput>) -> ClientResult<Vec<Row>> {
        let (query, options) = input.into().into_canonical();
        let _guard = self.lifecycle.read().await;
        let session_id = self.require_session_id()?;
        self.query_as(&session_id, &query, &options).await
    }

    /// Query under an explicit session id, bypassing the lifecycle lock.
    ///
    /// Login uses this for its lookups while it holds the lock exclusively.
    pub(crate) async fn query_as(
        &self,
        session_id: &str,
        query: &Query,
        options: &RequestOptions,
    ) -> ClientResult<Vec<Row>> {
        let normalized = query.normalize()?;
        let key = normalized.cache_key();
        tracing::debug!(facility = %self.facility.name(), query = %normalized, "query");

        let http = self.http.clone();
        let session_id = session_id.to_string();
        let server = self.facility.icat_url().to_string();
        let text = normalized.text;
        let producer = move || async move {
            let rows: Vec<Value> = http
                .get(
                    "entityManager",
                    &[
                        ("sessionId", session_id.as_str()),
                        ("query", text.as_str()),
                        ("server", server.as_str()),
                    ],
                    &RequestOptions::default(),
                )
                .await?;
            Ok::<_, ClientError>(Arc::new(rows))
        };

        // Cancellation abandons only this caller; the shared request stays
        // available to anyone else waiting on the same key.
        let rows = options
            .run(self.cache().get_or_compute(&key, self.query_ttl, producer))
            .await?;
        Ok(rows
            .iter()
            .map(|raw| Row::wrap(raw.clone(), &self.facility))
            .collect())
    }

    /// Create or update entities, returning their ids.
    pub async fn write(&self, input: impl Into<WriteInput>) -> ClientResult<Vec<i64>> {
        let (entities, options) = input.into().into_canonical();
        let _guard = self.lifecycle.read().await;
        let session_id = self.require_session_id()?;
        let payload = serde_json::to_string(&entities)?;

        let result: ClientResult<Vec<i64>> = self
            .http
            .post(
                "entityManager",
                &[
                    ("sessionId", session_id.as_str()),
                    ("entities", payload.as_str()),
                ],
                &options,
            )
            .await;

        match &result {
            Ok(ids) => {
                tracing::debug!(facility = %self.facility.name(), count = ids.len(), "entities written");
            }
            Err(err) if err.is_conflict() => {
                tracing::warn!(facility = %self.facility.name(), error = %err, "write rejected: entity already exists");
            }
            Err(err) => {
                tracing::warn!(facility = %self.facility.name(), error = %err, "write failed");
            }
        }
        result
    }

    /// Entities of one type, optionally narrowed by extra fragments.
    pub async fn entities(&self, input: impl Into<EntitiesInput>) -> ClientResult<Vec<Row>> {
        let (entity_type, query, options) = input.into().into_canonical();
        self.query((entity_query(&entity_type, query), options))
            .await
    }

    pub(crate) async fn entities_as(
        &self,
        session_id: &str,
        entity_type: &str,
        query: Query,
    ) -> ClientResult<Vec<Row>> {
        self.query_as(
            session_id,
            &entity_query(entity_type, query),
            &RequestOptions::default(),
        )
        .await
    }

    /// First result of [`entities`](Self::entities).
    pub async fn entity(&self, input: impl Into<EntitiesInput>) -> ClientResult<Option<Row>> {
        Ok(self.entities(input).await?.into_iter().next())
    }

    /// Fluent query over one entity type.
    pub fn query_builder(&self, entity_type: &str) -> QueryBuilder<'_> {
        QueryBuilder::new(self, entity_type)
    }
}

/// Prefix `query` with `select <alias> from <Type> <alias>`.
pub(crate) fn entity_query(entity_type: &str, query: Query) -> Query {
    query.prefixed(format!(
        "select {entity_type} from {} {entity_type}",
        capitalize(entity_type)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_query_prefix() {
        let query = entity_query("dataset", Query::text("where dataset.id = ?").bind(5));
        assert_eq!(
            query.normalize().unwrap().text,
            "select dataset from Dataset dataset where dataset.id = 5"
        );
        assert_eq!(
            entity_query("investigation", Query::new())
                .normalize()
                .unwrap()
                .text,
            "select investigation from Investigation investigation"
        );
    }
}
