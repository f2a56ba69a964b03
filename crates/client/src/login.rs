//! Login and logout.
//!
//! Login creates the session, then runs a fixed set of lookups against it
//! concurrently. Each lookup yields [`SessionPatch`]es; nothing becomes
//! visible until every lookup has settled, at which point the complete
//! record is stored and a single "session changed" notification is sent.

use crate::client::CatalogClient;
use crate::dispatch::LogoutInput;
use crate::error::{ClientError, ClientResult};
use crate::http::RequestOptions;
use crate::session_store::{SessionEventKind, SessionStore};
use serde::Deserialize;
use serde_json::{Value, json};
use topcat_core::{ANONYMOUS_USERNAME, CAS_PLUGIN, Query, Session, SessionPatch};

/// Body of `POST session` for `plugin`.
///
/// CAS takes a service URL and ticket; every other plugin takes a username
/// (defaulting to the anonymous user) and password.
pub fn credentials_payload(plugin: &str, primary: Option<&str>, secondary: Option<&str>) -> Value {
    if plugin == CAS_PLUGIN {
        json!({
            "plugin": plugin,
            "credentials": [
                { "service": primary.unwrap_or_default() },
                { "ticket": secondary.unwrap_or_default() },
            ],
        })
    } else {
        json!({
            "plugin": plugin,
            "credentials": [
                { "username": primary.unwrap_or(ANONYMOUS_USERNAME) },
                { "password": secondary.unwrap_or_default() },
            ],
        })
    }
}

/// Result of a successful login.
#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub session: Session,
    /// Lookups that found no matching row. Login succeeds regardless.
    pub diagnostics: Vec<ClientError>,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    #[serde(rename = "userName")]
    user_name: String,
}

/// What one lookup learned.
#[derive(Default)]
struct Lookup {
    patches: Vec<SessionPatch>,
    diagnostic: Option<ClientError>,
}

impl Lookup {
    fn found(patch: SessionPatch) -> Self {
        Self {
            patches: vec![patch],
            diagnostic: None,
        }
    }

    fn missing(facility: &str, what: String) -> Self {
        tracing::warn!(facility, "{what}");
        Self {
            patches: Vec::new(),
            diagnostic: Some(ClientError::ConfigurationMismatch(what)),
        }
    }

    fn skipped() -> Self {
        Self::default()
    }
}

/// Clears the pending-login mark however login ends.
struct PendingLogin<'a> {
    store: &'a SessionStore,
    facility: &'a str,
}

impl Drop for PendingLogin<'_> {
    fn drop(&mut self) {
        self.store.end_login(self.facility);
    }
}

impl CatalogClient {
    /// Log in with `plugin`, establishing this facility's session.
    ///
    /// If any lookup fails with a network or authentication error, that
    /// error is returned, no session is stored and the server-side session
    /// is deleted again.
    pub async fn login(
        &self,
        plugin: &str,
        primary: Option<&str>,
        secondary: Option<&str>,
    ) -> ClientResult<LoginOutcome> {
        let name = self.facility.name();
        let _guard = self.lifecycle.write().await;
        self.sessions.begin_login(name);
        let _pending = PendingLogin {
            store: &self.sessions,
            facility: name,
        };

        let payload = credentials_payload(plugin, primary, secondary).to_string();
        let created: SessionCreated = self
            .http
            .post("session", &[("json", payload.as_str())], &RequestOptions::default())
            .await
            .inspect_err(|err| tracing::warn!(facility = %name, plugin, error = %err, "login rejected"))?;
        let session_id = created.session_id;
        tracing::debug!(facility = %name, plugin, "session created");

        // Rows cached under the previous identity must not leak into this one.
        self.cache().clear();

        match self.complete_login(plugin, &session_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.abandon_session(&session_id).await;
                Err(err)
            }
        }
    }

    /// Run the lookups for a freshly created session and store the result.
    async fn complete_login(&self, plugin: &str, session_id: &str) -> ClientResult<LoginOutcome> {
        let name = self.facility.name();
        let (identity, facility_id, dataset_type, datafile_format, admin) = tokio::join!(
            self.lookup_identity(session_id),
            self.lookup_facility_id(session_id),
            self.lookup_upload_dataset_type(session_id),
            self.lookup_upload_datafile_format(session_id),
            self.lookup_admin(session_id),
        );

        let (username, identity) = identity?;
        let mut session = Session::new(session_id, username, plugin);
        let mut diagnostics = Vec::new();
        for lookup in [identity, facility_id?, dataset_type?, datafile_format?, admin?] {
            for patch in lookup.patches {
                session.apply(patch);
            }
            diagnostics.extend(lookup.diagnostic);
        }

        self.sessions.establish(name, session.clone()).await?;
        self.sessions.notify(name, SessionEventKind::LoggedIn);
        tracing::info!(
            facility = %name,
            username = %session.username,
            is_admin = session.is_admin,
            mismatches = diagnostics.len(),
            "logged in"
        );

        Ok(LoginOutcome {
            session,
            diagnostics,
        })
    }

    /// Best-effort `DELETE session/<id>` for a session login gave up on.
    async fn abandon_session(&self, session_id: &str) {
        let result = self
            .http
            .delete(
                &format!("session/{session_id}"),
                &[("server", self.facility.icat_url())],
                &RequestOptions::default(),
            )
            .await;
        if let Err(err) = result {
            tracing::warn!(facility = %self.facility.name(), error = %err, "failed to delete abandoned session");
        }
    }

    /// Username from `GET session/<id>`, then the user's full name.
    async fn lookup_identity(&self, session_id: &str) -> ClientResult<(String, Lookup)> {
        let whoami: WhoAmI = self
            .http
            .get(
                &format!("session/{session_id}"),
                &[],
                &RequestOptions::default(),
            )
            .await?;
        let username = whoami.user_name;

        let rows = self
            .entities_as(
                session_id,
                "user",
                Query::text("where user.name = ?").bind(username.as_str()),
            )
            .await?;
        let user = rows.into_iter().next().and_then(|row| row.into_entity());
        let lookup = match user.and_then(|user| user.field::<String>("fullName")) {
            Some(full_name) if !full_name.is_empty() => {
                Lookup::found(SessionPatch::FullName(full_name))
            }
            _ => {
                tracing::debug!(facility = %self.facility.name(), username = %username, "no full name, using username");
                Lookup::found(SessionPatch::FullName(username.clone()))
            }
        };
        Ok((username, lookup))
    }

    async fn lookup_facility_id(&self, session_id: &str) -> ClientResult<Lookup> {
        let name = self.facility.name();
        let query = Query::text("SELECT facility FROM Facility facility WHERE facility.name = ?")
            .bind(name);
        Ok(match self.first_id(session_id, &query).await? {
            Some(id) => Lookup::found(SessionPatch::FacilityId(id)),
            None => Lookup::missing(name, format!("Could not find facility by name '{name}'")),
        })
    }

    async fn lookup_upload_dataset_type(&self, session_id: &str) -> ClientResult<Lookup> {
        let name = self.facility.name();
        let Some(dataset_type) = &self.facility.config().ids_upload_dataset_type else {
            return Ok(Lookup::skipped());
        };
        let query = Query::text(
            "SELECT datasetType FROM DatasetType datasetType, datasetType.facility as facility",
        )
        .push("WHERE facility.name = ?")
        .bind(name)
        .push("AND datasetType.name = ?")
        .bind(dataset_type.as_str());
        Ok(match self.first_id(session_id, &query).await? {
            Some(id) => Lookup::found(SessionPatch::UploadDatasetTypeId(id)),
            None => Lookup::missing(
                name,
                format!("Could not find upload dataset type '{dataset_type}'"),
            ),
        })
    }

    async fn lookup_upload_datafile_format(&self, session_id: &str) -> ClientResult<Lookup> {
        let name = self.facility.name();
        let Some(datafile_format) = &self.facility.config().ids_upload_datafile_format else {
            return Ok(Lookup::skipped());
        };
        let query = Query::text(
            "SELECT datafileFormat FROM DatafileFormat datafileFormat, datafileFormat.facility as facility",
        )
        .push("WHERE facility.name = ?")
        .bind(name)
        .push("AND datafileFormat.name = ?")
        .bind(datafile_format.as_str());
        Ok(match self.first_id(session_id, &query).await? {
            Some(id) => Lookup::found(SessionPatch::UploadDatafileFormatId(id)),
            None => Lookup::missing(
                name,
                format!("Could not find upload datafile format '{datafile_format}'"),
            ),
        })
    }

    /// Facility-admin check against the download backend.
    ///
    /// A backend that answers with an error status counts as "not admin";
    /// transport failures propagate.
    async fn lookup_admin(&self, session_id: &str) -> ClientResult<Lookup> {
        let Some(api) = &self.download_api else {
            return Ok(Lookup::skipped());
        };
        match api.is_valid_session(&self.facility, session_id).await {
            Ok(is_admin) => Ok(Lookup::found(SessionPatch::IsAdmin(is_admin))),
            Err(ClientError::Server { status, message, .. }) => {
                tracing::warn!(facility = %self.facility.name(), status, %message, "admin check failed, treating as non-admin");
                Ok(Lookup::found(SessionPatch::IsAdmin(false)))
            }
            Err(err) => Err(err),
        }
    }

    async fn first_id(&self, session_id: &str, query: &Query) -> ClientResult<Option<i64>> {
        let rows = self
            .query_as(session_id, query, &RequestOptions::default())
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_entity())
            .and_then(|entity| entity.id()))
    }

    /// Log out of this facility.
    ///
    /// The local session is removed and "session changed" is sent even when
    /// the server-side calls fail; their first failure is returned.
    pub async fn logout(&self, input: impl Into<LogoutInput>) -> ClientResult<()> {
        let is_soft = input.into().into_canonical();
        let name = self.facility.name();
        let _guard = self.lifecycle.write().await;

        let session = self.sessions.get(name);
        let mut outcome = self.sessions.remove(name).await.map(|_| ());
        self.cache().clear();

        if let Some(session) = &session {
            let server_logout = async {
                if is_soft {
                    return Ok(());
                }
                self.http
                    .delete(
                        &format!("session/{}", session.session_id),
                        &[("server", self.facility.icat_url())],
                        &RequestOptions::default(),
                    )
                    .await
            };
            let external_logout = async {
                let logout_url = self
                    .facility
                    .authentication_type(&session.plugin)
                    .and_then(|auth| auth.external_logout_url());
                match logout_url {
                    Some(url) => self.sign_out.sign_out(&url).await,
                    None => Ok(()),
                }
            };

            let (server, external) = tokio::join!(server_logout, external_logout);
            for result in [server, external] {
                if let Err(err) = result {
                    tracing::warn!(facility = %name, error = %err, "logout step failed");
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
            }
        }

        self.sessions.notify(name, SessionEventKind::LoggedOut);
        tracing::info!(facility = %name, soft = is_soft, "logged out");
        outcome
    }

    /// Whether `password` is valid for the logged-in user.
    ///
    /// Authenticates a throwaway session with the current plugin and the
    /// username stripped of its authenticator prefix.
    pub async fn verify_password(&self, password: &str) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        let payload =
            credentials_payload(&session.plugin, Some(session.bare_username()), Some(password))
                .to_string();
        let result: ClientResult<SessionCreated> = self
            .http
            .post("session", &[("json", payload.as_str())], &RequestOptions::default())
            .await;
        if let Err(err) = &result {
            tracing::debug!(facility = %self.facility.name(), error = %err, "password verification failed");
        }
        result.is_ok()
    }
}
