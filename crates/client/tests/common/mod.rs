//! Common test utilities: a mock catalog and clients bound to it.

#![allow(dead_code)] // each test file compiles common/ separately

use httpmock::Method::{GET, POST};
use httpmock::{Mock, MockServer};
use serde_json::{Value, json};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use topcat_client::{
    CatalogClient, ClientResult, DownloadApi, ExternalSignOut, QueryCacheRegistry, SessionStore,
};
use topcat_core::{AuthenticationType, Facility, FacilityConfig, Session};

pub const FACILITY: &str = "LILS";
pub const SESSION_ID: &str = "sid-1";
pub const USERNAME: &str = "db/root";
pub const CAS_URL: &str = "https://cas.example.org/cas";

pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

pub fn facility_config(icat_url: &str) -> FacilityConfig {
    FacilityConfig {
        name: FACILITY.to_string(),
        icat_url: icat_url.to_string(),
        ids_url: None,
        authentication_types: vec![
            AuthenticationType {
                plugin: "db".to_string(),
                title: Some("Database".to_string()),
                cas_url: None,
            },
            AuthenticationType {
                plugin: "cas".to_string(),
                title: Some("Single sign-on".to_string()),
                cas_url: Some(CAS_URL.to_string()),
            },
        ],
        ids_upload_dataset_type: Some("raw".to_string()),
        ids_upload_datafile_format: Some("nexus".to_string()),
    }
}

/// A client for the mock catalog with its own store and cache registry.
pub fn client_for(server: &MockServer) -> CatalogClient {
    client_with_config(facility_config(&server.base_url()))
}

pub fn client_with_config(config: FacilityConfig) -> CatalogClient {
    CatalogClient::new(
        Arc::new(Facility::new(config)),
        reqwest::Client::new(),
        Arc::new(SessionStore::in_memory()),
        Arc::new(QueryCacheRegistry::new()),
    )
    .unwrap()
}

/// Download backend rooted at `/topcat` on the mock server.
pub fn download_api_for(server: &MockServer) -> DownloadApi {
    DownloadApi::new(reqwest::Client::new(), &server.url("/topcat")).unwrap()
}

/// Store an established session without going through login.
pub async fn establish_session(client: &CatalogClient) -> Session {
    let session = Session::new(SESSION_ID, USERNAME, "db");
    client
        .sessions()
        .establish(FACILITY, session.clone())
        .await
        .unwrap();
    session
}

/// Mock `GET entityManager` for one exact normalized query.
pub fn mock_query<'a>(server: &'a MockServer, query: &str, rows: Value) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/icat/entityManager")
            .query_param("query", query);
        then.status(200).json_body(rows);
    })
}

pub fn facility_query() -> String {
    format!("SELECT facility FROM Facility facility WHERE facility.name = '{FACILITY}'")
}

pub fn dataset_type_query() -> String {
    format!(
        "SELECT datasetType FROM DatasetType datasetType, datasetType.facility as facility \
         WHERE facility.name = '{FACILITY}' AND datasetType.name = 'raw'"
    )
}

pub fn datafile_format_query() -> String {
    format!(
        "SELECT datafileFormat FROM DatafileFormat datafileFormat, datafileFormat.facility as facility \
         WHERE facility.name = '{FACILITY}' AND datafileFormat.name = 'nexus'"
    )
}

pub fn user_query() -> String {
    format!("select user from User user where user.name = '{USERNAME}'")
}

/// Mock `POST session` and whoami for a successful login.
pub fn mock_session_create(server: &MockServer) -> Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path(format!("/icat/session/{SESSION_ID}"));
        then.status(200)
            .json_body(json!({ "userName": USERNAME, "remainingMinutes": 119.9 }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/icat/session");
        then.status(200).json_body(json!({ "sessionId": SESSION_ID }));
    })
}

/// Mock every lookup of a login that resolves all of them.
pub fn mock_full_login(server: &MockServer) {
    mock_session_create(server);
    mock_query(
        server,
        &user_query(),
        json!([{ "User": { "id": 1, "name": USERNAME, "fullName": "Root User" } }]),
    );
    mock_query(
        server,
        &facility_query(),
        json!([{ "Facility": { "id": 7, "name": FACILITY } }]),
    );
    mock_query(
        server,
        &dataset_type_query(),
        json!([{ "DatasetType": { "id": 11, "name": "raw" } }]),
    );
    mock_query(
        server,
        &datafile_format_query(),
        json!([{ "DatafileFormat": { "id": 12, "name": "nexus" } }]),
    );
}

/// Sign-out that records the URLs it was asked to load.
#[derive(Default)]
pub struct RecordingSignOut {
    pub urls: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ExternalSignOut for RecordingSignOut {
    async fn sign_out(&self, logout_url: &str) -> ClientResult<()> {
        self.urls.lock().unwrap().push(logout_url.to_string());
        Ok(())
    }
}
