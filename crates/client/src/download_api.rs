//! Client for the download/cart backend.
//!
//! The backend is a separate service; every call identifies the user by the
//! catalog session it was issued for (`sessionId`, `icatUrl`, `userName`).

use crate::error::{ClientError, ClientResult};
use crate::http::{send_empty, send_json};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use topcat_core::{Facility, Session};

/// Lifecycle state of a prepared download.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Restoring,
    Complete,
    Expired,
    Paused,
    Preparing,
    Queued,
}

/// One item of a download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub entity_id: i64,
    pub entity_type: String,
    #[serde(default)]
    pub id: Option<i64>,
}

/// A download as reported by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub id: i64,
    pub facility_name: String,
    pub file_name: String,
    #[serde(default)]
    pub prepared_id: Option<String>,
    pub status: DownloadStatus,
    pub transport: String,
    pub user_name: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_two_level: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub download_items: Vec<DownloadItem>,
}

/// Body of a cart submission.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCartRequest {
    pub facility_name: String,
    pub session_id: String,
    pub icat_url: String,
    pub file_name: String,
    pub transport: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub zip: bool,
}

#[derive(Clone)]
pub struct DownloadApi {
    http: reqwest::Client,
    base_url: Url,
}

impl DownloadApi {
    pub fn new(http: reqwest::Client, base_url: &str) -> ClientResult<Self> {
        let base = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base).map_err(|e| ClientError::Url(format!("{base}: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Url(format!("{path}: {e}")))
    }

    fn user_params<'a>(facility: &'a Facility, session: &'a Session) -> Vec<(&'static str, &'a str)> {
        vec![
            ("sessionId", session.session_id.as_str()),
            ("icatUrl", facility.icat_url()),
            ("userName", session.username.as_str()),
        ]
    }

    /// Whether `session_id` is a facility-admin session.
    pub async fn is_valid_session(&self, facility: &Facility, session_id: &str) -> ClientResult<bool> {
        let url = self.url("admin/isValidSession")?;
        let req = self.http.get(url).query(&[
            ("facilityName", facility.name()),
            ("sessionId", session_id),
        ]);
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::from_response(status.as_u16(), &body));
        }
        Ok(body.trim().trim_matches('"') == "true")
    }

    pub async fn submit_cart(&self, request: &SubmitCartRequest) -> ClientResult<Value> {
        let url = self.url("cart/submit")?;
        send_json(self.http.post(url).json(request)).await
    }

    pub async fn get_cart(&self, facility: &Facility, session: &Session) -> ClientResult<Value> {
        let url = self.url(&format!("cart/facility/{}", facility.name()))?;
        send_json(self.http.get(url).query(&Self::user_params(facility, session))).await
    }

    pub async fn save_cart(&self, cart: &Value) -> ClientResult<Value> {
        let url = self.url("cart")?;
        send_json(self.http.post(url).json(cart)).await
    }

    pub async fn remove_cart(&self, facility: &Facility, session: &Session) -> ClientResult<()> {
        let url = self.url(&format!("cart/facility/{}", facility.name()))?;
        send_empty(self.http.delete(url).query(&Self::user_params(facility, session))).await
    }

    pub async fn my_downloads(
        &self,
        facility: &Facility,
        session: &Session,
    ) -> ClientResult<Vec<Download>> {
        let url = self.url(&format!("downloads/facility/{}", facility.name()))?;
        send_json(self.http.get(url).query(&Self::user_params(facility, session))).await
    }

    /// Smart-client downloads still being restored from tape.
    pub async fn my_restoring_smartclient_downloads(
        &self,
        facility: &Facility,
        session: &Session,
    ) -> ClientResult<Vec<Download>> {
        let url = self.url(&format!("downloads/facility/{}", facility.name()))?;
        let mut params = Self::user_params(facility, session);
        params.push(("transport", "smartclient"));
        params.push(("status", "RESTORING"));
        send_json(self.http.get(url).query(&params)).await
    }

    pub async fn remove_download(
        &self,
        facility: &Facility,
        session: &Session,
        prepared_id: &str,
    ) -> ClientResult<()> {
        let url = self.url(&format!("downloads/{prepared_id}"))?;
        send_empty(self.http.delete(url).query(&Self::user_params(facility, session))).await
    }

    pub async fn complete_download(
        &self,
        facility: &Facility,
        session: &Session,
        prepared_id: &str,
    ) -> ClientResult<()> {
        let url = self.url(&format!("downloads/{prepared_id}/complete"))?;
        send_empty(
            self.http
                .put(url)
                .query(&Self::user_params(facility, session))
                .json(&serde_json::json!({})),
        )
        .await
    }

    /// Backend API version, e.g. "2.4.0".
    pub async fn version(&self) -> ClientResult<String> {
        let url = self.url("version")?;
        send_json(self.http.put(url).json(&serde_json::json!({}))).await
    }
}
