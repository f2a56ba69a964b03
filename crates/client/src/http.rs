//! Versioned REST plumbing for `<icatUrl>/icat/<resource>`.

use crate::error::{ClientError, ClientResult};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Per-request options.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Caller-owned cancellation signal. When it fires, requests carrying it
    /// are abandoned and resolve to [`ClientError::Cancelled`].
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Drive `fut` unless the cancellation signal fires first. A cancelled
    /// future is dropped and never polled again.
    pub async fn run<T, F>(&self, fut: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ClientError::Cancelled),
                    result = fut => result,
                }
            }
            None => fut.await,
        }
    }
}

/// HTTP access to one catalog's REST API.
#[derive(Clone, Debug)]
pub struct IcatHttp {
    http: reqwest::Client,
    base_url: Url,
}

impl IcatHttp {
    /// Bind to the catalog at `icat_url`; resources resolve under `/icat/`.
    pub fn new(http: reqwest::Client, icat_url: &str) -> ClientResult<Self> {
        let base = format!("{}/icat/", icat_url.trim_end_matches('/'));
        let base_url = Url::parse(&base).map_err(|e| ClientError::Url(format!("{base}: {e}")))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, resource: &str) -> ClientResult<Url> {
        self.base_url
            .join(resource.trim_start_matches('/'))
            .map_err(|e| ClientError::Url(format!("{resource}: {e}")))
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        params: &[(&str, &str)],
        options: &RequestOptions,
    ) -> ClientResult<T> {
        let url = self.url(resource)?;
        tracing::trace!(%url, "GET");
        options
            .run(send_json(self.http.get(url).query(params)))
            .await
    }

    /// POST with a form-encoded body.
    pub async fn post<T: DeserializeOwned>(
        &self,
        resource: &str,
        form: &[(&str, &str)],
        options: &RequestOptions,
    ) -> ClientResult<T> {
        let url = self.url(resource)?;
        tracing::trace!(%url, "POST");
        options.run(send_json(self.http.post(url).form(form))).await
    }

    pub async fn put(&self, resource: &str, options: &RequestOptions) -> ClientResult<()> {
        let url = self.url(resource)?;
        tracing::trace!(%url, "PUT");
        options.run(send_empty(self.http.put(url))).await
    }

    pub async fn delete(
        &self,
        resource: &str,
        params: &[(&str, &str)],
        options: &RequestOptions,
    ) -> ClientResult<()> {
        let url = self.url(resource)?;
        tracing::trace!(%url, "DELETE");
        options
            .run(send_empty(self.http.delete(url).query(params)))
            .await
    }
}

pub(crate) async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> ClientResult<T> {
    let response = req.send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ClientError::from_response(status.as_u16(), &body));
    }
    Ok(serde_json::from_str(&body)?)
}

pub(crate) async fn send_empty(req: RequestBuilder) -> ClientResult<()> {
    let response = req.send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ClientError::from_response(status.as_u16(), &body));
    }
    Ok(())
}
