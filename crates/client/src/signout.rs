//! Sign-out from external identity providers.
//!
//! Plugins such as CAS keep their own login state; logging out of the
//! catalog alone would leave the user signed in there. Logout therefore
//! triggers the provider's logout page in the background and waits for a
//! completion signal before resolving.

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Perform an external sign-out side effect and wait for it to complete.
#[async_trait]
pub trait ExternalSignOut: Send + Sync {
    async fn sign_out(&self, logout_url: &str) -> ClientResult<()>;
}

/// Loads the logout URL with a plain HTTP request.
///
/// The request runs detached; only its completion is awaited, so dropping
/// the logout future does not abort the provider-side sign-out.
#[derive(Clone, Debug, Default)]
pub struct HttpSignOut {
    http: reqwest::Client,
}

impl HttpSignOut {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ExternalSignOut for HttpSignOut {
    async fn sign_out(&self, logout_url: &str) -> ClientResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let request = self.http.get(logout_url);
        let url = logout_url.to_string();

        tokio::spawn(async move {
            let outcome = match request.send().await {
                Ok(response) => {
                    tracing::debug!(url = %url, status = %response.status(), "external sign-out loaded");
                    Ok(())
                }
                Err(err) => Err(ClientError::from(err)),
            };
            let _ = done_tx.send(outcome);
        });

        done_rx
            .await
            .map_err(|_| ClientError::SignOut("sign-out task ended without completing".to_string()))?
    }
}

/// Sign-out that does nothing, for front ends without an external provider.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSignOut;

#[async_trait]
impl ExternalSignOut for NoSignOut {
    async fn sign_out(&self, logout_url: &str) -> ClientResult<()> {
        tracing::debug!(url = logout_url, "external sign-out skipped");
        Ok(())
    }
}
