//! Configuration types shared across crates.

use crate::facility::FacilityConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Query result cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of cached query results in seconds (default: 10 hours).
    #[serde(default = "default_query_ttl_secs")]
    pub query_ttl_secs: u64,
}

fn default_query_ttl_secs() -> u64 {
    10 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_ttl_secs: default_query_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_secs)
    }
}

/// Download/cart backend configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DownloadApiConfig {
    /// Base URL of the download API (e.g. "https://topcat.example.org/topcat").
    /// When unset, admin checks at login are skipped and cart commands fail.
    #[serde(default)]
    pub url: Option<String>,
}

/// Session persistence configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// File holding the per-facility session records. Sessions are kept in
    /// memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configured facilities.
    #[serde(default)]
    pub facilities: Vec<FacilityConfig>,
    /// Download backend.
    #[serde(default)]
    pub download_api: DownloadApiConfig,
    /// Query cache.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Session persistence.
    #[serde(default)]
    pub session: SessionConfig,
}

impl AppConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.facilities.is_empty() {
            return Err("at least one facility must be configured".to_string());
        }
        for facility in &self.facilities {
            facility.validate()?;
        }
        if let Some(url) = &self.download_api.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("download_api.url must start with http:// or https://".to_string());
            }
        }
        if self.cache.query_ttl_secs == 0 {
            tracing::warn!("cache.query_ttl_secs is 0, query results will never be reused");
        }
        Ok(())
    }

    /// Create a test configuration for one facility at `icat_url`.
    ///
    /// **For testing only.**
    pub fn for_testing(icat_url: &str) -> Self {
        Self {
            facilities: vec![FacilityConfig {
                name: "TEST".to_string(),
                icat_url: icat_url.to_string(),
                ids_url: None,
                authentication_types: Vec::new(),
                ids_upload_dataset_type: None,
                ids_upload_datafile_format: None,
            }],
            download_api: DownloadApiConfig::default(),
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
        }
    }
}
