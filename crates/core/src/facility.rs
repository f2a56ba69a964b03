//! Facility configuration and the registry of configured facilities.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One authentication method offered by a facility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationType {
    /// Plugin mnemonic as known to the catalog (e.g. "db", "cas", "anon").
    pub plugin: String,
    /// Label shown to users.
    #[serde(default)]
    pub title: Option<String>,
    /// Base URL of the CAS server, required for the "cas" plugin.
    #[serde(default)]
    pub cas_url: Option<String>,
}

impl AuthenticationType {
    /// URL that signs the user out of the external identity provider, if any.
    pub fn external_logout_url(&self) -> Option<String> {
        self.cas_url
            .as_deref()
            .map(|url| format!("{}/logout", url.trim_end_matches('/')))
    }
}

/// Static configuration of one facility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityConfig {
    /// Facility name, unique within the registry and equal to the catalog's
    /// `Facility.name`.
    pub name: String,
    /// Base URL of the catalog; requests go to `<icat_url>/icat/<resource>`.
    pub icat_url: String,
    /// Base URL of the data server, if uploads/downloads are enabled.
    #[serde(default)]
    pub ids_url: Option<String>,
    /// Authentication plugins offered at login.
    #[serde(default)]
    pub authentication_types: Vec<AuthenticationType>,
    /// Name of the dataset type assigned to uploaded datasets.
    #[serde(default)]
    pub ids_upload_dataset_type: Option<String>,
    /// Name of the datafile format assigned to uploaded files.
    #[serde(default)]
    pub ids_upload_datafile_format: Option<String>,
}

impl FacilityConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("facility name cannot be empty".to_string());
        }
        if !self.icat_url.starts_with("http://") && !self.icat_url.starts_with("https://") {
            return Err(format!(
                "facility '{}': icatUrl must start with http:// or https://",
                self.name
            ));
        }
        for auth in &self.authentication_types {
            if auth.plugin == crate::CAS_PLUGIN && auth.cas_url.is_none() {
                return Err(format!(
                    "facility '{}': cas authentication requires casUrl",
                    self.name
                ));
            }
        }
        Ok(())
    }
}

/// A configured facility. Immutable once loaded.
#[derive(Debug)]
pub struct Facility {
    config: FacilityConfig,
}

impl Facility {
    pub fn new(config: FacilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FacilityConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn icat_url(&self) -> &str {
        self.config.icat_url.trim_end_matches('/')
    }

    /// Find the authentication type registered for `plugin`.
    pub fn authentication_type(&self, plugin: &str) -> Option<&AuthenticationType> {
        self.config
            .authentication_types
            .iter()
            .find(|auth| auth.plugin == plugin)
    }
}

/// All facilities known to the application, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct FacilityRegistry {
    facilities: BTreeMap<String, Arc<Facility>>,
}

impl FacilityRegistry {
    /// Build a registry, rejecting invalid or duplicate entries.
    pub fn from_configs(configs: impl IntoIterator<Item = FacilityConfig>) -> Result<Self> {
        let mut facilities = BTreeMap::new();
        for config in configs {
            config.validate().map_err(Error::InvalidFacility)?;
            let name = config.name.clone();
            if facilities
                .insert(name.clone(), Arc::new(Facility::new(config)))
                .is_some()
            {
                return Err(Error::InvalidFacility(format!(
                    "duplicate facility name '{name}'"
                )));
            }
            tracing::debug!(facility = %name, "Registered facility");
        }
        Ok(Self { facilities })
    }

    pub fn get(&self, name: &str) -> Result<Arc<Facility>> {
        self.facilities
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFacility(name.to_string()))
    }

    /// The only facility, when exactly one is configured.
    pub fn sole(&self) -> Option<Arc<Facility>> {
        if self.facilities.len() == 1 {
            self.facilities.values().next().cloned()
        } else {
            None
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.facilities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> FacilityConfig {
        FacilityConfig {
            name: name.to_string(),
            icat_url: "https://icat.example.org/".to_string(),
            ids_url: None,
            authentication_types: vec![AuthenticationType {
                plugin: "cas".to_string(),
                title: None,
                cas_url: Some("https://cas.example.org/cas/".to_string()),
            }],
            ids_upload_dataset_type: None,
            ids_upload_datafile_format: None,
        }
    }

    #[test]
    fn test_registry_lookup_and_duplicates() {
        let registry = FacilityRegistry::from_configs([config("LILS")]).unwrap();
        let facility = registry.get("LILS").unwrap();
        assert_eq!(facility.icat_url(), "https://icat.example.org");
        assert_eq!(registry.sole().unwrap().name(), "LILS");
        assert_eq!(
            registry.get("nope").unwrap_err(),
            Error::UnknownFacility("nope".to_string())
        );

        let err = FacilityRegistry::from_configs([config("A"), config("A")]).unwrap_err();
        assert!(matches!(err, Error::InvalidFacility(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_cas_logout_url() {
        let facility = Facility::new(config("LILS"));
        let cas = facility.authentication_type("cas").unwrap();
        assert_eq!(
            cas.external_logout_url().as_deref(),
            Some("https://cas.example.org/cas/logout")
        );
        assert!(facility.authentication_type("db").is_none());
    }

    #[test]
    fn test_cas_without_url_is_invalid() {
        let mut bad = config("LILS");
        bad.authentication_types[0].cas_url = None;
        assert!(bad.validate().is_err());
    }
}
