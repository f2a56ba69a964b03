//! Session records and the patches that accumulate them.

use serde::{Deserialize, Serialize};

/// An authenticated context against one facility's catalog.
///
/// A stored session always carries `session_id`, `username` and `plugin`.
/// Everything else is filled in by the lookups that follow login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub username: String,
    pub plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids_upload_dataset_type_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids_upload_datafile_format_id: Option<i64>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub full_name: String,
}

impl Session {
    /// A freshly established session with only the mandatory fields.
    pub fn new(
        session_id: impl Into<String>,
        username: impl Into<String>,
        plugin: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            session_id: session_id.into(),
            full_name: username.clone(),
            username,
            plugin: plugin.into(),
            facility_id: None,
            ids_upload_dataset_type_id: None,
            ids_upload_datafile_format_id: None,
            is_admin: false,
        }
    }

    /// Apply a patch. Only the fields the patch carries are written, so
    /// applying patches in any order never clears a sibling field.
    pub fn apply(&mut self, patch: SessionPatch) {
        match patch {
            SessionPatch::FacilityId(id) => self.facility_id = Some(id),
            SessionPatch::UploadDatasetTypeId(id) => self.ids_upload_dataset_type_id = Some(id),
            SessionPatch::UploadDatafileFormatId(id) => {
                self.ids_upload_datafile_format_id = Some(id)
            }
            SessionPatch::IsAdmin(is_admin) => self.is_admin = is_admin,
            SessionPatch::FullName(name) => self.full_name = name,
        }
    }

    /// Username without the authenticator prefix ("db/root" -> "root").
    pub fn bare_username(&self) -> &str {
        match self.username.split_once('/') {
            Some((_, rest)) => rest,
            None => &self.username,
        }
    }
}

/// One field learned by a post-login lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionPatch {
    FacilityId(i64),
    UploadDatasetTypeId(i64),
    UploadDatafileFormatId(i64),
    IsAdmin(bool),
    FullName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patches_accumulate_in_any_order() {
        let patches = vec![
            SessionPatch::FullName("Jane Doe".to_string()),
            SessionPatch::FacilityId(1),
            SessionPatch::IsAdmin(true),
            SessionPatch::UploadDatasetTypeId(7),
        ];

        let mut forward = Session::new("sid", "db/jane", "db");
        for patch in patches.clone() {
            forward.apply(patch);
        }
        let mut backward = Session::new("sid", "db/jane", "db");
        for patch in patches.into_iter().rev() {
            backward.apply(patch);
        }

        assert_eq!(forward, backward);
        assert_eq!(forward.facility_id, Some(1));
        assert_eq!(forward.ids_upload_dataset_type_id, Some(7));
        assert_eq!(forward.ids_upload_datafile_format_id, None);
        assert!(forward.is_admin);
        assert_eq!(forward.full_name, "Jane Doe");
    }

    #[test]
    fn test_serialized_shape() {
        let session = Session::new("sid", "anon/anon", "anon");
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["sessionId"], "sid");
        assert_eq!(json["fullName"], "anon/anon");
        assert!(json.get("facilityId").is_none());
        assert_eq!(session.bare_username(), "anon");
    }
}
