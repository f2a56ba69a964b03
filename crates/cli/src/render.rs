//! Plain-text rendering of catalog results.

use serde_json::Value;
use topcat_client::Download;
use topcat_core::{Row, Session};

/// One JSON document per row; entities are re-rooted under their server type.
pub fn render_rows(rows: &[Row]) -> Vec<String> {
    rows.iter().map(render_row).collect()
}

pub fn render_row(row: &Row) -> String {
    match row {
        Row::Entity(entity) => entity.to_record().to_string(),
        Row::Value(Value::String(text)) => text.clone(),
        Row::Value(value) => value.to_string(),
    }
}

pub fn render_session(facility: &str, session: &Session) -> Vec<String> {
    let mut lines = vec![
        format!("Facility: {facility}"),
        format!("Username: {}", session.username),
        format!("Full name: {}", session.full_name),
        format!("Plugin: {}", session.plugin),
    ];
    if let Some(id) = session.facility_id {
        lines.push(format!("Facility ID: {id}"));
    }
    if let Some(id) = session.ids_upload_dataset_type_id {
        lines.push(format!("Upload dataset type ID: {id}"));
    }
    if let Some(id) = session.ids_upload_datafile_format_id {
        lines.push(format!("Upload datafile format ID: {id}"));
    }
    lines.push(format!(
        "Admin: {}",
        if session.is_admin { "yes" } else { "no" }
    ));
    lines
}

pub fn render_download(download: &Download) -> String {
    let status = serde_json::to_value(download.status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    let size = download
        .size
        .map(|bytes| bytes.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}\t{}\t{}\t{}\t{}",
        download.id, status, download.transport, size, download.file_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use topcat_client::DownloadStatus;
    use topcat_core::{Facility, FacilityConfig};

    fn facility() -> Arc<Facility> {
        Arc::new(Facility::new(FacilityConfig {
            name: "LILS".to_string(),
            icat_url: "https://icat.example.org".to_string(),
            ids_url: None,
            authentication_types: Vec::new(),
            ids_upload_dataset_type: None,
            ids_upload_datafile_format: None,
        }))
    }

    #[test]
    fn rows_render_entities_under_server_type() {
        let facility = facility();
        let rows = vec![
            Row::wrap(json!({ "Dataset": { "id": 5 } }), &facility),
            Row::wrap(json!("raw"), &facility),
            Row::wrap(json!(17), &facility),
        ];
        assert_eq!(
            render_rows(&rows),
            vec![r#"{"Dataset":{"id":5}}"#, "raw", "17"]
        );
    }

    #[test]
    fn session_lists_only_resolved_ids() {
        let mut session = Session::new("sid", "db/root", "db");
        session.facility_id = Some(7);
        session.is_admin = true;

        let lines = render_session("LILS", &session);
        assert_eq!(lines[0], "Facility: LILS");
        assert!(lines.contains(&"Full name: db/root".to_string()));
        assert!(lines.contains(&"Facility ID: 7".to_string()));
        assert!(!lines.iter().any(|line| line.starts_with("Upload")));
        assert_eq!(lines.last().map(String::as_str), Some("Admin: yes"));
    }

    #[test]
    fn download_line_is_tab_separated() {
        let download: Download = serde_json::from_value(json!({
            "id": 3,
            "facilityName": "LILS",
            "fileName": "run-3",
            "status": "RESTORING",
            "transport": "smartclient",
            "userName": "db/root"
        }))
        .unwrap();
        assert_eq!(download.status, DownloadStatus::Restoring);
        assert_eq!(render_download(&download), "3\tRESTORING\tsmartclient\t-\trun-3");
    }
}
