mod common;

use common::*;
use httpmock::Method::{DELETE, GET, POST, PUT};
use httpmock::MockServer;
use serde_json::json;
use topcat_client::{DownloadStatus, SubmitCartRequest};
use topcat_core::{Facility, Session};

fn download_json(id: i64, status: &str, transport: &str) -> serde_json::Value {
    json!({
        "id": id,
        "facilityName": FACILITY,
        "fileName": format!("download-{id}"),
        "preparedId": format!("prep-{id}"),
        "status": status,
        "transport": transport,
        "userName": USERNAME,
        "size": 1024,
        "isDeleted": false,
        "isTwoLevel": true,
        "createdAt": "2026-01-01T00:00:00Z",
        "downloadItems": [{ "id": 1, "entityId": 5, "entityType": "dataset" }]
    })
}

#[tokio::test]
async fn download_api_success_paths() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let icat_url = server.base_url();
    let facility = Facility::new(facility_config(&icat_url));
    let session = Session::new(SESSION_ID, USERNAME, "db");
    let api = download_api_for(&server);

    let downloads = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/topcat/downloads/facility/{FACILITY}"))
            .query_param("sessionId", SESSION_ID)
            .query_param("icatUrl", icat_url.as_str())
            .query_param("userName", USERNAME);
        then.status(200).json_body(json!([
            download_json(1, "COMPLETE", "https"),
            download_json(2, "PREPARING", "https"),
        ]));
    });
    let cart = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/topcat/cart/facility/{FACILITY}"))
            .query_param("sessionId", SESSION_ID);
        then.status(200)
            .json_body(json!({ "facilityName": FACILITY, "cartItems": [] }));
    });
    let remove_cart = server.mock(|when, then| {
        when.method(DELETE)
            .path(format!("/topcat/cart/facility/{FACILITY}"))
            .query_param("sessionId", SESSION_ID);
        then.status(200);
    });
    let submit = server.mock(|when, then| {
        when.method(POST)
            .path("/topcat/cart/submit")
            .json_body_partial(r#"{ "fileName": "run-42", "transport": "https", "zip": true }"#);
        then.status(200).json_body(json!({ "downloadId": 9 }));
    });
    let remove_download = server.mock(|when, then| {
        when.method(DELETE)
            .path("/topcat/downloads/prep-1")
            .query_param("userName", USERNAME);
        then.status(200);
    });
    let complete = server.mock(|when, then| {
        when.method(PUT).path("/topcat/downloads/prep-2/complete");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(PUT).path("/topcat/version");
        then.status(200).json_body(json!("2.4.0"));
    });

    let all = api.my_downloads(&facility, &session).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].status, DownloadStatus::Complete);
    assert_eq!(all[0].prepared_id.as_deref(), Some("prep-1"));
    assert_eq!(all[0].download_items[0].entity_type, "dataset");
    assert!(all[0].is_two_level);
    downloads.assert_hits(1);

    let current = api.get_cart(&facility, &session).await.unwrap();
    assert_eq!(current["facilityName"], FACILITY);
    cart.assert_hits(1);

    let submitted = api
        .submit_cart(&SubmitCartRequest {
            facility_name: FACILITY.to_string(),
            session_id: SESSION_ID.to_string(),
            icat_url: icat_url.clone(),
            file_name: "run-42".to_string(),
            transport: "https".to_string(),
            email: None,
            zip: true,
        })
        .await
        .unwrap();
    assert_eq!(submitted["downloadId"], 9);
    submit.assert_hits(1);

    api.remove_cart(&facility, &session).await.unwrap();
    remove_cart.assert_hits(1);
    api.remove_download(&facility, &session, "prep-1")
        .await
        .unwrap();
    remove_download.assert_hits(1);
    api.complete_download(&facility, &session, "prep-2")
        .await
        .unwrap();
    complete.assert_hits(1);

    assert_eq!(api.version().await.unwrap(), "2.4.0");
}

#[tokio::test]
async fn restoring_downloads_filter_by_transport_and_status() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let facility = Facility::new(facility_config(&server.base_url()));
    let session = Session::new(SESSION_ID, USERNAME, "db");
    let api = download_api_for(&server);

    let restoring = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/topcat/downloads/facility/{FACILITY}"))
            .query_param("sessionId", SESSION_ID)
            .query_param("transport", "smartclient")
            .query_param("status", "RESTORING");
        then.status(200)
            .json_body(json!([download_json(3, "RESTORING", "smartclient")]));
    });

    let downloads = api
        .my_restoring_smartclient_downloads(&facility, &session)
        .await
        .unwrap();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].status, DownloadStatus::Restoring);
    assert_eq!(downloads[0].transport, "smartclient");
    restoring.assert_hits(1);
}

#[tokio::test]
async fn admin_check_reads_boolean_body() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let facility = Facility::new(facility_config(&server.base_url()));
    let api = download_api_for(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path("/topcat/admin/isValidSession")
            .query_param("sessionId", "admin-sid");
        then.status(200).body("true");
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/topcat/admin/isValidSession")
            .query_param("sessionId", "user-sid");
        then.status(200).body("false");
    });

    assert!(api.is_valid_session(&facility, "admin-sid").await.unwrap());
    assert!(!api.is_valid_session(&facility, "user-sid").await.unwrap());
}

#[tokio::test]
async fn backend_errors_carry_code_and_message() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let facility = Facility::new(facility_config(&server.base_url()));
    let session = Session::new(SESSION_ID, USERNAME, "db");
    let api = download_api_for(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/topcat/downloads/facility/{FACILITY}"));
        then.status(404)
            .json_body(json!({ "code": "NOT_FOUND", "message": "no such facility" }));
    });

    let err = api.my_downloads(&facility, &session).await.unwrap_err();
    assert_eq!(err.code(), Some("NOT_FOUND"));
    assert_eq!(err.user_message(), "no such facility");
}
