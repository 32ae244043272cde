//! HTTP server endpoint tests

mod common;

use common::*;
use mockito::Server;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use veeam_ahv_exporter::{
    config::{ConnectionProfile, ProfileRegistry},
    schema::ApiVersion,
    server::router,
};

/// Serve the exporter on an ephemeral port and return its address.
async fn spawn_exporter(profiles: ProfileRegistry) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(profiles));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let mut server = Server::new_async().await;
    let _mocks = mock_v4_proxy(&mut server).await;

    let profiles =
        ProfileRegistry::single(create_test_profile(&server.url(), ApiVersion::V4)).unwrap();
    let addr = spawn_exporter(profiles).await;

    let response = reqwest::get(format!("http://{}/metrics?section=default", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let metrics = response.text().await.unwrap();

    // Verify Prometheus format
    assert!(metrics.contains("# HELP"));
    assert!(metrics.contains("# TYPE veeam_ahvproxy_protected_vms gauge"));
    assert_eq!(sample_value(&metrics, "veeam_ahvproxy_up", &[]), Some(1.0));
    assert_eq!(sample_value(&metrics, "veeam_ahvproxy_protected_vms", &[]), Some(10.0));
    assert!(metrics.contains(r#"job_name="Daily""#));
    assert!(metrics.contains(r#"vm_name="web""#));
}

#[tokio::test]
async fn test_section_defaults_to_default() {
    let mut server = Server::new_async().await;
    let _mocks = mock_v4_proxy(&mut server).await;

    let profiles =
        ProfileRegistry::single(create_test_profile(&server.url(), ApiVersion::V4)).unwrap();
    let addr = spawn_exporter(profiles).await;

    for url in [
        format!("http://{}/metrics", addr),
        format!("http://{}/metrics?section=", addr),
    ] {
        let response = reqwest::get(url).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let metrics = response.text().await.unwrap();
        assert_eq!(sample_value(&metrics, "veeam_ahvproxy_total_vms", &[]), Some(12.0));
    }
}

#[tokio::test]
async fn test_unknown_section_is_request_scoped() {
    let mut server = Server::new_async().await;
    let _mocks = mock_v4_proxy(&mut server).await;

    let profiles =
        ProfileRegistry::single(create_test_profile(&server.url(), ApiVersion::V4)).unwrap();
    let addr = spawn_exporter(profiles).await;

    let response = reqwest::get(format!("http://{}/metrics?section=missing", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.text().await.unwrap().contains("missing"));

    // The exporter keeps serving other sections
    let response = reqwest::get(format!("http://{}/metrics?section=default", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bad_credentials_only_affect_their_section() {
    let mut server = Server::new_async().await;
    let _mocks = mock_v4_proxy(&mut server).await;

    // Wrong password never matches the login mock, mockito answers 501
    let mut broken = create_test_profile(&server.url(), ApiVersion::V4);
    broken.password = "wrong".to_string();

    let mut profiles = BTreeMap::new();
    profiles.insert(
        "good".to_string(),
        create_test_profile(&server.url(), ApiVersion::V4),
    );
    profiles.insert("broken".to_string(), broken);
    let addr = spawn_exporter(ProfileRegistry::new(profiles).unwrap()).await;

    let response = reqwest::get(format!("http://{}/metrics?section=broken", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = response.text().await.unwrap();
    assert_eq!(sample_value(&metrics, "veeam_ahvproxy_up", &[]), Some(0.0));

    let response = reqwest::get(format!("http://{}/metrics?section=good", addr))
        .await
        .unwrap();
    let metrics = response.text().await.unwrap();
    assert_eq!(sample_value(&metrics, "veeam_ahvproxy_up", &[]), Some(1.0));
}

#[tokio::test]
async fn test_every_scrape_logs_in_again() {
    let mut server = Server::new_async().await;

    let login = server
        .mock("POST", "/api/oauth2/token")
        .with_status(200)
        .with_body(format!(r#"{{"accessToken": "{}"}}"#, TOKEN))
        .expect(2)
        .create_async()
        .await;
    let _summary = mock_get(&mut server, "/api/v4/dashboard/protectedVms/", SUMMARY_BODY).await;
    let _jobs = mock_get(&mut server, "/api/v4/jobs/", V4_JOBS_BODY).await;
    let _clusters = mock_get(&mut server, "/api/v4/clusters/", "[]").await;
    let _protected = mock_get(&mut server, "/api/v4/protectedVms/", V4_PROTECTED_VMS_BODY).await;

    let profiles =
        ProfileRegistry::single(create_test_profile(&server.url(), ApiVersion::V4)).unwrap();
    let addr = spawn_exporter(profiles).await;

    for _ in 0..2 {
        let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let metrics = response.text().await.unwrap();
        assert_eq!(sample_value(&metrics, "veeam_ahvproxy_up", &[]), Some(1.0));
    }

    login.assert_async().await;
}

#[tokio::test]
async fn test_root_page_lists_sections() {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "default".to_string(),
        ConnectionProfile::new("https://10.0.0.1:8100", "veeam", "veeam"),
    );
    profiles.insert(
        "site-b".to_string(),
        ConnectionProfile::new("https://10.0.0.2:8100", "veeam", "veeam"),
    );
    let addr = spawn_exporter(ProfileRegistry::new(profiles).unwrap()).await;

    let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = response.text().await.unwrap();

    assert!(html.contains("Veeam AHV Proxy Exporter"));
    assert!(html.contains(r#"href="/metrics?section=default""#));
    assert!(html.contains(r#"href="/metrics?section=site-b""#));
}

#[tokio::test]
async fn test_root_page_encodes_section_names() {
    let mut server = Server::new_async().await;
    let _mocks = mock_v4_proxy(&mut server).await;

    let mut profiles = BTreeMap::new();
    profiles.insert(
        "R&D <lab>".to_string(),
        create_test_profile(&server.url(), ApiVersion::V4),
    );
    let addr = spawn_exporter(ProfileRegistry::new(profiles).unwrap()).await;

    let html = reqwest::get(format!("http://{}/", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains(r#"href="/metrics?section=R%26D+%3Clab%3E""#));
    assert!(html.contains(">R&amp;D &lt;lab&gt;</a>"));
    assert!(!html.contains("<lab>"));

    // The encoded link scrapes the section
    let response = reqwest::get(format!("http://{}/metrics?section=R%26D+%3Clab%3E", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = response.text().await.unwrap();
    assert_eq!(sample_value(&metrics, "veeam_ahvproxy_up", &[]), Some(1.0));
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let profiles =
        ProfileRegistry::single(ConnectionProfile::new("https://10.0.0.1:8100", "veeam", "veeam"))
            .unwrap();
    let addr = spawn_exporter(profiles).await;

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
