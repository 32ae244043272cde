//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use mockito::{Matcher, Mock, ServerGuard};
use veeam_ahv_exporter::{config::ConnectionProfile, schema::ApiVersion};

pub const TOKEN: &str = "tok-123";

/// Profile pointing at a mock server.
pub fn create_test_profile(server_url: &str, api_version: ApiVersion) -> ConnectionProfile {
    let mut profile = ConnectionProfile::new(server_url, "veeam", "secret");
    profile.api_version = api_version;
    profile.timeout_seconds = 5;
    profile
}

/// Value of a sample in Prometheus text output.
///
/// With no labels the series must be unlabelled; otherwise every given
/// label pair must be present on the series.
pub fn sample_value(metrics: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    metrics
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.rsplit_once(' '))
        .find(|(series, _)| {
            let (series_name, label_text) = match series.split_once('{') {
                Some((n, rest)) => (n, rest),
                None => (*series, ""),
            };
            if series_name != name {
                return false;
            }
            if labels.is_empty() {
                return label_text.is_empty();
            }
            labels
                .iter()
                .all(|(k, v)| label_text.contains(&format!("{}=\"{}\"", k, v)))
        })
        .and_then(|(_, value)| value.parse().ok())
}

/// Mock the OAuth2 login shared by v4 and v5.
pub async fn mock_oauth_login(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/api/oauth2/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grantType".into(), "password".into()),
            Matcher::UrlEncoded("userName".into(), "veeam".into()),
            Matcher::UrlEncoded("password".into(), "secret".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(r#"{{"accessToken": "{}", "tokenType": "bearer"}}"#, TOKEN))
        .create_async()
        .await
}

/// Mock an authenticated v4/v5 GET.
pub async fn mock_get(server: &mut ServerGuard, path: &str, body: &str) -> Mock {
    server
        .mock("GET", path)
        .match_header("authorization", format!("Bearer {}", TOKEN).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

pub const SUMMARY_BODY: &str =
    r#"{"protectedVms": 10, "unprotectedVms": 2, "totalVms": 12, "protectedVmsWithSnapshots": 5}"#;

pub const V4_JOBS_BODY: &str = r#"{
    "totalCount": 2,
    "results": [
        {
            "id": "job-1",
            "name": "Daily",
            "objects": 2,
            "lastRunUtc": "1/2/2006 3:04:05 PM",
            "nextRunUtc": "1/3/2006 3:04:05 PM",
            "status": "Success",
            "settings": {"vmIds": ["vm-1", "vm-2"]}
        },
        {
            "id": "job-2",
            "name": "Weekly",
            "objects": "1",
            "lastRunUtc": "1/1/2006 1:00:00 AM",
            "nextRunUtc": "Disabled",
            "status": "Warning",
            "settings": {"vmIds": ["vm-3"]}
        }
    ]
}"#;

pub const V4_CLUSTERS_BODY: &str = r#"[{"id": "c1", "name": "cluster-a"}]"#;

pub const V4_CLUSTER_VMS_BODY: &str = r#"{
    "results": [
        {"id": "vm-1", "name": "web", "vmSize": 1073741824},
        {"id": "vm-3", "name": "db", "vmSize": "2048"},
        {"id": "vm-9", "name": "stray", "vmSize": 1}
    ]
}"#;

pub const V4_PROTECTED_VMS_BODY: &str = r#"{
    "results": [
        {"id": "vm-1", "name": "web", "backups": 7, "lastProtectionDateUtc": "1/2/2006 3:04:05 PM"},
        {"id": "vm-9", "name": "stray", "backups": 1, "lastProtectionDateUtc": "1/2/2006 3:04:05 PM"}
    ]
}"#;

/// Mock a complete, healthy v4 proxy.
pub async fn mock_v4_proxy(server: &mut ServerGuard) -> Vec<Mock> {
    vec![
        mock_oauth_login(server).await,
        mock_get(server, "/api/v4/dashboard/protectedVms/", SUMMARY_BODY).await,
        mock_get(server, "/api/v4/jobs/", V4_JOBS_BODY).await,
        mock_get(server, "/api/v4/clusters/", V4_CLUSTERS_BODY).await,
        mock_get(server, "/api/v4/clusters/c1/vms/", V4_CLUSTER_VMS_BODY).await,
        mock_get(server, "/api/v4/protectedVms/", V4_PROTECTED_VMS_BODY).await,
    ]
}
