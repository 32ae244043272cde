//! HTTP server for exposing Prometheus metrics.
//!
//! This module provides an Axum-based HTTP server that serves the
//! `/metrics?section=<name>` endpoint for Prometheus scraping and a root page
//! linking every configured section. Each scrape builds its own session and
//! collector; only the profile registry is shared between requests.

use crate::config::{ProfileRegistry, DEFAULT_SECTION};
use crate::error::{ExporterError, Result};
use crate::metrics::ScrapeCollector;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Content type of the Prometheus text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared application state.
#[derive(Clone)]
struct AppState {
    profiles: Arc<ProfileRegistry>,
}

/// Query parameters of a scrape.
#[derive(Debug, Deserialize)]
struct ScrapeParams {
    section: Option<String>,
}

/// Build the router serving `/metrics` and `/`.
pub fn router(profiles: Arc<ProfileRegistry>) -> Router {
    let state = AppState { profiles };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// # Arguments
///
/// * `listen_address` - Address to bind to (e.g., "0.0.0.0:9760")
/// * `profiles` - Connection profiles available to scrapes
///
/// # Examples
///
/// ```no_run
/// use veeam_ahv_exporter::config::{ConnectionProfile, ProfileRegistry};
/// use veeam_ahv_exporter::server::start_server;
///
/// #[tokio::main]
/// async fn main() {
///     let profile = ConnectionProfile::new("https://10.0.0.5:8100", "veeam", "veeam");
///     let profiles = ProfileRegistry::single(profile).unwrap();
///     start_server("0.0.0.0:9760", profiles).await.unwrap();
/// }
/// ```
pub async fn start_server(listen_address: &str, profiles: ProfileRegistry) -> Result<()> {
    let app = router(Arc::new(profiles));

    info!("Starting HTTP server on {}", listen_address);

    let listener = TcpListener::bind(listen_address).await?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ExporterError::Server(e.to_string()))?;

    Ok(())
}

/// Handler for /metrics endpoint.
async fn metrics_handler(
    State(state): State<AppState>,
    Query(params): Query<ScrapeParams>,
) -> Response {
    let section = params
        .section
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SECTION);
    info!("Received metrics scrape request for section '{}'", section);

    let profile = match state.profiles.get(section) {
        Ok(profile) => profile,
        Err(e) => {
            warn!("{}", e);
            return (StatusCode::NOT_FOUND, format!("{}\n", e)).into_response();
        }
    };
    debug!("Scraping {:?}", profile);

    let collector = match ScrapeCollector::new(profile.api_version.schema()) {
        Ok(collector) => collector,
        Err(e) => {
            warn!("Failed to create collector: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    if let Err(e) = collector.scrape(profile).await {
        warn!("Failed to scrape section '{}': {}", section, e);
        // Still return metrics, but up will be 0
    }

    match collector.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// `/metrics` path scraping `section`, with the query string encoded.
fn metrics_link(section: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("section", section)
        .finish();
    format!("/metrics?{}", query)
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Handler for root endpoint.
async fn root_handler(State(state): State<AppState>) -> Response {
    let links: String = state
        .profiles
        .sections()
        .map(|section| {
            format!(
                "            <li><a href=\"{}\">{}</a></li>\n",
                html_escape(&metrics_link(section)),
                html_escape(section)
            )
        })
        .collect();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Veeam AHV Proxy Exporter</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 40px; }}
        h1 {{ color: #333; }}
        a {{ color: #0066cc; text-decoration: none; }}
        a:hover {{ text-decoration: underline; }}
        .info {{ background: #f0f0f0; padding: 15px; border-radius: 5px; margin: 20px 0; }}
    </style>
</head>
<body>
    <h1>Veeam AHV Proxy Exporter</h1>
    <div class="info">
        <p>Prometheus metrics exporter for the Veeam Backup for Nutanix AHV proxy</p>
        <p><strong>Metrics:</strong></p>
        <ul>
{links}        </ul>
    </div>
</body>
</html>
"#
    );

    (StatusCode::OK, Html(html)).into_response()
}
