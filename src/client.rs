//! Session client for the Veeam AHV proxy REST API.
//!
//! A [`ProxySession`] logs in once on [`ProxySession::connect`] and replays
//! the obtained token on every later request. Tokens are never refreshed: a
//! session lives for exactly one scrape.

use crate::config::ConnectionProfile;
use crate::error::{ExporterError, Result};
use crate::schema::ApiSchema;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Authenticated session against one proxy.
#[derive(Clone)]
pub struct ProxySession {
    client: Client,
    base_url: String,
    schema: &'static ApiSchema,
    auth_header: String,
}

impl std::fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySession")
            .field("base_url", &self.base_url)
            .field("api_version", &self.schema.version)
            .finish()
    }
}

impl ProxySession {
    /// Log in to the proxy and return an authenticated session.
    ///
    /// # Arguments
    ///
    /// * `profile` - Connection profile (url, credentials, TLS and timeout settings)
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use veeam_ahv_exporter::client::ProxySession;
    /// use veeam_ahv_exporter::config::ConnectionProfile;
    ///
    /// # async fn example() -> veeam_ahv_exporter::Result<()> {
    /// let profile = ConnectionProfile::new("https://10.0.0.5:8100", "veeam", "veeam");
    /// let session = ProxySession::connect(&profile).await?;
    /// let summary = session.get_json("/api/v4/dashboard/protectedVms", &[]).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self> {
        let schema = profile.api_version.schema();

        let mut builder = Client::builder().danger_accept_invalid_certs(!profile.verify_tls);
        if profile.timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(profile.timeout_seconds));
        }
        if !profile.verify_tls {
            warn!(
                "TLS certificate verification disabled for {}",
                profile.url
            );
        }
        let client = builder.build()?;

        let base_url = profile.url.trim_end_matches('/').to_string();
        let token = login(&client, &base_url, schema, profile).await?;

        Ok(Self {
            client,
            base_url,
            schema,
            auth_header: schema.login.auth_scheme.header_value(&token),
        })
    }

    /// Mapping table of the API version this session speaks.
    pub fn schema(&self) -> &'static ApiSchema {
        self.schema
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the absolute URL for an API path.
    pub fn url_for(&self, path: &str) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_matches('/'));
        if self.schema.trailing_slash {
            url.push('/');
        }
        url
    }

    /// Issue an authenticated request.
    ///
    /// Statuses >= 400 are returned as [`ExporterError::Status`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<Response> {
        let url = self.url_for(path);
        debug!("{} {} {:?}", method, url, query);

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            debug!("Payload: {}", body);
            request = request.json(body);
        }

        let response = request.send().await?;
        if is_error_status(response.status()) {
            warn!("Request to {} failed: {}", url, response.status());
            return Err(ExporterError::Status {
                url,
                status: response.status(),
            });
        }

        Ok(response)
    }

    /// GET a path and decode the body as JSON.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self.request(Method::GET, path, None, query).await?;
        let body = response.text().await?;
        debug!("Raw response for {}: {} bytes", path, body.len());

        serde_json::from_str(&body).map_err(|e| {
            ExporterError::ParseError(format!(
                "{}: {}. Body preview: {}...",
                path,
                e,
                preview(&body)
            ))
        })
    }
}

/// Perform the login exchange and extract the session token.
async fn login(
    client: &Client,
    base_url: &str,
    schema: &ApiSchema,
    profile: &ConnectionProfile,
) -> Result<String> {
    let spec = &schema.login;
    let url = format!("{}/{}", base_url, spec.path.trim_matches('/'));
    debug!("Logging in to {} as {}", url, profile.username);

    let mut form: Vec<(&str, &str)> = spec.extra_fields.to_vec();
    form.push((spec.username_field, profile.username.as_str()));
    form.push((spec.password_field, profile.password.as_str()));

    let response = client.post(&url).form(&form).send().await?;
    if is_error_status(response.status()) {
        warn!("Login to {} failed: {}", url, response.status());
        return Err(ExporterError::Status {
            url,
            status: response.status(),
        });
    }

    let body = response.text().await?;
    let data: Value = serde_json::from_str(&body).map_err(|e| {
        ExporterError::ParseError(format!(
            "login response: {}. Body preview: {}...",
            e,
            preview(&body)
        ))
    })?;

    match data.get(spec.token_field).and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(ExporterError::Auth(format!(
            "login response from {} carries no '{}'",
            url, spec.token_field
        ))),
    }
}

/// Statuses >= 400 fail the request.
fn is_error_status(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
