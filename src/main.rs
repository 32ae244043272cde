use anyhow::Result;
use clap::Parser;
use veeam_ahv_exporter::{
    config::{ConnectionProfile, ExporterConfig, ProfileRegistry},
    schema::ApiVersion,
    server::start_server,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Veeam AHV Exporter - Prometheus metrics exporter for the Veeam AHV proxy API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Proxy URL to connect to (e.g. https://1.2.3.4:8100)
    #[arg(long, env = "VEEAM_PROXY_URL", default_value = "")]
    proxy_url: String,

    /// Proxy user name
    #[arg(long, env = "VEEAM_PROXY_USERNAME", default_value = "veeam")]
    proxy_username: String,

    /// Proxy user password
    #[arg(long, env = "VEEAM_PROXY_PASSWORD", default_value = "veeam", hide_env_values = true)]
    proxy_password: String,

    /// Proxy API version (v3, v4, v5)
    #[arg(long, env = "VEEAM_PROXY_API_VERSION", default_value = "v4")]
    api_version: ApiVersion,

    /// Verify the proxy TLS certificate
    #[arg(long, env = "VEEAM_PROXY_VERIFY_TLS")]
    verify_tls: bool,

    /// Proxy request timeout in seconds (0 = none)
    #[arg(long, env = "VEEAM_PROXY_TIMEOUT", default_value_t = 0)]
    timeout_seconds: u64,

    /// Address to listen on for HTTP requests
    #[arg(long, env = "VEEAM_EXPORTER_LISTEN_ADDRESS", default_value = "0.0.0.0:9760")]
    listen_address: String,

    /// Log level (trace, debug, info, warning, error)
    #[arg(long, env = "VEEAM_EXPORTER_LOG_LEVEL", default_value = "warning")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "VEEAM_EXPORTER_LOG_JSON")]
    log_json: bool,

    /// Configuration file with multiple sections
    #[arg(short = 'c', long, value_name = "FILE", env = "VEEAM_EXPORTER_CONF")]
    exporter_conf: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let exporter = ExporterConfig {
        listen_address: args.listen_address.clone(),
        log_level: args.log_level.clone(),
        log_json: args.log_json,
    };

    // Initialize logging
    init_logging(&exporter)?;

    info!("Starting Veeam AHV Exporter");

    // Load connection profiles
    let fallback = ConnectionProfile {
        url: args.proxy_url,
        username: args.proxy_username,
        password: args.proxy_password,
        api_version: args.api_version,
        verify_tls: args.verify_tls,
        timeout_seconds: args.timeout_seconds,
    };
    let profiles = ProfileRegistry::load(args.exporter_conf.as_deref(), fallback)?;
    info!(
        "Loaded {} profile(s): {}",
        profiles.len(),
        profiles.sections().collect::<Vec<_>>().join(", ")
    );
    info!("Listen address: {}", exporter.listen_address);

    // Start HTTP server
    if let Err(e) = start_server(&exporter.listen_address, profiles).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging(config: &ExporterConfig) -> Result<()> {
    let level = log_level_directive(&config.log_level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    Ok(())
}

/// Map a `--log-level` value to a filter directive; unknown values fall back to `warn`.
fn log_level_directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "error" => "error",
        "off" => "off",
        _ => "warn",
    }
}
