//! Configuration management for the Veeam AHV exporter.
//!
//! Connection profiles are loaded once at startup from either:
//! - a multi-section configuration file (YAML or TOML, chosen by extension)
//!   overlaid with environment variables (`VEEAM_AHV_<SECTION>__<FIELD>`)
//! - the single-profile command-line flags, synthesized as section `default`
//!
//! The resulting [`ProfileRegistry`] is immutable and shared by all requests.

use crate::error::{ExporterError, Result};
use crate::schema::ApiVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Section used when a scrape does not name one.
pub const DEFAULT_SECTION: &str = "default";

/// Prefix of environment variables overriding profile fields.
pub const ENV_PREFIX: &str = "VEEAM_AHV";

/// Proxy connection settings for one section.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Proxy API base URL (e.g., "https://10.0.0.5:8100")
    #[serde(default)]
    pub url: String,

    /// Proxy user name
    #[serde(default)]
    pub username: String,

    /// Proxy password
    #[serde(default)]
    pub password: String,

    /// API version spoken by the proxy
    #[serde(default)]
    pub api_version: ApiVersion,

    /// Verify TLS certificates (proxies usually run with self-signed certs)
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Request timeout in seconds (0 = no timeout)
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("api_version", &self.api_version)
            .field("verify_tls", &self.verify_tls)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl ConnectionProfile {
    /// Create a profile with default API version and TLS settings.
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            api_version: ApiVersion::default(),
            verify_tls: default_verify_tls(),
            timeout_seconds: 0,
        }
    }
}

/// Exporter specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Address to listen on for the metrics endpoint
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Log level (trace, debug, info, warning, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_verify_tls() -> bool {
    false
}

fn default_listen_address() -> String {
    "0.0.0.0:9760".to_string()
}

fn default_log_level() -> String {
    "warning".to_string()
}

/// Immutable mapping from section name to connection profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, ConnectionProfile>,
}

impl ProfileRegistry {
    /// Build a registry from already loaded profiles.
    pub fn new(profiles: BTreeMap<String, ConnectionProfile>) -> Result<Self> {
        let registry = Self { profiles };
        registry.validate()?;
        Ok(registry)
    }

    /// Registry holding a single `default` section.
    pub fn single(profile: ConnectionProfile) -> Result<Self> {
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_SECTION.to_string(), profile);
        Self::new(profiles)
    }

    /// Load profiles from a configuration file and environment variables.
    ///
    /// Section names keep the spelling used in the file. Environment
    /// variables (`VEEAM_AHV_<SECTION>__<FIELD>`) only override fields of
    /// sections the file declares.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Path to a YAML or TOML file mapping section names to profiles
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use veeam_ahv_exporter::config::ProfileRegistry;
    ///
    /// let registry = ProfileRegistry::from_file("config/exporter.yml").unwrap();
    /// ```
    pub fn from_file(config_path: &str) -> Result<Self> {
        Self::from_file_with_env(config_path, ENV_PREFIX)
    }

    fn from_file_with_env(config_path: &str, env_prefix: &str) -> Result<Self> {
        let path = Path::new(config_path);
        if !path.exists() {
            return Err(config_error(format!(
                "configuration file '{}' does not exist",
                config_path
            )));
        }

        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => config::FileFormat::Yaml,
            Some("toml") => config::FileFormat::Toml,
            _ => {
                return Err(config_error(format!(
                    "configuration file '{}' must be YAML (.yml, .yaml) or TOML (.toml)",
                    config_path
                )))
            }
        };
        let contents = std::fs::read_to_string(path)?;
        let spellings = section_spellings(&contents, format)?;

        let config = config::Config::builder()
            .add_source(config::File::from_str(&contents, format))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: BTreeMap<String, ConnectionProfile> = config.try_deserialize()?;

        // Keys come back lowercased; restore the file's spelling
        let mut profiles = BTreeMap::new();
        for (key, profile) in loaded {
            match spellings.get(&key.to_lowercase()) {
                Some(section) => {
                    profiles.insert(section.clone(), profile);
                }
                None if profile.url.trim().is_empty() => {
                    warn!(
                        "Ignoring environment overrides for section '{}' missing from {}",
                        key, config_path
                    );
                }
                None => {
                    profiles.insert(key, profile);
                }
            }
        }

        Self::new(profiles)
    }

    /// Load from `config_path` when given, otherwise wrap `fallback` as `default`.
    pub fn load(config_path: Option<&str>, fallback: ConnectionProfile) -> Result<Self> {
        match config_path {
            Some(path) if !path.is_empty() => Self::from_file(path),
            _ => Self::single(fallback),
        }
    }

    /// Look up a section.
    pub fn get(&self, section: &str) -> Result<&ConnectionProfile> {
        self.profiles
            .get(section)
            .ok_or_else(|| ExporterError::UnknownProfile(section.to_string()))
    }

    /// Configured section names, sorted.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Validate loaded profiles.
    fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(config_error("no connection profiles configured"));
        }

        for (section, profile) in &self.profiles {
            if profile.url.trim().is_empty() {
                return Err(config_error(format!(
                    "proxy url of section '{}' cannot be empty",
                    section
                )));
            }
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> ExporterError {
    ExporterError::Config(config::ConfigError::Message(message.into()))
}

/// Top-level section names as written in the file, keyed by their lowercase form.
///
/// YAML sections are unindented `name:` lines, TOML sections are `[name]`
/// tables (or `name.field = ...` dotted keys).
fn section_spellings(
    contents: &str,
    format: config::FileFormat,
) -> Result<BTreeMap<String, String>> {
    let mut spellings = BTreeMap::new();

    for line in contents.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let name = match format {
            config::FileFormat::Toml => {
                let line = trimmed.trim_start();
                if let Some(table) = line.strip_prefix('[') {
                    if table.starts_with('[') {
                        continue;
                    }
                    table.split(['.', ']']).next()
                } else if line.contains('=') {
                    line.split('=')
                        .next()
                        .filter(|key| key.contains('.'))
                        .and_then(|key| key.split('.').next())
                } else {
                    None
                }
            }
            _ => {
                if trimmed.starts_with([' ', '\t', '-']) || trimmed == "---" {
                    continue;
                }
                trimmed.split_once(':').map(|(key, _)| key)
            }
        };

        let Some(name) = name.map(|n| n.trim().trim_matches(['"', '\''])) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let lower = name.to_lowercase();
        match spellings.get(&lower) {
            Some(existing) if existing != name => {
                return Err(config_error(format!(
                    "sections '{}' and '{}' differ only in case",
                    existing, name
                )));
            }
            Some(_) => {}
            None => {
                spellings.insert(lower, name.to_string());
            }
        }
    }

    Ok(spellings)
}
