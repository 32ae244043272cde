//! # Veeam AHV Exporter
//!
//! A Prometheus metrics exporter for the Veeam Backup for Nutanix AHV proxy REST API.
//!
//! ## Overview
//!
//! Every scrape of `/metrics?section=<name>` logs in to the proxy configured
//! for that section, fetches its current state and renders it as gauges:
//!
//! - VM protection summary (protected, unprotected, snapshot protected, total)
//! - Job count, schedule state, next/last run and last run status per job
//! - Per-VM size, restore point count and last successful protection
//!
//! Several incompatible proxy API versions are supported through declarative
//! mapping tables (see [`schema`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use veeam_ahv_exporter::{config::{ConnectionProfile, ProfileRegistry}, server::start_server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load connection profiles
//!     let fallback = ConnectionProfile::new("https://10.0.0.5:8100", "veeam", "veeam");
//!     let profiles = ProfileRegistry::load(Some("config/exporter.yml"), fallback)?;
//!
//!     // Start HTTP server
//!     start_server("0.0.0.0:9760", profiles).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`client`] - Proxy session client (login, authenticated requests)
//! - [`config`] - Connection profiles and exporter settings
//! - [`convert`] - Number and date coercion of proxy JSON values
//! - [`error`] - Error types and handling
//! - [`metrics`] - Prometheus metrics definitions and collection
//! - [`schema`] - Per API version endpoint and field mapping tables
//! - [`server`] - HTTP server for exposing metrics

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod metrics;
pub mod schema;
pub mod server;

pub use error::{ExporterError, Result};
