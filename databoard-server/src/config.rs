//! Server configuration

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use clap::{ArgAction, Parser};
use databoard::dashboard::StoragePolicy;
use databoard::dashboard::validation::ValidationConfig;
use databoard::sync::SyncConfig;
use rustls::pki_types::CertificateDer;

/// Databoard backend server
#[derive(Parser, Clone, Debug)]
#[command(name = "databoard-server")]
#[command(about = "Channel search, curve data and dashboard storage for archiver dashboards")]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "DATABOARD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "DATABOARD_PORT", default_value = "8080")]
    pub port: u16,

    /// SQLite database path, or `memory` for a non-persistent store
    #[arg(long, env = "DATABOARD_STORE", default_value = "databoard.db")]
    pub store: String,

    /// Base URL of the archiver data API
    #[arg(long, env = "DAQBUF_DEFAULT_URL", default_value = "https://data-api.psi.ch/api/4")]
    pub archiver_url: String,

    /// Storage capacity for all dashboards, in bytes
    #[arg(long, env = "DASHBOARD_MAX_TOTAL_STORAGE_BYTES", default_value_t = 1024 * 1024 * 1024)]
    pub max_total_storage_bytes: u64,

    /// Fraction of capacity at which eviction starts
    #[arg(long, env = "DASHBOARD_EVICTION_THRESHOLD", default_value_t = 0.95)]
    pub eviction_threshold: f64,

    /// Fraction of capacity eviction reduces storage to
    #[arg(long, env = "DASHBOARD_TARGET_UTILIZATION", default_value_t = 0.60)]
    pub target_utilization: f64,

    /// Largest accepted single dashboard, in bytes
    #[arg(long, env = "DASHBOARD_MAX_SINGLE_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_single_bytes: u64,

    /// Dashboard JSON schema, as an http(s) URL or a file path
    #[arg(long, env = "DASHBOARD_SCHEMA_SOURCE")]
    pub schema_source: Option<String>,

    #[arg(long, env = "DASHBOARD_VALIDATE_SCHEMA", default_value_t = true, action = ArgAction::Set)]
    pub validate_schema: bool,

    #[arg(long, env = "DASHBOARD_VALIDATE_SIZE", default_value_t = true, action = ArgAction::Set)]
    pub validate_size: bool,

    /// Seconds between scheduled catalog resyncs
    #[arg(long, env = "CATALOG_RESYNC_INTERVAL_SECS", default_value = "604800")]
    pub resync_interval: u64,

    /// Seconds to wait before retrying a failed resync
    #[arg(long, env = "CATALOG_RESYNC_BACKOFF_SECS", default_value = "30")]
    pub resync_backoff: u64,

    /// Longest search text still answered from the catalog cache
    #[arg(long, env = "CATALOG_CACHED_QUERY_MAX_LEN", default_value = "4")]
    pub cached_query_max_len: usize,

    /// Seconds background tasks get to stop on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "5")]
    pub shutdown_grace: u64,

    /// TLS certificate path (PEM format)
    #[arg(long)]
    pub tls_cert: Option<String>,

    /// TLS private key path (PEM format)
    #[arg(long)]
    pub tls_key: Option<String>,
}

impl Config {
    pub fn storage_policy(&self) -> StoragePolicy {
        StoragePolicy {
            capacity_bytes: self.max_total_storage_bytes,
            eviction_threshold: self.eviction_threshold,
            target_utilization: self.target_utilization,
        }
    }

    pub fn validation(&self) -> ValidationConfig {
        ValidationConfig {
            validate_schema: self.validate_schema,
            validate_size: self.validate_size,
            max_document_bytes: self.max_single_bytes,
        }
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_secs(self.resync_interval),
            backoff: Duration::from_secs(self.resync_backoff),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    /// Request bodies may exceed the dashboard limit so oversized
    /// dashboards get a size error instead of a transport rejection
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_single_bytes.saturating_mul(2)).unwrap_or(usize::MAX)
    }

    /// Reject settings the eviction sweep cannot work with
    pub fn check(&self) -> anyhow::Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.eviction_threshold) || !unit.contains(&self.target_utilization) {
            anyhow::bail!("eviction threshold and target utilization must be within 0.0..=1.0");
        }
        if self.target_utilization >= self.eviction_threshold {
            anyhow::bail!(
                "target utilization ({}) must be below the eviction threshold ({})",
                self.target_utilization,
                self.eviction_threshold
            );
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            anyhow::bail!("--tls-cert and --tls-key must be given together");
        }
        Ok(())
    }
}

/// Load TLS configuration from cert and key files
pub fn load_tls_config(cert_path: &str, key_path: &str) -> anyhow::Result<RustlsConfig> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let mut key_reader = BufReader::new(File::open(key_path)?);

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {}", key_path))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(RustlsConfig::from_config(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = Config::parse_from(["databoard-server"]);
        let policy = config.storage_policy();
        assert_eq!(policy.capacity_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.validation().max_document_bytes, 10 * 1024 * 1024);
        assert_eq!(config.sync().backoff, Duration::from_secs(30));
        assert!(config.check().is_ok());
    }

    #[test]
    fn rejects_target_above_threshold() {
        let config = Config::parse_from([
            "databoard-server",
            "--eviction-threshold",
            "0.5",
            "--target-utilization",
            "0.8",
        ]);
        assert!(config.check().is_err());
    }

    #[test]
    fn validation_flags_accept_explicit_false() {
        let config = Config::parse_from(["databoard-server", "--validate-schema", "false"]);
        assert!(!config.validation().validate_schema);
        assert!(config.validation().validate_size);
    }
}
