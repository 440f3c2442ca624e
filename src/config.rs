use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_METADATA_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BLOB_MAX_BYTES: usize = 20 * 1024 * 1024;

/// Tier switches and time budgets for the storage orchestrator.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub blob_store_enabled: bool,
    pub drive_enabled: bool,
    pub metadata_timeout: Duration,
    pub blob_max_bytes: usize,
    pub pointer_cache_ttl: Option<Duration>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_store_enabled: true,
            drive_enabled: false,
            metadata_timeout: Duration::from_millis(DEFAULT_METADATA_TIMEOUT_MS),
            blob_max_bytes: DEFAULT_BLOB_MAX_BYTES,
            pointer_cache_ttl: Some(Duration::from_secs(300)),
        }
    }
}

impl StorageConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let blob_store_enabled = parse_var("BLOB_STORE_ENABLED")?.unwrap_or(defaults.blob_store_enabled);
        let drive_enabled = parse_var("DRIVE_FALLBACK_ENABLED")?.unwrap_or(defaults.drive_enabled);
        let metadata_timeout = parse_var::<u64>("METADATA_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.metadata_timeout);
        let blob_max_bytes = parse_var("BLOB_MAX_BYTES")?.unwrap_or(defaults.blob_max_bytes);
        let pointer_cache_ttl = match parse_var::<u64>("POINTER_CACHE_TTL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.pointer_cache_ttl,
        };

        Ok(Self {
            blob_store_enabled,
            drive_enabled,
            metadata_timeout,
            blob_max_bytes,
            pointer_cache_ttl,
        })
    }
}

/// Process-level settings for the binary.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub registry_database_url: String,
    /// `None` disables the background reconciliation sweep.
    pub reconcile_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid BIND_ADDR: {}", e)))?;
        let registry_database_url = env::var("REGISTRY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://local_registry.db".to_string());
        let reconcile_interval = match parse_var::<u64>("RECONCILE_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(60)),
        };

        Ok(Self {
            bind_addr,
            registry_database_url,
            reconcile_interval,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>, AppError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
