//! Service configuration.
//!
//! Layered per the spec's configuration surface: defaults, then an optional
//! TOML file, then environment overrides. Mirrors the teacher's
//! `performance::config::PerfConfig` load/from_env pattern.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub liquidation: LiquidationConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_source")]
    pub source: String,
}
fn default_db_source() -> String {
    "trading_core.db".to_string()
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { source: default_db_source() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}
fn default_grpc_port() -> u16 {
    50051
}
fn default_http_port() -> u16 {
    8080
}
impl Default for ServerConfig {
    fn default() -> Self {
        Self { grpc_port: default_grpc_port(), http_port: default_http_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".to_string()
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

/// Downstream targets keyed by collaborator name (`matching_engine`,
/// `market_data`, `account_client`, `position_client`, ...). Out-of-scope
/// collaborators are addressed only by name here; dialing them is left to
/// the RPC client implementations the spec treats as external.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(flatten)]
    pub targets: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate")]
    pub rate: u32,
}
fn default_rate() -> u32 {
    50
}
impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rate: default_rate() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    #[serde(default = "default_liquidation_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_mm_threshold")]
    pub mm_threshold: f64,
}
fn default_liquidation_interval() -> u64 {
    10
}
fn default_mm_threshold() -> f64 {
    1.10
}
impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_liquidation_interval(),
            mm_threshold: default_mm_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,
}
fn default_batch_size() -> u32 {
    100
}
fn default_retention_days() -> u32 {
    7
}
fn default_dispatch_interval() -> u64 {
    2
}
impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retention_days: default_retention_days(),
            dispatch_interval_secs: default_dispatch_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}
fn default_jwt_secret() -> String {
    "dev-insecure-secret-change-me".to_string()
}
impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: default_jwt_secret() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
            services: ServicesConfig::default(),
            rate_limit: RateLimitConfig::default(),
            liquidation: LiquidationConfig::default(),
            outbox: OutboxConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults if absent.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(_) => {
                tracing::debug!(
                    path = %path.as_ref().display(),
                    "no config file found, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Load from `CONFIG_PATH` (default `config.toml`), then apply
    /// `TRADECORE_*` environment overrides for the handful of values
    /// operators commonly need to override without a file.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        let mut cfg = Self::load(&path)?;

        if let Ok(v) = std::env::var("TRADECORE_DATABASE__SOURCE") {
            cfg.database.source = v;
        }
        if let Ok(v) = std::env::var("TRADECORE_SERVER__HTTP_PORT") {
            if let Ok(p) = v.parse() {
                cfg.server.http_port = p;
            }
        }
        if let Ok(v) = std::env::var("TRADECORE_LOG__LEVEL") {
            cfg.log.level = v;
        }
        if let Ok(v) = std::env::var("TRADECORE_RATE_LIMIT__RATE") {
            if let Ok(r) = v.parse() {
                cfg.rate_limit.rate = r;
            }
        }
        if let Ok(v) = std::env::var("TRADECORE_LIQUIDATION__MM_THRESHOLD") {
            if let Ok(t) = v.parse() {
                cfg.liquidation.mm_threshold = t;
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.server.http_port, 8080);
        assert_eq!(cfg.liquidation.mm_threshold, 1.10);
        assert_eq!(cfg.outbox.batch_size, 100);
    }

    #[test]
    fn loads_missing_file_as_default() {
        let cfg = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(cfg.database.source, "trading_core.db");
    }

    #[test]
    fn parses_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            source = "postgres://example"

            [liquidation]
            interval_secs = 5
            mm_threshold = 1.25
            "#,
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.database.source, "postgres://example");
        assert_eq!(cfg.liquidation.interval_secs, 5);
        assert_eq!(cfg.liquidation.mm_threshold, 1.25);
    }
}
