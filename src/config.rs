use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            alerting: AlertingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_site_root")]
    pub site_root: String,
    #[serde(default = "default_ping_endpoint")]
    pub ping_endpoint: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Used to derive badge fingerprints; override in production so
    /// badge URLs aren't guessable across deployments.
    #[serde(default = "default_fingerprint_secret")]
    pub fingerprint_secret: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            site_root: default_site_root(),
            ping_endpoint: default_ping_endpoint(),
            log_level: default_log_level(),
            fingerprint_secret: default_fingerprint_secret(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_site_root() -> String {
    "http://localhost:8000".to_string()
}
fn default_ping_endpoint() -> String {
    "http://localhost:8000/ping/".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_fingerprint_secret() -> String {
    "change-me-in-production".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> String {
    "heartbox.db".to_string()
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_nag_period")]
    pub nag_period: String,
    #[serde(default = "default_flip_retention")]
    pub flip_retention: String,
    #[serde(default = "default_lock_stale_after")]
    pub lock_stale_after: String,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            tick_interval: default_tick_interval(),
            batch_size: default_batch_size(),
            nag_period: default_nag_period(),
            flip_retention: default_flip_retention(),
            lock_stale_after: default_lock_stale_after(),
        }
    }
}

fn default_num_workers() -> u32 {
    10
}
fn default_tick_interval() -> String {
    "2s".to_string()
}
fn default_batch_size() -> u32 {
    100
}
fn default_nag_period() -> String {
    "1h".to_string()
}
fn default_flip_retention() -> String {
    "93d".to_string()
}
fn default_lock_stale_after() -> String {
    "5m".to_string()
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.database.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.core.data_dir.join(db_path)
        }
    }

    pub fn tick_interval(&self) -> Result<std::time::Duration> {
        humantime::parse_duration(&self.alerting.tick_interval).context("alerting.tick_interval")
    }

    pub fn nag_period(&self) -> Result<chrono::Duration> {
        let d = humantime::parse_duration(&self.alerting.nag_period).context("alerting.nag_period")?;
        chrono::Duration::from_std(d).context("alerting.nag_period overflow")
    }

    pub fn flip_retention(&self) -> Result<chrono::Duration> {
        let d = humantime::parse_duration(&self.alerting.flip_retention).context("alerting.flip_retention")?;
        chrono::Duration::from_std(d).context("alerting.flip_retention overflow")
    }

    pub fn lock_stale_after(&self) -> Result<chrono::Duration> {
        let d = humantime::parse_duration(&self.alerting.lock_stale_after).context("alerting.lock_stale_after")?;
        chrono::Duration::from_std(d).context("alerting.lock_stale_after overflow")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    humantime::parse_duration(&config.alerting.tick_interval)
        .map_err(|e| ConfigError::Validation(format!("alerting.tick_interval: {e}")))?;
    humantime::parse_duration(&config.alerting.nag_period)
        .map_err(|e| ConfigError::Validation(format!("alerting.nag_period: {e}")))?;
    humantime::parse_duration(&config.alerting.flip_retention)
        .map_err(|e| ConfigError::Validation(format!("alerting.flip_retention: {e}")))?;
    humantime::parse_duration(&config.alerting.lock_stale_after)
        .map_err(|e| ConfigError::Validation(format!("alerting.lock_stale_after: {e}")))?;

    if config.alerting.num_workers == 0 {
        return Err(ConfigError::Validation("alerting.num_workers must be at least 1".to_string()).into());
    }
    if config.alerting.batch_size == 0 {
        return Err(ConfigError::Validation("alerting.batch_size must be at least 1".to_string()).into());
    }
    config
        .server
        .bind_addr
        .parse::<std::net::SocketAddr>()
        .map_err(|e| ConfigError::Validation(format!("server.bind_addr: {e}")))?;

    Ok(())
}
