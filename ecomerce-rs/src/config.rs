use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::store::{StoreLocation, StoreUriError};

#[derive(Debug, Parser)]
#[command(
    name = "ecomerce-rs",
    version,
    about = "Session-authenticated product catalog server"
)]
pub struct Cli {
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    /// `memory://` or `file://<path>`
    #[arg(long, value_name = "URI")]
    pub store_uri: Option<String>,

    #[arg(long, value_name = "FILE")]
    pub users_file: Option<PathBuf>,

    /// JSON array of products loaded into an empty collection at startup.
    #[arg(long, value_name = "FILE")]
    pub seed_file: Option<PathBuf>,

    /// Session lifetime, e.g. `60s` or `30m`.
    #[arg(long, value_name = "DURATION")]
    pub session_ttl: Option<String>,

    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Longest accepted session lifetime.
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub store: StoreConfig,
    pub users_file: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub session_ttl: Duration,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: StoreLocation,
    pub database: String,
    pub collection: String,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// One request is replenished every `period_ms`.
    pub period_ms: u64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            period_ms: 10,
            burst: 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for env var {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid duration for {key}: {value}")]
    InvalidDuration { key: String, value: String },
    #[error(transparent)]
    StoreUri(#[from] StoreUriError),
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind: Option<SocketAddr>,
    port: Option<u16>,
    store_uri: Option<String>,
    database: Option<String>,
    collection: Option<String>,
    pool_size: Option<usize>,
    acquire_timeout: Option<String>,
    users_file: Option<PathBuf>,
    seed_file: Option<PathBuf>,
    session_ttl: Option<String>,
    rate_limit_period_ms: Option<u64>,
    rate_limit_burst: Option<u32>,
}

/// Environment values, read once so the merge logic stays pure.
#[derive(Debug, Default)]
struct EnvConfig {
    port: Option<u16>,
    store_uri: Option<String>,
    /// `MONGODB_URI` from older `.env` files. Used only when it names a supported store.
    legacy_store_uri: Option<String>,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let from_file = read_file_config(cli.config.as_deref())?;
        let from_env = read_env_config()?;
        Self::merge(cli, from_file, from_env)
    }

    /// Precedence: command line, then environment, then config file, then defaults.
    fn merge(cli: Cli, file: FileConfig, env: EnvConfig) -> Result<Self, ConfigError> {
        let mut bind = cli
            .bind
            .or(file.bind)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));
        if cli.bind.is_none() {
            if let Some(port) = env.port.or(file.port) {
                bind.set_port(port);
            }
        }

        let legacy_store_uri = env
            .legacy_store_uri
            .filter(|uri| match StoreLocation::parse(uri) {
                Ok(_) => true,
                Err(_) => {
                    warn!(
                        value = %uri,
                        "MONGODB_URI is set but not a supported store; use STORE_URI=memory:// or file://<path>"
                    );
                    false
                }
            });
        let store_uri = cli
            .store_uri
            .or(env.store_uri)
            .or(legacy_store_uri)
            .or(file.store_uri)
            .unwrap_or_else(|| String::from("memory://"));

        let acquire_timeout = parse_duration(
            "acquire_timeout",
            file.acquire_timeout.as_deref().unwrap_or("5s"),
        )?;
        let session_ttl = parse_duration(
            "session_ttl",
            cli.session_ttl
                .as_deref()
                .or(file.session_ttl.as_deref())
                .unwrap_or("60s"),
        )?;
        if session_ttl > MAX_SESSION_TTL {
            return Err(ConfigError::InvalidDuration {
                key: String::from("session_ttl"),
                value: format!(
                    "{} (maximum is {})",
                    humantime::format_duration(session_ttl),
                    humantime::format_duration(MAX_SESSION_TTL)
                ),
            });
        }

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            period_ms: file
                .rate_limit_period_ms
                .unwrap_or(defaults.period_ms)
                .max(1),
            burst: file.rate_limit_burst.unwrap_or(defaults.burst).max(1),
        };

        Ok(Self {
            bind,
            store: StoreConfig {
                location: StoreLocation::parse(&store_uri)?,
                database: file.database.unwrap_or_else(|| String::from("Ecomerce")),
                collection: file.collection.unwrap_or_else(|| String::from("productos")),
                pool_size: file.pool_size.unwrap_or(8).max(1),
                acquire_timeout,
            },
            users_file: cli.users_file.or(file.users_file),
            seed_file: cli.seed_file.or(file.seed_file),
            session_ttl,
            rate_limit,
        })
    }
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn read_env_config() -> Result<EnvConfig, ConfigError> {
    let port = match read_env("PORT")? {
        Some(raw) => Some(parse_port("PORT", &raw)?),
        None => None,
    };
    Ok(EnvConfig {
        port,
        store_uri: read_env("STORE_URI")?,
        legacy_store_uri: read_env("MONGODB_URI")?,
    })
}

fn read_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnv {
            key: String::from(key),
            value: String::from("<non-unicode>"),
        }),
    }
}

fn parse_port(key: &str, raw: &str) -> Result<u16, ConfigError> {
    raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnv {
        key: String::from(key),
        value: String::from(raw),
    })
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|_| ConfigError::InvalidDuration {
        key: String::from(key),
        value: String::from(raw),
    })
}
