//! Runtime configuration read from the environment.
//!
//! A `.env` file in the working directory is loaded first when present.

use std::{path::PathBuf, str::FromStr};
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:./catalog.db";
pub const DEFAULT_STORAGE_ROOT: &str = "./storage";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
/// 5 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
/// 16 MiB, enough for a maximum upload encoded as a data URL.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `DATABASE_URL`
    pub database_url: String,
    /// `STORAGE_ROOT`: directory blobs are written below.
    pub storage_root: PathBuf,
    /// `BIND_ADDR`
    pub bind_addr: String,
    /// `MAX_UPLOAD_BYTES`: largest accepted image upload.
    pub max_upload_bytes: usize,
    /// `MAX_BODY_BYTES`: largest accepted request body.
    pub max_body_bytes: usize,
    /// `STRICT_DATA_URLS`: reject data URLs whose payload does not decode
    /// instead of dropping the image.
    pub strict_data_urls: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            strict_data_urls: false,
        }
    }
}

impl AppConfig {
    /// Loads `.env` (if any) and reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup, falling back
    /// to defaults for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            storage_root: lookup("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            strict_data_urls: parse_or(&lookup, "STRICT_DATA_URLS", defaults.strict_data_urls)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
