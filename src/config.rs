use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Storage
    pub output_dir: PathBuf,
    pub public_asset_prefix: String,

    // Archive jobs
    pub http_timeout: Duration,
    pub asset_concurrency: usize,
    pub job_deadline: Option<Duration>,
    pub extraction_mode: ExtractionMode,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
}

/// How asset references are discovered in archived markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Walk the parsed document tree
    Dom,
    /// Scan the raw text with tag patterns
    Regex,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let job_deadline = match parse_env_u64("JOB_DEADLINE_SECS", 0)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            // Database
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/archive.sqlite")),

            // Storage
            output_dir: PathBuf::from(env_or_default("OUTPUT_DIR", "output")),
            public_asset_prefix: env_or_default("PUBLIC_ASSET_PREFIX", "/static"),

            // Archive jobs
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
            asset_concurrency: parse_env_usize("ASSET_CONCURRENCY", 4)?,
            job_deadline,
            extraction_mode: parse_extraction_mode(&env_or_default("EXTRACTION_MODE", "dom"))?,

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
        })
    }

    /// Defaults suitable for tests; callers override the paths they need.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from("./data/test.sqlite"),
            output_dir: PathBuf::from("output"),
            public_asset_prefix: "/static".to_string(),
            http_timeout: Duration::from_secs(5),
            asset_concurrency: 4,
            job_deadline: None,
            extraction_mode: ExtractionMode::Dom,
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asset_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ASSET_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "HTTP_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !self.public_asset_prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                name: "PUBLIC_ASSET_PREFIX".to_string(),
                message: format!("must start with '/', got '{}'", self.public_asset_prefix),
            });
        }
        if self.public_asset_prefix.trim_end_matches('/').is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "PUBLIC_ASSET_PREFIX".to_string(),
                message: "cannot be the site root".to_string(),
            });
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "OUTPUT_DIR".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_extraction_mode(value: &str) -> Result<ExtractionMode, ConfigError> {
    match value.to_lowercase().as_str() {
        "dom" => Ok(ExtractionMode::Dom),
        "regex" => Ok(ExtractionMode::Regex),
        _ => Err(ConfigError::InvalidValue {
            name: "EXTRACTION_MODE".to_string(),
            message: format!("must be 'dom' or 'regex', got '{value}'"),
        }),
    }
}
