//! Configuration management for visidx
//!
//! Handles loading and validating TOML configuration. Every section has
//! defaults, so an empty file is a valid configuration that indexes into an
//! in-memory backend.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;

/// Index written to when no name is configured.
pub const DEFAULT_INDEX_NAME: &str = "workflow-visibility";

/// Printed in place of secrets when a configuration is rendered.
pub const REDACTED: &str = "[redacted]";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Visibility index every operation targets
    pub index_name: String,

    /// Batch processor settings
    pub processor: ProcessorConfig,

    /// Where bulk requests are sent
    pub backend: BackendConfig,

    /// Logging settings
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            processor: ProcessorConfig::default(),
            backend: BackendConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.index_name.trim().is_empty() {
            return Err(ConfigError::Invalid("index_name must not be empty".to_string()).into());
        }
        self.processor.validate()?;
        self.backend.validate()?;
        if self.logging.level.parse::<crate::logging::LogLevel>().is_err()
            && tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "logging.level {:?} is neither a level nor a filter directive",
                self.logging.level
            ))
            .into());
        }
        Ok(())
    }

    /// Render as TOML (used by `check-config`). Secrets are replaced by
    /// [`REDACTED`].
    pub fn to_toml_string(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.backend.redact();
        toml::to_string_pretty(&shown)
            .map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }
}

/// Batch processor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Batches committed concurrently
    pub num_workers: usize,

    /// Flush when a batch holds this many operations
    pub bulk_actions: usize,

    /// Flush when a batch's rendered body reaches this many bytes
    pub bulk_size_bytes: usize,

    /// Flush a non-empty batch at least this often
    pub flush_interval_ms: u64,

    /// Total attempts per operation, including the first
    pub max_attempts: u32,

    /// Backoff before the first retry
    pub initial_backoff_ms: u64,

    /// Backoff ceiling
    pub max_backoff_ms: u64,

    /// Distinct writes held at once, queued or in flight; later adds fail
    pub max_pending: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            bulk_actions: 1000,
            bulk_size_bytes: 16 * 1024 * 1024,
            flush_interval_ms: 1000,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            max_pending: 10_000,
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> {
            Err(ConfigError::Invalid(format!("processor.{msg}")).into())
        };
        if self.num_workers == 0 {
            return invalid("num_workers must be at least 1");
        }
        if self.bulk_actions == 0 {
            return invalid("bulk_actions must be at least 1");
        }
        if self.bulk_size_bytes == 0 {
            return invalid("bulk_size_bytes must be at least 1");
        }
        if self.flush_interval_ms == 0 {
            return invalid("flush_interval_ms must be at least 1");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return invalid("initial_backoff_ms must not exceed max_backoff_ms");
        }
        if self.max_pending == 0 {
            return invalid("max_pending must be at least 1");
        }
        Ok(())
    }
}

/// Search backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process versioned index
    #[default]
    Memory,

    /// HTTP bulk endpoint
    Http {
        /// Base URL; bulk requests go to `<url>/_bulk`
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

impl BackendConfig {
    fn redact(&mut self) {
        if let Self::Http {
            password: Some(password),
            ..
        } = self
        {
            *password = REDACTED.to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::Http {
                url,
                username,
                password,
                timeout_ms,
            } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid(format!(
                        "backend.url must be an http(s) URL, got {url:?}"
                    ))
                    .into());
                }
                if password.is_some() && username.is_none() {
                    return Err(ConfigError::Invalid(
                        "backend.password requires backend.username".to_string(),
                    )
                    .into());
                }
                if *timeout_ms == 0 {
                    return Err(
                        ConfigError::Invalid("backend.timeout_ms must be at least 1".to_string())
                            .into(),
                    );
                }
                Ok(())
            }
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.index_name, "workflow-visibility");
        assert_eq!(config.processor.bulk_actions, 1000);
        assert_eq!(config.processor.bulk_size_bytes, 16 * 1024 * 1024);
        assert_eq!(config.processor.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.backend, BackendConfig::Memory);
    }

    #[test]
    fn parses_http_backend_and_partial_sections() {
        let raw = r#"
index_name = "visibility-dev"

[processor]
num_workers = 4
bulk_actions = 50

[backend]
kind = "http"
url = "http://localhost:9200"
username = "elastic"
password = "changeme"

[logging]
level = "debug"
format = "json"
"#;
        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.index_name, "visibility-dev");
        assert_eq!(config.processor.num_workers, 4);
        assert_eq!(config.processor.bulk_actions, 50);
        assert_eq!(config.processor.max_attempts, 3);
        assert_eq!(
            config.backend,
            BackendConfig::Http {
                url: "http://localhost:9200".to_string(),
                username: Some("elastic".to_string()),
                password: Some("changeme".to_string()),
                timeout_ms: 30_000,
            }
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = Config::from_toml_str("[processor]\nnum_workers = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid(_))));
        assert!(err.to_string().contains("num_workers"));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let err = Config::from_toml_str(
            "[processor]\ninitial_backoff_ms = 10000\nmax_backoff_ms = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("initial_backoff_ms"));
    }

    #[test]
    fn rejects_non_http_url() {
        let err =
            Config::from_toml_str("[backend]\nkind = \"http\"\nurl = \"localhost:9200\"\n")
                .unwrap_err();
        assert_eq!(err.stage(), "config");
    }

    #[test]
    fn rejects_blank_index_name() {
        assert!(Config::from_toml_str("index_name = \"  \"\n").is_err());
    }

    #[test]
    fn parse_error_is_reported() {
        let err = Config::from_toml_str("[processor\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "index_name = \"from-file\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.index_name, "from-file");
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ReadFailed(_, _))));
    }

    #[test]
    fn toml_rendering_reparses() {
        let config = Config {
            backend: BackendConfig::Http {
                url: "https://search.internal:9200".to_string(),
                username: None,
                password: None,
                timeout_ms: 500,
            },
            ..Config::default()
        };
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn toml_rendering_redacts_password() {
        let config = Config {
            backend: BackendConfig::Http {
                url: "https://search.internal:9200".to_string(),
                username: Some("elastic".to_string()),
                password: Some("s3cret".to_string()),
                timeout_ms: 500,
            },
            ..Config::default()
        };
        let rendered = config.to_toml_string().unwrap();
        assert!(!rendered.contains("s3cret"), "secret leaked:\n{rendered}");
        assert!(rendered.contains(r#"password = "[redacted]""#));
        assert!(rendered.contains(r#"username = "elastic""#));
        // The source configuration keeps its credentials.
        assert!(matches!(
            config.backend,
            BackendConfig::Http { password: Some(ref p), .. } if p == "s3cret"
        ));
    }

    #[test]
    fn rejects_zero_max_pending() {
        let err = Config::from_toml_str("[processor]\nmax_pending = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_pending"));
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }
}
