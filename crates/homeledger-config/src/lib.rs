//! Configuration management for homeledger
//!
//! Loads and validates the YAML configuration: server binding, import
//! behaviour, currency conversion, per-category spending limits and logging.

pub mod error;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use error::{ConfigError, ConfigErrorCode, ConfigErrorDetails, ConfigResult};

// ==================== Configuration Types ====================

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8081
}

/// Import pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Rows written per store round trip
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Reject rows with unparseable amounts instead of importing them as zero
    #[serde(default)]
    pub strict_amounts: bool,
    /// Application name used in export file names
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Currency assumed for rows that do not carry one
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            strict_amounts: false,
            app_name: default_app_name(),
            default_currency: default_currency(),
        }
    }
}

fn default_chunk_size() -> usize {
    100
}

fn default_app_name() -> String {
    "homeledger".to_string()
}

fn default_currency() -> String {
    "EUR".to_string()
}

/// Currency conversion between the reference and the secondary currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// Currency in which category limits are expressed
    #[serde(default = "default_currency")]
    pub reference: String,
    /// The other household currency
    #[serde(default = "default_secondary")]
    pub secondary: String,
    /// Units of `secondary` per one unit of `reference`
    #[serde(default = "default_rate")]
    pub rate: Decimal,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            reference: default_currency(),
            secondary: default_secondary(),
            rate: default_rate(),
        }
    }
}

fn default_secondary() -> String {
    "USD".to_string()
}

fn default_rate() -> Decimal {
    Decimal::ONE
}

/// Which transactions get flagged once a category limit is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagMode {
    /// Never flag
    #[default]
    Off,
    /// Flag only the transaction that pushes spending past the limit
    Crossing,
    /// Flag the crossing transaction and every later one in the category
    AllAfter,
}

impl std::str::FromStr for FlagMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(FlagMode::Off),
            "crossing" => Ok(FlagMode::Crossing),
            "all_after" | "all-after" => Ok(FlagMode::AllAfter),
            _ => Err(format!("Invalid flag mode: {}", s)),
        }
    }
}

impl std::fmt::Display for FlagMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagMode::Off => write!(f, "off"),
            FlagMode::Crossing => write!(f, "crossing"),
            FlagMode::AllAfter => write!(f, "all_after"),
        }
    }
}

/// Spending cap for one category, in the reference currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryLimitConfig {
    pub limit: Decimal,
    #[serde(default)]
    pub mode: FlagMode,
}

/// Store settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON snapshot used by the CLI to keep the store between runs
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
    /// Category name -> limit
    #[serde(default)]
    pub limits: BTreeMap<String, CategoryLimitConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound { path: path.display().to_string() }
            } else {
                ConfigError::IoError { path: path.display().to_string(), source: e }
            }
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::InvalidYaml { message: e.to_string() })?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "Port must be greater than 0"));
        }

        if self.import.chunk_size == 0 {
            return Err(invalid("import.chunk_size", "Chunk size must be greater than 0"));
        }

        if self.currency.reference.trim().is_empty() {
            return Err(invalid("currency.reference", "Reference currency must not be empty"));
        }

        if self.currency.rate <= Decimal::ZERO {
            return Err(invalid("currency.rate", "Conversion rate must be positive"));
        }

        for (category, limit) in &self.limits {
            if limit.limit.is_sign_negative() {
                return Err(invalid(
                    &format!("limits.{}.limit", category),
                    "Limits must not be negative",
                ));
            }
        }

        Ok(())
    }

    /// Generate a default configuration file
    pub fn generate_default() -> &'static str {
        include_str!("../templates/default_config.yaml")
    }

    /// Socket address the API server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_is_valid() {
        let config = Config::from_yaml(Config::generate_default()).unwrap();
        assert_eq!(config.import.chunk_size, 100);
        assert_eq!(config.currency.reference, "EUR");
        assert_eq!(config.limits["dining"].mode, FlagMode::AllAfter);
        assert_eq!(config.limits["travel"].mode, FlagMode::Off);
        assert_eq!(config.limits["groceries"].limit, Decimal::from(800));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.server.port, 8081);
        assert!(!config.import.strict_amounts);
        assert!(config.limits.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = Config::from_yaml("import:\n  chunk_size: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "import.chunk_size"));
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let err = Config::from_yaml("currency:\n  rate: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "currency.rate"));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Config::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidYaml { .. }));
    }

    #[test]
    fn test_flag_mode_from_str() {
        assert_eq!("crossing".parse::<FlagMode>().unwrap(), FlagMode::Crossing);
        assert_eq!("ALL_AFTER".parse::<FlagMode>().unwrap(), FlagMode::AllAfter);
        assert!("sometimes".parse::<FlagMode>().is_err());
        assert_eq!(FlagMode::AllAfter.to_string(), "all_after");
    }

    #[test]
    fn test_flag_mode_defaults_to_off() {
        assert_eq!(FlagMode::default(), FlagMode::Off);
        let limit: CategoryLimitConfig = serde_yaml::from_str("limit: 120").unwrap();
        assert_eq!(limit.mode, FlagMode::Off);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/nonexistent/homeledger.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }
}
