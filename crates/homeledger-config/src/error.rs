//! Errors raised while loading or validating homeledger.yaml

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable code for each way loading a configuration can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigErrorCode {
    FileNotFound,
    InvalidYaml,
    InvalidValue,
    IoError,
}

impl ConfigErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::InvalidYaml => "INVALID_YAML",
            Self::InvalidValue => "INVALID_VALUE",
            Self::IoError => "IO_ERROR",
        }
    }
}

impl std::fmt::Display for ConfigErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration failure rendered for the terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigErrorDetails {
    pub code: ConfigErrorCode,
    pub message: String,
    /// Dotted key of the offending setting, e.g. `currency.rate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl ConfigErrorDetails {
    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

impl std::fmt::Display for ConfigErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(field) = &self.field {
            write!(f, "\n  setting: {}", field)?;
        }
        for hint in &self.hints {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration is not valid YAML: {message}")]
    InvalidYaml { message: String },

    #[error("Bad value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Could not read {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn code(&self) -> ConfigErrorCode {
        match self {
            Self::FileNotFound { .. } => ConfigErrorCode::FileNotFound,
            Self::InvalidYaml { .. } => ConfigErrorCode::InvalidYaml,
            Self::InvalidValue { .. } => ConfigErrorCode::InvalidValue,
            Self::IoError { .. } => ConfigErrorCode::IoError,
        }
    }

    /// Code, message and hints for printing before exit
    pub fn to_details(&self) -> ConfigErrorDetails {
        let details = ConfigErrorDetails {
            code: self.code(),
            message: self.to_string(),
            field: None,
            hints: Vec::new(),
        };

        match self {
            Self::FileNotFound { .. } => details
                .hint("Use --config to point at an existing homeledger.yaml.")
                .hint("Run `homeledger init-config` to print a default configuration."),
            Self::InvalidYaml { .. } => {
                details.hint("Compare against the output of `homeledger init-config`.")
            }
            Self::InvalidValue { field, reason } => ConfigErrorDetails {
                field: Some(field.clone()),
                ..details
            }
            .hint(reason.clone()),
            Self::IoError { .. } => details,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
