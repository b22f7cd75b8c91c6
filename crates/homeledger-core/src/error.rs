//! Error types for homeledger-core
//!
//! Error codes, severities and suggestion-bearing details for everything the
//! import pipeline can run into. The orchestrator never lets these escape an
//! import; they end up in the report instead.

use thiserror::Error;
use serde::{Deserialize, Serialize};

use homeledger_parser::ParseError;

use crate::store::StoreError;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Required columns absent, unreadable payload
    FormatError,
    /// A single row could not be read
    RowParseError,
    /// A chunk insert failed
    PersistenceError,
    /// The store's uniqueness constraint rejected a row
    DuplicateViolation,
    /// Store unreachable or query failed
    StoreError,
    /// Batch not found
    BatchNotFound,
    /// Operation not allowed in the current state
    InvalidState,
    /// Stored rows could not be written out
    ExportError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::FormatError => write!(f, "FORMAT_ERROR"),
            ErrorCode::RowParseError => write!(f, "ROW_PARSE_ERROR"),
            ErrorCode::PersistenceError => write!(f, "PERSISTENCE_ERROR"),
            ErrorCode::DuplicateViolation => write!(f, "DUPLICATE_VIOLATION"),
            ErrorCode::StoreError => write!(f, "STORE_ERROR"),
            ErrorCode::BatchNotFound => write!(f, "BATCH_NOT_FOUND"),
            ErrorCode::InvalidState => write!(f, "INVALID_STATE"),
            ErrorCode::ExportError => write!(f, "EXPORT_ERROR"),
        }
    }
}

/// Detailed error information for reports and API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Suggestions for resolution
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ErrorDetails {
    /// Create a new error detail
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            details: None,
            suggestions: vec![],
        }
    }

    /// Add detail information
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.details = Some(detail);
        self
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, "\nDetails: {}", details)?;
        }
        if !self.suggestions.is_empty() {
            write!(f, "\nSuggestions:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n  - {}", suggestion)?;
            }
        }
        Ok(())
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational
    Info,
    /// Warning - operation may be affected
    Warning,
    /// Error - operation failed
    Error,
    /// Critical - application may be unstable
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "info"),
            ErrorSeverity::Warning => write!(f, "warning"),
            ErrorSeverity::Error => write!(f, "error"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Main error type for homeledger-core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Format error: {message}")]
    Format { message: String },

    #[error("Row {row} could not be parsed: {message}")]
    RowParse { row: usize, message: String },

    #[error("Chunk {chunk} ({rows} rows) failed to persist: {message}")]
    Persistence { chunk: usize, rows: usize, message: String },

    #[error("Duplicate fingerprint {fingerprint} for tenant {tenant_id}")]
    DuplicateViolation { tenant_id: String, fingerprint: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Batch not found: {batch_id}")]
    BatchNotFound { batch_id: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Export failed: {message}")]
    Export { message: String },
}

impl CoreError {
    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Format { .. } => ErrorCode::FormatError,
            CoreError::RowParse { .. } => ErrorCode::RowParseError,
            CoreError::Persistence { .. } => ErrorCode::PersistenceError,
            CoreError::DuplicateViolation { .. } => ErrorCode::DuplicateViolation,
            CoreError::Store { .. } => ErrorCode::StoreError,
            CoreError::BatchNotFound { .. } => ErrorCode::BatchNotFound,
            CoreError::InvalidState { .. } => ErrorCode::InvalidState,
            CoreError::Export { .. } => ErrorCode::ExportError,
        }
    }

    /// Get the severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoreError::Format { .. } => ErrorSeverity::Error,
            CoreError::RowParse { .. } => ErrorSeverity::Warning,
            CoreError::Persistence { .. } => ErrorSeverity::Error,
            CoreError::DuplicateViolation { .. } => ErrorSeverity::Info,
            CoreError::Store { .. } => ErrorSeverity::Error,
            CoreError::BatchNotFound { .. } => ErrorSeverity::Info,
            CoreError::InvalidState { .. } => ErrorSeverity::Warning,
            CoreError::Export { .. } => ErrorSeverity::Error,
        }
    }

    /// Whether the whole submission was aborted
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Format { .. } | CoreError::Store { .. })
    }

    /// Convert to detailed error info
    pub fn to_details(&self) -> ErrorDetails {
        let mut details = ErrorDetails::new(self.code(), self.to_string());

        match self {
            CoreError::Format { .. } => {
                details = details.with_suggestion(
                    "Check that the export was made with one of the supported bank formats.".to_string()
                );
                details = details.with_suggestion(
                    "Submit without a format tag to let the header be detected.".to_string()
                );
            }
            CoreError::RowParse { row, .. } => {
                details = details.with_detail(serde_json::json!({ "row": row }));
                details = details.with_suggestion("Enter this transaction manually.".to_string());
            }
            CoreError::Persistence { chunk, rows, .. } => {
                details = details.with_detail(serde_json::json!({ "chunk": chunk, "rows": rows }));
                details = details.with_suggestion(
                    "Re-submit the same file; rows already stored are skipped.".to_string()
                );
            }
            CoreError::DuplicateViolation { fingerprint, .. } => {
                details = details.with_detail(serde_json::json!({ "fingerprint": fingerprint }));
            }
            CoreError::InvalidState { .. } => {
                details = details.with_suggestion(
                    "Only staged batches can be undone or confirmed.".to_string()
                );
            }
            _ => {}
        }

        details
    }
}

/// Result type with CoreError
pub type CoreResult<T> = Result<T, CoreError>;

impl From<ParseError> for CoreError {
    fn from(error: ParseError) -> Self {
        CoreError::Format { message: error.to_string() }
    }
}

impl From<StoreError> for CoreError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::UniqueViolation { tenant_id, fingerprint } => {
                CoreError::DuplicateViolation { tenant_id, fingerprint }
            }
            other => CoreError::Store { message: other.to_string() },
        }
    }
}

impl From<csv::Error> for CoreError {
    fn from(error: csv::Error) -> Self {
        CoreError::Export { message: error.to_string() }
    }
}

/// Error context for reporting
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Tenant the operation runs for
    pub tenant_id: Option<String>,
    /// Batch being imported
    pub batch_id: Option<String>,
    /// Operation being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: &str) -> Self {
        Self {
            tenant_id: None,
            batch_id: None,
            operation: operation.to_string(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn with_batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }
}

/// Error logger trait
pub trait ErrorLogger: Send + Sync {
    /// Log an error
    fn log_error(&self, error: &CoreError, context: &ErrorContext);
    /// Log a warning
    fn log_warning(&self, message: &str, context: &ErrorContext);
}

/// Default error logger using log crate
#[derive(Default)]
pub struct DefaultErrorLogger;

impl ErrorLogger for DefaultErrorLogger {
    fn log_error(&self, error: &CoreError, context: &ErrorContext) {
        let level = match error.severity() {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error | ErrorSeverity::Critical => log::Level::Error,
        };
        log::log!(
            target: "homeledger::error",
            level,
            "[{}] {} - Operation: {} - Tenant: {:?} - Batch: {:?}",
            error.code(),
            error,
            context.operation,
            context.tenant_id,
            context.batch_id
        );
    }

    fn log_warning(&self, message: &str, context: &ErrorContext) {
        log::warn!(
            target: "homeledger::error",
            "WARNING: {} - Operation: {} - Tenant: {:?} - Batch: {:?}",
            message,
            context.operation,
            context.tenant_id,
            context.batch_id
        );
    }
}

// ==================== Tests ====================
