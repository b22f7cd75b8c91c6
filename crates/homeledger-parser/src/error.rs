//! Error types for homeledger-parser

use thiserror::Error;

/// Fatal parse failures. Any of these rejects the whole submission before a
/// single row is imported; per-row problems are reported as [`RowError`]s.
///
/// [`RowError`]: crate::types::RowError
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Format error: {message}")]
    Format { message: String },

    #[error("Unknown source format: {tag}")]
    UnknownFormat { tag: String },

    #[error("Source is empty")]
    EmptySource,
}
