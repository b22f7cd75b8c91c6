//! Source parser for homeledger
//!
//! Turns bank-exported delimited text or pasted JSON into normalized
//! transaction candidates, counting pending rows and collecting rows that
//! need manual entry.

use std::sync::Arc;

pub mod error;
pub mod formats;
pub mod parser;
pub mod types;

pub use error::ParseError;
pub use formats::{find_format, ColumnMap, SourceFormat, FORMATS};
pub use parser::{parse_amount, split_fields, StructuredParser, TabularParser};
pub use types::{
    AmountPolicy, AuditRow, ParsedSource, RowError, RowErrorKind, SourceKind, TransactionCandidate,
};

// ==================== Parser Trait ====================

/// Parser reference type
pub type ParserRef = Arc<dyn SourceParser>;

/// Trait for submission parsers
pub trait SourceParser: Send + Sync {
    /// Parse a submitted payload
    fn parse(&self, payload: &str, kind: &SourceKind) -> Result<ParsedSource, ParseError>;
}

/// Default parser: registered tabular formats plus structured JSON
#[derive(Debug, Default, Clone)]
pub struct DefaultSourceParser {
    pub amount_policy: AmountPolicy,
}

impl DefaultSourceParser {
    pub fn new(amount_policy: AmountPolicy) -> Self {
        Self { amount_policy }
    }
}

impl SourceParser for DefaultSourceParser {
    fn parse(&self, payload: &str, kind: &SourceKind) -> Result<ParsedSource, ParseError> {
        match kind {
            SourceKind::Tabular { format: Some(tag) } => {
                TabularParser::parse_with_tag(payload, tag, self.amount_policy)
            }
            SourceKind::Tabular { format: None } => TabularParser::parse_detect(payload, self.amount_policy),
            SourceKind::Structured => StructuredParser::parse(payload, self.amount_policy),
        }
    }
}
