//! Common types for the source parser

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What kind of payload was submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Bank-exported delimited text; `format` is a registered format tag,
    /// or `None` to detect it from the header row
    Tabular {
        #[serde(default)]
        format: Option<String>,
    },
    /// Pasted JSON array of transaction objects
    Structured,
}

impl SourceKind {
    pub fn tabular(format: &str) -> Self {
        SourceKind::Tabular { format: Some(format.to_string()) }
    }
}

/// How an amount cell that cannot be parsed is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AmountPolicy {
    /// Import the row with an amount of zero
    #[default]
    Lenient,
    /// Reject the row; it has to be entered manually
    Strict,
}

/// A normalized transaction read from a source, before fingerprinting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCandidate {
    /// 1-based row (line number for tabular text, element index for JSON)
    pub row: usize,
    pub date: NaiveDate,
    /// Negative = expense, positive = income
    pub amount: Decimal,
    pub description: String,
    pub category: Option<String>,
    pub payer: Option<String>,
    /// Row-level currency; the batch currency applies when absent
    pub currency: Option<String>,
    pub recurrence_key: Option<String>,
}

impl TransactionCandidate {
    pub fn is_expense(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }
}

/// Why a data row could not be imported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RowErrorKind {
    InvalidDate(String),
    InvalidAmount(String),
    Malformed(String),
}

impl std::fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowErrorKind::InvalidDate(v) => write!(f, "unrecognized date '{}'", v),
            RowErrorKind::InvalidAmount(v) => write!(f, "unrecognized amount '{}'", v),
            RowErrorKind::Malformed(v) => write!(f, "malformed row: {}", v),
        }
    }
}

/// A skipped row that has to be entered manually
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub raw: String,
    pub kind: RowErrorKind,
}

/// Original text of a data row, kept for the batch audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub row: usize,
    pub raw: String,
}

/// Result of parsing one submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedSource {
    /// Tag of the format that was used (`structured` for JSON payloads)
    pub format: String,
    pub candidates: Vec<TransactionCandidate>,
    /// Rows whose date carried a pending marker
    pub pending_skipped: usize,
    /// Rows imported with a zero amount because the amount was unreadable
    pub lenient_amounts: usize,
    pub rejected: Vec<RowError>,
    pub audit: Vec<AuditRow>,
}

impl ParsedSource {
    /// First and last candidate date
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.candidates.iter().map(|c| c.date).min()?;
        let last = self.candidates.iter().map(|c| c.date).max()?;
        Some((first, last))
    }
}
