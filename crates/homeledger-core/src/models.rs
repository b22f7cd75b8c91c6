//! Core data models: stored transactions, import batches and flag decisions

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use homeledger_utils::month_key;

use crate::fingerprint::rolling_hash;

/// Distinguishes batches staged within the same millisecond
static BATCH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Category used when a source row carries none
pub const UNCATEGORIZED: &str = "uncategorized";

/// Why a transaction was flagged for discussion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagReason {
    /// Looks identical to an earlier row of the same batch but was kept
    PossibleDuplicate,
    /// Pushed the category's spending past its limit
    LimitCrossed { category: String },
    /// Booked after the category's limit was already exceeded
    OverLimit { category: String },
    /// Toggled by a household member
    Manual {
        #[serde(default)]
        note: Option<String>,
    },
}

impl std::fmt::Display for FlagReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagReason::PossibleDuplicate => write!(f, "possible duplicate"),
            FlagReason::LimitCrossed { category } => write!(f, "crossed the {} limit", category),
            FlagReason::OverLimit { category } => write!(f, "over the {} limit", category),
            FlagReason::Manual { note: Some(note) } => write!(f, "manual: {}", note),
            FlagReason::Manual { note: None } => write!(f, "manual"),
        }
    }
}

/// Outcome of a flagging decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlagDecision {
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FlagReason>,
}

impl FlagDecision {
    /// Not flagged
    pub fn none() -> Self {
        Self::default()
    }

    /// Flagged for `reason`
    pub fn flag(reason: FlagReason) -> Self {
        Self {
            flagged: true,
            reason: Some(reason),
        }
    }
}

/// Who set a transaction's flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagSource {
    /// In-batch duplicate detection
    Import,
    /// Category limit engine
    Limit,
    /// Manual toggle
    Manual,
}

impl std::fmt::Display for FlagSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagSource::Import => write!(f, "import"),
            FlagSource::Limit => write!(f, "limit"),
            FlagSource::Manual => write!(f, "manual"),
        }
    }
}

/// A stored household transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Store-assigned identifier, `None` until persisted
    #[serde(default)]
    pub id: Option<String>,
    pub tenant_id: String,
    pub date: NaiveDate,
    pub currency: String,
    /// Negative = expense, positive = income
    pub amount: Decimal,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub payer: Option<String>,
    /// Format tag of the source the row was imported from
    pub source: String,
    pub fingerprint: String,
    #[serde(default)]
    pub recurrence_key: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub flag: FlagDecision,
    #[serde(default)]
    pub flag_source: Option<FlagSource>,
}

impl TransactionRecord {
    pub fn is_expense(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn is_income(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// `YYYY-MM` of the booking date
    pub fn month(&self) -> String {
        month_key(self.date)
    }

    pub fn in_category(&self, category: &str) -> bool {
        self.category.trim().eq_ignore_ascii_case(category.trim())
    }
}

/// Review state of an import batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Inserted, awaiting household review
    #[default]
    Staged,
    /// Reviewed and accepted
    Confirmed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Staged => write!(f, "staged"),
            BatchStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// One submission of source data.
///
/// The raw payload is kept verbatim for audit and undo and cannot be changed
/// once the batch exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: String,
    pub tenant_id: String,
    pub currency: String,
    /// Covered month, `YYYY-MM`
    pub month: String,
    pub source_format: String,
    pub default_payer: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    raw_payload: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}

impl ImportBatch {
    /// Create a staged batch
    pub fn stage(
        tenant_id: &str,
        currency: &str,
        month: &str,
        source_format: &str,
        default_payer: Option<String>,
        date_range: Option<(NaiveDate, NaiveDate)>,
        raw_payload: String,
    ) -> Self {
        let created_at = Utc::now();
        let id = format!(
            "batch-{}-{}-{}",
            created_at.format("%Y%m%d%H%M%S%3f"),
            rolling_hash(&format!("{}|{}", tenant_id, raw_payload)),
            BATCH_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );

        Self {
            id,
            tenant_id: tenant_id.to_string(),
            currency: currency.to_string(),
            month: month.to_string(),
            source_format: source_format.to_string(),
            default_payer,
            date_from: date_range.map(|(from, _)| from),
            date_to: date_range.map(|(_, to)| to),
            raw_payload,
            status: BatchStatus::Staged,
            created_at,
        }
    }

    /// Original submission, byte for byte
    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    pub fn is_staged(&self) -> bool {
        self.status == BatchStatus::Staged
    }

    /// Move a staged batch to confirmed; returns false if it already was
    pub fn confirm(&mut self) -> bool {
        if self.is_staged() {
            self.status = BatchStatus::Confirmed;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> ImportBatch {
        ImportBatch::stage(
            "home",
            "EUR",
            "2024-03",
            "generic",
            Some("alex".to_string()),
            Some((
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )),
            "Date,Description,Amount\n".to_string(),
        )
    }

    #[test]
    fn test_batch_lifecycle() {
        let mut batch = batch();
        assert_eq!(batch.status, BatchStatus::Staged);
        assert!(batch.id.starts_with("batch-"));
        assert_eq!(batch.raw_payload(), "Date,Description,Amount\n");
        assert!(batch.confirm());
        assert_eq!(batch.status, BatchStatus::Confirmed);
        assert!(!batch.confirm());
    }

    #[test]
    fn test_batch_status_defaults_to_staged() {
        assert_eq!(BatchStatus::default(), BatchStatus::Staged);
        assert_eq!(BatchStatus::default().to_string(), "staged");
    }

    #[test]
    fn test_batch_ids_are_unique() {
        assert_ne!(batch().id, batch().id);
    }

    #[test]
    fn test_batch_serde_keeps_payload() {
        let batch = batch();
        let json = serde_json::to_string(&batch).unwrap();
        let back: ImportBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.raw_payload(), batch.raw_payload());
        assert_eq!(back.status, BatchStatus::Staged);
    }

    #[test]
    fn test_flag_decision_serde() {
        let decision = FlagDecision::flag(FlagReason::LimitCrossed { category: "dining".to_string() });
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["flagged"], true);
        assert_eq!(json["reason"]["kind"], "limit_crossed");
        assert_eq!(json["reason"]["category"], "dining");

        let none = serde_json::to_value(FlagDecision::none()).unwrap();
        assert_eq!(none, serde_json::json!({ "flagged": false }));
    }

    #[test]
    fn test_flag_reason_display() {
        assert_eq!(FlagReason::PossibleDuplicate.to_string(), "possible duplicate");
        assert_eq!(
            FlagReason::OverLimit { category: "dining".to_string() }.to_string(),
            "over the dining limit"
        );
        assert_eq!(FlagReason::Manual { note: None }.to_string(), "manual");
    }
}
