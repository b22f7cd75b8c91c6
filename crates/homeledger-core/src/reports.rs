//! Import report returned to whoever submitted a batch

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use homeledger_parser::RowError;
use homeledger_utils::format_amount;

use crate::error::{ErrorCode, ErrorDetails};
use crate::models::{FlagReason, FlagSource, TransactionRecord};

/// Overall result of one import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    /// Every admitted row persisted and every row was read cleanly
    Completed,
    /// Something persisted, but rows or chunks need attention
    Partial,
    /// Nothing could be persisted
    Failed,
    /// The submission was unreadable as a whole
    Rejected,
}

impl std::fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportOutcome::Completed => write!(f, "completed"),
            ImportOutcome::Partial => write!(f, "partial"),
            ImportOutcome::Failed => write!(f, "failed"),
            ImportOutcome::Rejected => write!(f, "rejected"),
        }
    }
}

/// A currently flagged row of the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedRow {
    pub fingerprint: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub category: String,
    pub reason: Option<FlagReason>,
    pub source: Option<FlagSource>,
}

impl From<&TransactionRecord> for FlaggedRow {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            fingerprint: record.fingerprint.clone(),
            date: record.date,
            amount: record.amount,
            description: record.description.clone(),
            category: record.category.clone(),
            reason: record.flag.reason.clone(),
            source: record.flag_source,
        }
    }
}

/// Summary of one batch submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub tenant_id: String,
    pub batch_id: Option<String>,
    /// Format tag that was used
    pub format: Option<String>,
    pub outcome: ImportOutcome,
    pub parsed_rows: usize,
    pub inserted: usize,
    /// Rows lost with failed chunks
    pub failed_rows: usize,
    pub failed_chunks: usize,
    pub skipped_pending: usize,
    /// Already stored by an earlier import
    pub skipped_duplicates: usize,
    /// Rows kept with a `_dup` fingerprint
    pub in_batch_duplicates: usize,
    /// Rows the store's uniqueness constraint turned away at insert time
    pub duplicate_conflicts: usize,
    /// Rows imported with a zero amount
    pub lenient_amounts: usize,
    /// Rows newly flagged by the limit engine
    pub limit_flags_applied: usize,
    pub income_count: usize,
    pub expense_count: usize,
    pub income_total: Decimal,
    pub expense_total: Decimal,
    pub flagged: Vec<FlaggedRow>,
    /// Rows that could not be read and have to be entered manually
    pub manual_entry: Vec<RowError>,
    pub errors: Vec<ErrorDetails>,
}

impl ImportReport {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            batch_id: None,
            format: None,
            outcome: ImportOutcome::Completed,
            parsed_rows: 0,
            inserted: 0,
            failed_rows: 0,
            failed_chunks: 0,
            skipped_pending: 0,
            skipped_duplicates: 0,
            in_batch_duplicates: 0,
            duplicate_conflicts: 0,
            lenient_amounts: 0,
            limit_flags_applied: 0,
            income_count: 0,
            expense_count: 0,
            income_total: Decimal::ZERO,
            expense_total: Decimal::ZERO,
            flagged: Vec::new(),
            manual_entry: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// A report for a submission that was refused before any row was read
    pub fn rejected(tenant_id: &str, error: ErrorDetails) -> Self {
        let mut report = Self::new(tenant_id);
        report.outcome = ImportOutcome::Rejected;
        report.errors.push(error);
        report
    }

    /// Fill counts, totals and the flagged list from the batch's stored rows.
    /// Totals saturate rather than overflow.
    pub fn summarize(&mut self, rows: &[TransactionRecord]) {
        self.income_count = 0;
        self.expense_count = 0;
        self.income_total = Decimal::ZERO;
        self.expense_total = Decimal::ZERO;

        for row in rows {
            if row.is_income() {
                self.income_count += 1;
                self.income_total = self.income_total.saturating_add(row.amount);
            } else if row.is_expense() {
                self.expense_count += 1;
                self.expense_total = self.expense_total.saturating_add(row.amount);
            }
        }

        self.flagged = rows.iter().filter(|r| r.flag.flagged).map(FlaggedRow::from).collect();
    }

    /// Settle the outcome from the collected counts
    pub fn finish(&mut self) {
        if self.outcome == ImportOutcome::Rejected {
            return;
        }
        let store_failed = self.failed_chunks > 0
            || self.errors.iter().any(|e| matches!(e.code, ErrorCode::StoreError | ErrorCode::PersistenceError));
        self.outcome = if store_failed && self.inserted == 0 {
            ImportOutcome::Failed
        } else if store_failed || !self.manual_entry.is_empty() || self.lenient_amounts > 0 {
            ImportOutcome::Partial
        } else {
            ImportOutcome::Completed
        };
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ImportOutcome::Completed
    }

    /// One-line summary for logs and the CLI
    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} inserted, {} failed, {} pending skipped, {} duplicates skipped, {} flagged, {} to enter manually (income {} / expenses {})",
            self.outcome,
            self.inserted,
            self.failed_rows,
            self.skipped_pending,
            self.skipped_duplicates,
            self.flagged.len(),
            self.manual_entry.len(),
            format_amount(self.income_total),
            format_amount(self.expense_total)
        )
    }
}

// ==================== Tests ====================
