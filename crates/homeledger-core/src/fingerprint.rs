//! Content fingerprints for transactions
//!
//! A fingerprint is `fp_<n>`, where `n` is a 32-bit rolling hash (×31 per
//! UTF-16 code unit, wrapping) of `tenant|currency|date|amount|description`
//! with the amount fixed to two decimals and the description normalized.
//! Rows of one batch that hash identically get `_dup<k>` suffixes (k ≥ 2) so
//! that each is stored as its own record.
//!
//! The construction is kept bit-for-bit so fingerprints stay comparable with
//! records imported earlier. 32 bits is not collision resistant; uniqueness is
//! ultimately the store's (tenant, fingerprint) constraint.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use homeledger_parser::TransactionCandidate;
use homeledger_utils::round_cents;

use crate::models::{FlagDecision, FlagReason, FlagSource, ImportBatch, TransactionRecord, UNCATEGORIZED};

pub const FINGERPRINT_PREFIX: &str = "fp_";
pub const DUPLICATE_MARKER: &str = "_dup";
const FIELD_DELIMITER: &str = "|";

/// Trim, collapse internal whitespace, lowercase
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonical string the fingerprint is computed from
pub fn base_string(tenant_id: &str, currency: &str, date: NaiveDate, amount: Decimal, description: &str) -> String {
    let amount = if amount.is_zero() { Decimal::ZERO } else { round_cents(amount) };
    [
        tenant_id.to_string(),
        currency.to_string(),
        date.format("%Y-%m-%d").to_string(),
        format!("{:.2}", amount),
        normalize_description(description),
    ]
    .join(FIELD_DELIMITER)
}

pub fn rolling_hash(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(0u32, |hash, unit| hash.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

pub fn fingerprint(tenant_id: &str, currency: &str, date: NaiveDate, amount: Decimal, description: &str) -> String {
    let base = base_string(tenant_id, currency, date, amount, description);
    format!("{}{}", FINGERPRINT_PREFIX, rolling_hash(&base))
}

/// Fingerprint with any `_dup<k>` suffix removed
pub fn base_fingerprint(fingerprint: &str) -> &str {
    match fingerprint.find(DUPLICATE_MARKER) {
        Some(pos) => &fingerprint[..pos],
        None => fingerprint,
    }
}

/// Fingerprint recomputed from a stored record's own fields
pub fn recompute(record: &TransactionRecord) -> String {
    fingerprint(&record.tenant_id, &record.currency, record.date, record.amount, &record.description)
}

/// Whether a record's fingerprint still matches its content
pub fn verify(record: &TransactionRecord) -> bool {
    base_fingerprint(&record.fingerprint) == recompute(record)
}

/// A candidate with its (possibly suffixed) fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintedRow {
    pub candidate: TransactionCandidate,
    pub currency: String,
    pub fingerprint: String,
    /// `Some(k)` for the k-th identical row of the batch, k ≥ 2
    pub duplicate_ordinal: Option<u32>,
    pub flag: FlagDecision,
}

impl FingerprintedRow {
    /// Build the record to persist for this row
    pub fn into_record(self, batch: &ImportBatch) -> TransactionRecord {
        let flag_source = if self.flag.flagged { Some(FlagSource::Import) } else { None };
        TransactionRecord {
            id: None,
            tenant_id: batch.tenant_id.clone(),
            date: self.candidate.date,
            currency: self.currency,
            amount: self.candidate.amount,
            description: self.candidate.description,
            category: self.candidate.category.unwrap_or_else(|| UNCATEGORIZED.to_string()),
            payer: self.candidate.payer.or_else(|| batch.default_payer.clone()),
            source: batch.source_format.clone(),
            fingerprint: self.fingerprint,
            recurrence_key: self.candidate.recurrence_key,
            batch_id: Some(batch.id.clone()),
            flag: self.flag,
            flag_source,
        }
    }
}

/// Fingerprinted candidates of one batch, in source order
#[derive(Debug, Clone, Default)]
pub struct FingerprintedBatch {
    pub rows: Vec<FingerprintedRow>,
    /// Rows that received a `_dup` suffix
    pub in_batch_duplicates: usize,
}

impl FingerprintedBatch {
    /// Distinct fingerprints, first-seen order
    pub fn distinct_fingerprints(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.fingerprint.as_str()))
            .map(|row| row.fingerprint.clone())
            .collect()
    }

    pub fn into_records(self, batch: &ImportBatch) -> Vec<TransactionRecord> {
        self.rows.into_iter().map(|row| row.into_record(batch)).collect()
    }
}

/// Fingerprint every candidate and disambiguate identical rows.
///
/// The first row with a given base fingerprint keeps it; the k-th gets
/// `<base>_dup<k>` and is flagged as a possible duplicate.
pub fn assign_fingerprints(
    tenant_id: &str,
    batch_currency: &str,
    candidates: Vec<TransactionCandidate>,
) -> FingerprintedBatch {
    let mut occurrences: HashMap<String, u32> = HashMap::new();
    let mut batch = FingerprintedBatch::default();

    for candidate in candidates {
        let currency = candidate
            .currency
            .clone()
            .unwrap_or_else(|| batch_currency.to_string());
        let base = fingerprint(tenant_id, &currency, candidate.date, candidate.amount, &candidate.description);

        let count = occurrences.entry(base.clone()).or_insert(0);
        *count += 1;

        let row = if *count == 1 {
            FingerprintedRow {
                candidate,
                currency,
                fingerprint: base,
                duplicate_ordinal: None,
                flag: FlagDecision::none(),
            }
        } else {
            batch.in_batch_duplicates += 1;
            log::debug!(
                target: "homeledger::fingerprint",
                "row {} repeats {} (occurrence {})",
                candidate.row,
                base,
                count
            );
            FingerprintedRow {
                fingerprint: format!("{}{}{}", base, DUPLICATE_MARKER, count),
                duplicate_ordinal: Some(*count),
                candidate,
                currency,
                flag: FlagDecision::flag(FlagReason::PossibleDuplicate),
            }
        };
        batch.rows.push(row);
    }

    batch
}

// ==================== Tests ====================
