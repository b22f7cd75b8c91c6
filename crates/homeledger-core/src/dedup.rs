//! Cross-import deduplication
//!
//! Rows whose fingerprint the store already holds for the tenant are true
//! repeats of an earlier import. They are dropped from the insert set and
//! counted, never flagged.

use std::collections::HashSet;

use crate::models::TransactionRecord;
use crate::store::{StoreError, TransactionStore};

/// Rows split into new and already stored
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub admitted: Vec<TransactionRecord>,
    pub already_known: Vec<TransactionRecord>,
    /// Distinct fingerprints sent to the store
    pub checked_fingerprints: usize,
}

impl DedupOutcome {
    pub fn skipped(&self) -> usize {
        self.already_known.len()
    }
}

/// Partition `rows` by whether the store already knows their fingerprint.
///
/// Only a pre-check: two imports racing for the same tenant can both admit a
/// row, and the store's uniqueness constraint settles it at insert time.
pub async fn partition_new(
    store: &dyn TransactionStore,
    tenant_id: &str,
    rows: Vec<TransactionRecord>,
) -> Result<DedupOutcome, StoreError> {
    if rows.is_empty() {
        return Ok(DedupOutcome::default());
    }

    let mut seen = HashSet::new();
    let fingerprints: Vec<String> = rows
        .iter()
        .filter(|row| seen.insert(row.fingerprint.as_str()))
        .map(|row| row.fingerprint.clone())
        .collect();

    let known = store.existing_fingerprints(tenant_id, &fingerprints).await?;
    let (already_known, admitted): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|row| known.contains(&row.fingerprint));

    log::debug!(
        target: "homeledger::dedup",
        "tenant {}: {} fingerprints checked, {} new, {} already stored",
        tenant_id,
        fingerprints.len(),
        admitted.len(),
        already_known.len()
    );

    Ok(DedupOutcome {
        admitted,
        already_known,
        checked_fingerprints: fingerprints.len(),
    })
}
