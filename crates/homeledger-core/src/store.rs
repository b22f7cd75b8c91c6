//! Store contract consumed by the import pipeline, plus an in-memory store
//!
//! The real persistence engine lives outside this crate. All it has to offer
//! is upsert/select over transactions and batches with a uniqueness
//! constraint on (tenant, fingerprint).

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{FlagDecision, FlagSource, ImportBatch, TransactionRecord};

/// Errors reported by a store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Unique constraint violated for tenant {tenant_id}, fingerprint {fingerprint}")]
    UniqueViolation { tenant_id: String, fingerprint: String },

    #[error("Request rejected: {message}")]
    Rejected { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What an upsert does with a row whose (tenant, fingerprint) already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnConflict {
    /// Keep the stored row, report the fingerprint as a conflict
    Ignore,
    /// Overwrite the stored row's content, keeping its id
    Update,
}

/// Result of one upsert call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Fingerprints that hit the uniqueness constraint and were skipped
    pub conflicts: Vec<String>,
}

/// Row selection for transactions; every field narrows the result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub tenant_id: String,
    pub batch_id: Option<String>,
    pub fingerprints: Option<Vec<String>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub category: Option<String>,
    pub flagged_only: bool,
}

impl TransactionFilter {
    pub fn tenant(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn with_fingerprints(mut self, fingerprints: &[String]) -> Self {
        self.fingerprints = Some(fingerprints.to_vec());
        self
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn flagged(mut self) -> Self {
        self.flagged_only = true;
        self
    }

    pub fn matches(&self, record: &TransactionRecord) -> bool {
        record.tenant_id == self.tenant_id
            && self.batch_id.as_ref().map_or(true, |b| record.batch_id.as_ref() == Some(b))
            && self.fingerprints.as_ref().map_or(true, |fps| fps.contains(&record.fingerprint))
            && self.date_from.map_or(true, |from| record.date >= from)
            && self.date_to.map_or(true, |to| record.date <= to)
            && self.category.as_ref().map_or(true, |c| record.in_category(c))
            && (!self.flagged_only || record.flag.flagged)
    }
}

/// New flag state for one stored transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagUpdate {
    pub fingerprint: String,
    pub flag: FlagDecision,
    pub source: FlagSource,
}

/// Store reference type
pub type StoreRef = Arc<dyn TransactionStore>;

/// Persistence contract for transactions and import batches
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert rows; rows colliding on (tenant, fingerprint) follow `on_conflict`
    async fn upsert_transactions(
        &self,
        rows: &[TransactionRecord],
        on_conflict: OnConflict,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn select_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Subset of `fingerprints` already stored for the tenant
    async fn existing_fingerprints(
        &self,
        tenant_id: &str,
        fingerprints: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let filter = TransactionFilter::tenant(tenant_id).with_fingerprints(fingerprints);
        let rows = self.select_transactions(&filter).await?;
        Ok(rows.into_iter().map(|r| r.fingerprint).collect())
    }

    /// Apply flag changes; returns the number of rows touched
    async fn update_flags(&self, tenant_id: &str, updates: &[FlagUpdate]) -> Result<usize, StoreError>;

    async fn delete_transactions(&self, filter: &TransactionFilter) -> Result<usize, StoreError>;

    async fn upsert_batch(&self, batch: &ImportBatch) -> Result<(), StoreError>;

    async fn select_batch(&self, tenant_id: &str, batch_id: &str) -> Result<Option<ImportBatch>, StoreError>;
}

// ==================== In-memory store ====================

#[derive(Debug, Default)]
struct TenantRows {
    rows: Vec<TransactionRecord>,
    by_fingerprint: HashMap<String, usize>,
}

impl TenantRows {
    fn reindex(&mut self) {
        self.by_fingerprint = self
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (row.fingerprint.clone(), idx))
            .collect();
    }
}

#[derive(Debug, Default)]
struct MemoryData {
    tenants: HashMap<String, TenantRows>,
    batches: HashMap<(String, String), ImportBatch>,
    next_id: u64,
}

/// On-disk form of a [`MemoryStore`]
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    transactions: Vec<TransactionRecord>,
    batches: Vec<ImportBatch>,
}

/// Store kept in process memory, with optional JSON snapshots
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a snapshot file; a missing file gives an empty store
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(target: "homeledger::store", "no snapshot at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        let mut data = MemoryData {
            next_id: snapshot.next_id,
            ..MemoryData::default()
        };
        for row in snapshot.transactions {
            data.tenants.entry(row.tenant_id.clone()).or_default().rows.push(row);
        }
        for tenant in data.tenants.values_mut() {
            tenant.reindex();
        }
        for batch in snapshot.batches {
            data.batches.insert((batch.tenant_id.clone(), batch.id.clone()), batch);
        }

        Ok(Self { data: RwLock::new(data) })
    }

    /// Write the whole store to `path` as JSON
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let data = self.data.read().await;
        let mut batches: Vec<ImportBatch> = data.batches.values().cloned().collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let snapshot = Snapshot {
            next_id: data.next_id,
            transactions: data.tenants.values().flat_map(|t| t.rows.iter().cloned()).collect(),
            batches,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        drop(data);

        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Number of stored transactions across tenants
    pub async fn len(&self) -> usize {
        self.data.read().await.tenants.values().map(|t| t.rows.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn upsert_transactions(
        &self,
        rows: &[TransactionRecord],
        on_conflict: OnConflict,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut data = self.data.write().await;
        let mut outcome = UpsertOutcome::default();

        for row in rows {
            let existing = data
                .tenants
                .get(&row.tenant_id)
                .and_then(|t| t.by_fingerprint.get(&row.fingerprint).copied());

            match (existing, on_conflict) {
                (Some(_), OnConflict::Ignore) => {
                    outcome.conflicts.push(row.fingerprint.clone());
                }
                (Some(idx), OnConflict::Update) => {
                    if let Some(tenant) = data.tenants.get_mut(&row.tenant_id) {
                        let id = tenant.rows[idx].id.clone();
                        tenant.rows[idx] = TransactionRecord { id, ..row.clone() };
                        outcome.updated += 1;
                    }
                }
                (None, _) => {
                    data.next_id += 1;
                    let record = TransactionRecord {
                        id: Some(format!("tx-{}", data.next_id)),
                        ..row.clone()
                    };
                    let tenant = data.tenants.entry(row.tenant_id.clone()).or_default();
                    tenant.by_fingerprint.insert(record.fingerprint.clone(), tenant.rows.len());
                    tenant.rows.push(record);
                    outcome.inserted += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn select_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionRecord>, StoreError> {
        let data = self.data.read().await;
        let rows = data
            .tenants
            .get(&filter.tenant_id)
            .map(|t| t.rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        Ok(rows)
    }

    async fn update_flags(&self, tenant_id: &str, updates: &[FlagUpdate]) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        let tenant = match data.tenants.get_mut(tenant_id) {
            Some(tenant) => tenant,
            None => return Ok(0),
        };

        let mut touched = 0;
        for update in updates {
            if let Some(&idx) = tenant.by_fingerprint.get(&update.fingerprint) {
                let row = &mut tenant.rows[idx];
                row.flag = update.flag.clone();
                row.flag_source = if update.flag.flagged { Some(update.source) } else { None };
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete_transactions(&self, filter: &TransactionFilter) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        let tenant = match data.tenants.get_mut(&filter.tenant_id) {
            Some(tenant) => tenant,
            None => return Ok(0),
        };

        let before = tenant.rows.len();
        tenant.rows.retain(|r| !filter.matches(r));
        tenant.reindex();
        Ok(before - tenant.rows.len())
    }

    async fn upsert_batch(&self, batch: &ImportBatch) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let key = (batch.tenant_id.clone(), batch.id.clone());
        if let Some(existing) = data.batches.get(&key) {
            if existing.raw_payload() != batch.raw_payload() {
                return Err(StoreError::Rejected {
                    message: format!("raw payload of batch {} is immutable", batch.id),
                });
            }
        }
        data.batches.insert(key, batch.clone());
        Ok(())
    }

    async fn select_batch(&self, tenant_id: &str, batch_id: &str) -> Result<Option<ImportBatch>, StoreError> {
        let data = self.data.read().await;
        Ok(data.batches.get(&(tenant_id.to_string(), batch_id.to_string())).cloned())
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlagReason;
    use rust_decimal::Decimal;

    fn record(tenant: &str, fingerprint: &str, day: u32) -> TransactionRecord {
        TransactionRecord {
            id: None,
            tenant_id: tenant.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            currency: "EUR".to_string(),
            amount: Decimal::from(-10),
            description: "Bakery".to_string(),
            category: "groceries".to_string(),
            payer: None,
            source: "generic".to_string(),
            fingerprint: fingerprint.to_string(),
            recurrence_key: None,
            batch_id: Some("b-1".to_string()),
            flag: FlagDecision::none(),
            flag_source: None,
        }
    }

    #[tokio::test]
    async fn test_unique_constraint_per_tenant() {
        let store = MemoryStore::new();
        let outcome = store
            .upsert_transactions(&[record("home", "fp_1", 1), record("flat", "fp_1", 1)], OnConflict::Ignore)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);

        let outcome = store
            .upsert_transactions(&[record("home", "fp_1", 2), record("home", "fp_2", 2)], OnConflict::Ignore)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.conflicts, vec!["fp_1".to_string()]);

        let home = store.select_transactions(&TransactionFilter::tenant("home")).await.unwrap();
        assert_eq!(home.len(), 2);
        assert!(home.iter().all(|r| r.id.is_some()));
    }

    #[tokio::test]
    async fn test_upsert_update_keeps_id() {
        let store = MemoryStore::new();
        store.upsert_transactions(&[record("home", "fp_1", 1)], OnConflict::Ignore).await.unwrap();
        let mut changed = record("home", "fp_1", 1);
        changed.category = "dining".to_string();
        let outcome = store.upsert_transactions(&[changed], OnConflict::Update).await.unwrap();
        assert_eq!(outcome.updated, 1);

        let rows = store.select_transactions(&TransactionFilter::tenant("home")).await.unwrap();
        assert_eq!(rows[0].category, "dining");
        assert_eq!(rows[0].id.as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn test_existing_fingerprints_and_filters() {
        let store = MemoryStore::new();
        store
            .upsert_transactions(&[record("home", "fp_1", 1), record("home", "fp_2", 20)], OnConflict::Ignore)
            .await
            .unwrap();

        let known = store
            .existing_fingerprints("home", &["fp_2".to_string(), "fp_3".to_string()])
            .await
            .unwrap();
        assert_eq!(known, HashSet::from(["fp_2".to_string()]));

        let filter = TransactionFilter::tenant("home").between(
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        );
        assert_eq!(store.select_transactions(&filter).await.unwrap().len(), 1);
        let filter = TransactionFilter::tenant("home").with_category("GROCERIES");
        assert_eq!(store.select_transactions(&filter).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_flags_and_delete() {
        let store = MemoryStore::new();
        store
            .upsert_transactions(&[record("home", "fp_1", 1), record("home", "fp_2", 2)], OnConflict::Ignore)
            .await
            .unwrap();

        let touched = store
            .update_flags(
                "home",
                &[FlagUpdate {
                    fingerprint: "fp_2".to_string(),
                    flag: FlagDecision::flag(FlagReason::Manual { note: None }),
                    source: FlagSource::Manual,
                }],
            )
            .await
            .unwrap();
        assert_eq!(touched, 1);
        let flagged = store.select_transactions(&TransactionFilter::tenant("home").flagged()).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].flag_source, Some(FlagSource::Manual));

        let removed = store
            .delete_transactions(&TransactionFilter::tenant("home").with_batch("b-1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty().await);
        // fingerprint index rebuilt: the same row can be inserted again
        let outcome = store.upsert_transactions(&[record("home", "fp_1", 1)], OnConflict::Ignore).await.unwrap();
        assert_eq!(outcome.inserted, 1);
    }

    #[tokio::test]
    async fn test_batch_payload_is_immutable() {
        let store = MemoryStore::new();
        let batch = ImportBatch::stage("home", "EUR", "2024-03", "generic", None, None, "a".to_string());
        store.upsert_batch(&batch).await.unwrap();

        let mut confirmed = batch.clone();
        confirmed.confirm();
        store.upsert_batch(&confirmed).await.unwrap();
        let stored = store.select_batch("home", &batch.id).await.unwrap().unwrap();
        assert!(!stored.is_staged());

        let tampered: ImportBatch = {
            let mut json = serde_json::to_value(&batch).unwrap();
            json["raw_payload"] = serde_json::json!("b");
            serde_json::from_value(json).unwrap()
        };
        assert!(matches!(store.upsert_batch(&tampered).await, Err(StoreError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let path = std::env::temp_dir().join(format!("homeledger-store-{}.json", std::process::id()));
        let store = MemoryStore::new();
        store.upsert_transactions(&[record("home", "fp_1", 1)], OnConflict::Ignore).await.unwrap();
        store.save(&path).await.unwrap();

        let restored = MemoryStore::load(&path).await.unwrap();
        assert_eq!(restored.len().await, 1);
        let outcome = restored.upsert_transactions(&[record("home", "fp_1", 1)], OnConflict::Ignore).await.unwrap();
        assert_eq!(outcome.conflicts.len(), 1);
        let outcome = restored.upsert_transactions(&[record("home", "fp_9", 1)], OnConflict::Ignore).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        let rows = restored.select_transactions(&TransactionFilter::tenant("home")).await.unwrap();
        assert_eq!(rows[1].id.as_deref(), Some("tx-2"));

        let _ = std::fs::remove_file(&path);
        let missing = MemoryStore::load(&path).await.unwrap();
        assert!(missing.is_empty().await);
    }
}
