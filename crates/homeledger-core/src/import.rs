//! Import orchestration
//!
//! parse → stage batch → fingerprint → dedup → chunked persist → limit
//! flags → re-query → report. [`ImportService::import`] always returns a
//! report; failures along the way end up in it instead of escaping.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use homeledger_config::Config;
use homeledger_parser::{AmountPolicy, DefaultSourceParser, ParserRef, SourceKind};
use homeledger_utils::{month_bounds, month_key};

use crate::dedup::partition_new;
use crate::error::{CoreError, CoreResult, DefaultErrorLogger, ErrorContext, ErrorLogger};
use crate::export::{export_csv, export_filename};
use crate::fingerprint::assign_fingerprints;
use crate::limits::{evaluate_batch, evaluate_incremental, status, CategoryLimits, CategoryStatus, Conversion};
use crate::models::{FlagDecision, FlagSource, ImportBatch, TransactionRecord};
use crate::reports::ImportReport;
use crate::store::{FlagUpdate, OnConflict, StoreRef, TransactionFilter};

/// One batch submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub tenant_id: String,
    pub payload: String,
    pub kind: SourceKind,
    /// Batch currency; rows without their own currency use it
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub default_payer: Option<String>,
    /// Covered month, `YYYY-MM`; taken from the first row when absent
    #[serde(default)]
    pub month: Option<String>,
}

impl ImportRequest {
    pub fn new(tenant_id: &str, payload: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            payload: payload.into(),
            kind,
            currency: None,
            default_payer: None,
            month: None,
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }

    pub fn with_payer(mut self, payer: &str) -> Self {
        self.default_payer = Some(payer.to_string());
        self
    }

    pub fn with_month(mut self, month: &str) -> Self {
        self.month = Some(month.to_string());
        self
    }
}

/// Settings of the import pipeline
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub chunk_size: usize,
    pub amount_policy: AmountPolicy,
    pub default_currency: String,
    pub app_name: String,
    pub limits: CategoryLimits,
    pub conversion: Conversion,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            amount_policy: AmountPolicy::Lenient,
            default_currency: "EUR".to_string(),
            app_name: "homeledger".to_string(),
            limits: CategoryLimits::new(),
            conversion: Conversion::identity("EUR"),
        }
    }
}

impl ImportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.import.chunk_size,
            amount_policy: if config.import.strict_amounts {
                AmountPolicy::Strict
            } else {
                AmountPolicy::Lenient
            },
            default_currency: config.import.default_currency.clone(),
            app_name: config.import.app_name.clone(),
            limits: CategoryLimits::from_config(&config.limits),
            conversion: Conversion::from_config(&config.currency),
        }
    }
}

/// Runs imports and the batch/limit operations around them
#[derive(Clone)]
pub struct ImportService {
    store: StoreRef,
    parser: ParserRef,
    options: ImportOptions,
    logger: Arc<dyn ErrorLogger>,
}

impl ImportService {
    pub fn new(store: StoreRef, parser: ParserRef, options: ImportOptions) -> Self {
        Self {
            store,
            parser,
            options,
            logger: Arc::new(DefaultErrorLogger),
        }
    }

    /// Service with the default parser, configured from `config`
    pub fn from_config(store: StoreRef, config: &Config) -> Self {
        let options = ImportOptions::from_config(config);
        let parser: ParserRef = Arc::new(DefaultSourceParser::new(options.amount_policy));
        Self::new(store, parser, options)
    }

    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    /// Import one submission; never fails, the report says what happened
    pub async fn import(&self, request: ImportRequest) -> ImportReport {
        let tenant_id = request.tenant_id.clone();
        let context = ErrorContext::new("import").with_tenant(&tenant_id);

        let parsed = match self.parser.parse(&request.payload, &request.kind) {
            Ok(parsed) => parsed,
            Err(e) => {
                let error = CoreError::from(e);
                self.logger.log_error(&error, &context);
                return ImportReport::rejected(&tenant_id, error.to_details());
            }
        };

        let mut report = ImportReport::new(&tenant_id);
        report.format = Some(parsed.format.clone());
        report.parsed_rows = parsed.candidates.len();
        report.skipped_pending = parsed.pending_skipped;
        report.lenient_amounts = parsed.lenient_amounts;
        for rejected in &parsed.rejected {
            let error = CoreError::RowParse {
                row: rejected.row,
                message: rejected.kind.to_string(),
            };
            self.logger.log_error(&error, &context);
            report.errors.push(error.to_details());
        }
        report.manual_entry = parsed.rejected.clone();
        if parsed.lenient_amounts > 0 {
            self.logger.log_warning(
                &format!("{} rows imported with a zero amount", parsed.lenient_amounts),
                &context,
            );
        }

        // Stage the batch with the untouched payload
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.options.default_currency.clone());
        let month = request
            .month
            .clone()
            .or_else(|| parsed.candidates.first().map(|c| month_key(c.date)))
            .unwrap_or_else(|| month_key(Utc::now().date_naive()));
        let batch = ImportBatch::stage(
            &tenant_id,
            &currency,
            &month,
            &parsed.format,
            request.default_payer.clone(),
            parsed.date_range(),
            request.payload,
        );
        report.batch_id = Some(batch.id.clone());
        let context = context.with_batch(&batch.id);

        if let Err(e) = self.store.upsert_batch(&batch).await {
            self.fail(&mut report, CoreError::from(e), &context);
            return report;
        }

        // Fingerprint and drop rows the store already has
        let fingerprinted = assign_fingerprints(&tenant_id, &currency, parsed.candidates);
        report.in_batch_duplicates = fingerprinted.in_batch_duplicates;
        let records = fingerprinted.into_records(&batch);

        let dedup = match partition_new(self.store.as_ref(), &tenant_id, records).await {
            Ok(dedup) => dedup,
            Err(e) => {
                self.fail(&mut report, CoreError::from(e), &context);
                return report;
            }
        };
        report.skipped_duplicates = dedup.skipped();

        self.persist(&dedup.admitted, &mut report, &context).await;

        // Limit flags for every month the new rows touch
        if report.inserted > 0 {
            let months: BTreeSet<String> = dedup.admitted.iter().map(|r| r.month()).collect();
            for month in months {
                match self.apply_limit_flags(&tenant_id, &month).await {
                    Ok(applied) => report.limit_flags_applied += applied,
                    Err(e) => {
                        self.logger.log_error(&e, &context);
                        report.errors.push(e.to_details());
                    }
                }
            }
        }

        // The store may have changed flags since insert, so read the batch back
        let filter = TransactionFilter::tenant(&tenant_id).with_batch(&batch.id);
        match self.store.select_transactions(&filter).await {
            Ok(rows) => report.summarize(&rows),
            Err(e) => {
                let error = CoreError::from(e);
                self.logger.log_error(&error, &context);
                report.errors.push(error.to_details());
            }
        }

        report.finish();
        log::info!(
            target: "homeledger::import",
            "tenant {} batch {} ({}): {}",
            tenant_id,
            batch.id,
            batch.source_format,
            report.summary_line()
        );
        report
    }

    fn fail(&self, report: &mut ImportReport, error: CoreError, context: &ErrorContext) {
        self.logger.log_error(&error, context);
        report.errors.push(error.to_details());
        report.finish();
    }

    /// Write rows chunk by chunk; a failed chunk is counted and skipped
    async fn persist(&self, rows: &[TransactionRecord], report: &mut ImportReport, context: &ErrorContext) {
        let chunk_size = self.options.chunk_size.max(1);

        for (idx, chunk) in rows.chunks(chunk_size).enumerate() {
            match self.store.upsert_transactions(chunk, OnConflict::Ignore).await {
                Ok(outcome) => {
                    report.inserted += outcome.inserted;
                    report.duplicate_conflicts += outcome.conflicts.len();
                    for fingerprint in outcome.conflicts {
                        let signal = CoreError::DuplicateViolation {
                            tenant_id: report.tenant_id.clone(),
                            fingerprint,
                        };
                        self.logger.log_error(&signal, context);
                    }
                }
                Err(e) => {
                    let error = CoreError::Persistence {
                        chunk: idx + 1,
                        rows: chunk.len(),
                        message: e.to_string(),
                    };
                    self.logger.log_error(&error, context);
                    report.failed_chunks += 1;
                    report.failed_rows += chunk.len();
                    report.errors.push(error.to_details());
                }
            }
        }
    }

    async fn month_rows(&self, tenant_id: &str, month: &str) -> CoreResult<Vec<TransactionRecord>> {
        let (from, to) = month_bounds(month).ok_or_else(|| CoreError::InvalidState {
            message: format!("'{}' is not a YYYY-MM month", month),
        })?;
        let filter = TransactionFilter::tenant(tenant_id).between(from, to);
        Ok(self.store.select_transactions(&filter).await?)
    }

    /// Re-scan a month and flag rows the limit engine picks.
    ///
    /// Rows that already carry a flag keep it; nothing is ever unflagged here.
    pub async fn apply_limit_flags(&self, tenant_id: &str, month: &str) -> CoreResult<usize> {
        if self.options.limits.is_empty() {
            return Ok(0);
        }
        let rows = self.month_rows(tenant_id, month).await?;
        let evaluation = evaluate_batch(&rows, &self.options.limits, &self.options.conversion);

        let updates: Vec<FlagUpdate> = evaluation
            .flagged()
            .filter(|(idx, _)| !rows[*idx].flag.flagged)
            .map(|(idx, decision)| FlagUpdate {
                fingerprint: rows[idx].fingerprint.clone(),
                flag: decision.clone(),
                source: FlagSource::Limit,
            })
            .collect();
        if updates.is_empty() {
            return Ok(0);
        }

        let applied = self.store.update_flags(tenant_id, &updates).await?;
        log::debug!(
            target: "homeledger::limits",
            "tenant {} month {}: {} rows flagged",
            tenant_id,
            month,
            applied
        );
        Ok(applied)
    }

    /// Remove the transactions of a staged batch; the batch record stays
    pub async fn undo_batch(&self, tenant_id: &str, batch_id: &str) -> CoreResult<usize> {
        let batch = self.require_batch(tenant_id, batch_id).await?;
        if !batch.is_staged() {
            return Err(CoreError::InvalidState {
                message: format!("batch {} is {}", batch_id, batch.status),
            });
        }

        let filter = TransactionFilter::tenant(tenant_id).with_batch(batch_id);
        let removed = self.store.delete_transactions(&filter).await?;
        log::info!(
            target: "homeledger::import",
            "tenant {}: undid batch {}, {} transactions removed",
            tenant_id,
            batch_id,
            removed
        );
        Ok(removed)
    }

    /// Mark a staged batch as reviewed
    pub async fn confirm_batch(&self, tenant_id: &str, batch_id: &str) -> CoreResult<ImportBatch> {
        let mut batch = self.require_batch(tenant_id, batch_id).await?;
        if !batch.confirm() {
            return Err(CoreError::InvalidState {
                message: format!("batch {} is already {}", batch_id, batch.status),
            });
        }
        self.store.upsert_batch(&batch).await?;
        log::info!(target: "homeledger::import", "tenant {}: confirmed batch {}", tenant_id, batch_id);
        Ok(batch)
    }

    async fn require_batch(&self, tenant_id: &str, batch_id: &str) -> CoreResult<ImportBatch> {
        self.store
            .select_batch(tenant_id, batch_id)
            .await?
            .ok_or_else(|| CoreError::BatchNotFound {
                batch_id: batch_id.to_string(),
            })
    }

    /// Spend-to-date per limited category for one month
    pub async fn limit_status(&self, tenant_id: &str, month: &str) -> CoreResult<Vec<CategoryStatus>> {
        let rows = self.month_rows(tenant_id, month).await?;
        Ok(status(&rows, &self.options.limits, &self.options.conversion))
    }

    /// Flag decision for a single new or edited transaction against its month
    pub async fn evaluate_transaction(&self, transaction: &TransactionRecord) -> CoreResult<FlagDecision> {
        let existing = self.month_rows(&transaction.tenant_id, &transaction.month()).await?;
        Ok(evaluate_incremental(
            transaction,
            &existing,
            &self.options.limits,
            &self.options.conversion,
        ))
    }

    /// File name and CSV content of one month's transactions
    pub async fn export(&self, tenant_id: &str, month: &str) -> CoreResult<(String, String)> {
        let rows = self.month_rows(tenant_id, month).await?;
        let filename = export_filename(&self.options.app_name, month, &self.options.conversion.reference);
        Ok((filename, export_csv(&rows)?))
    }
}

// ==================== Tests ====================
