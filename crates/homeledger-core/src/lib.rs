//! Transaction ingestion and flagging for homeledger
//!
//! Fingerprinting, deduplication against the store, the category limit
//! engine and the import orchestrator that ties them together.

pub mod dedup;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod import;
pub mod limits;
pub mod models;
pub mod reports;
pub mod store;

pub use dedup::{partition_new, DedupOutcome};
pub use error::{CoreError, CoreResult, DefaultErrorLogger, ErrorCode, ErrorContext, ErrorDetails, ErrorLogger, ErrorSeverity};
pub use export::{export_csv, export_filename};
pub use fingerprint::{assign_fingerprints, fingerprint, FingerprintedBatch, FingerprintedRow};
pub use import::{ImportOptions, ImportRequest, ImportService};
pub use limits::{
    evaluate_batch, evaluate_incremental, status, BatchEvaluation, CategoryLimit, CategoryLimits, CategoryStatus,
    Conversion, LimitAccumulator, LimitState,
};
pub use models::{BatchStatus, FlagDecision, FlagReason, FlagSource, ImportBatch, TransactionRecord, UNCATEGORIZED};
pub use reports::{FlaggedRow, ImportOutcome, ImportReport};
pub use store::{
    FlagUpdate, MemoryStore, OnConflict, StoreError, StoreRef, TransactionFilter, TransactionStore, UpsertOutcome,
};
