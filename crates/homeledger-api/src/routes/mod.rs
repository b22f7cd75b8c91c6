//! Route modules for the API server
//!
//! - imports: batch submission, confirm, undo
//! - limits: category status and single-transaction evaluation

pub mod imports;
pub mod limits;
