//! Incremental monthly trip-data ingestion
//!
//! Downloads monthly taxi-trip parquet files, cleans them, and loads them
//! into PostgreSQL, skipping months that are already present.
//!
//! Architecture, leaf-first:
//! - Fetch: HTTP source provider for the upstream monthly parquet files
//! - Clean: passenger/timestamp filters and column canonicalization
//! - Store: PostgreSQL table store with chunked bulk inserts
//! - Reconcile: per-key create/skip/append decision state machine
//! - Run: cross-product driver accumulating per-key outcomes
//!
//! One destination table holds all months of a (category, year) pair;
//! month-level presence is tracked through the distinct months of the
//! table's `pickup_datetime` column.

pub mod batch;
pub mod clean;
pub mod config;
pub mod error;
pub mod key;
pub mod reconcile;
pub mod runner;
pub mod source;
pub mod store;

// Re-export main types
pub use config::{DatabaseConfig, PipelineConfig, SourceConfig};
pub use error::{IngestError, Result};
pub use key::{Category, IngestionKey};
pub use reconcile::{LoadOutcome, Reconciler};
pub use runner::{BatchRunner, KeyOutcome, KeyReport, RunSummary};
pub use source::{HttpSource, SourceProvider};
pub use store::{PostgresTableStore, TableStore};
