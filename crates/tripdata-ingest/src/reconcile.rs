//! Incremental-load reconciliation
//!
//! The core of the pipeline: decide, per ingestion key, whether the
//! destination table must be created, appended to, or left alone, and
//! drive fetch -> clean -> write accordingly.
//!
//! Decision sequence per key:
//!
//! ```text
//! UNCHECKED -> TABLE_ABSENT  -> create_and_load -> LOADED
//!                             \ (lost create race, once) -> TABLE_PRESENT
//!           -> TABLE_PRESENT -> MONTH_PRESENT -> SKIPPED (no fetch)
//!                            -> MONTH_ABSENT  -> append  -> LOADED
//! ```
//!
//! A month already present short-circuits before any fetch: the network
//! download is never paid for data the store already holds. Source and
//! schema failures surface before the store is touched.

use arrow::record_batch::RecordBatch;
use serde::Serialize;
use tracing::info;

use crate::clean;
use crate::error::{IngestError, Result};
use crate::key::IngestionKey;
use crate::source::SourceProvider;
use crate::store::TableStore;

/// Terminal outcome of reconciling one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// New data was written to the store.
    Loaded { rows_written: usize },
    /// The key's month was already present; nothing was fetched or written.
    Skipped,
}

/// Non-terminal states of the per-key decision sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Unchecked,
    TableAbsent,
    TablePresent,
    MonthAbsent,
}

/// Drives the create/skip/append decision for single keys.
pub struct Reconciler<S, T> {
    source: S,
    store: T,
}

impl<S: SourceProvider, T: TableStore> Reconciler<S, T> {
    pub fn new(source: S, store: T) -> Self {
        Self { source, store }
    }

    /// Run the decision sequence for one key.
    ///
    /// At most one successful write to the store occurs per invocation.
    /// Re-running a key whose month is already visible in the store is a
    /// no-op (`Skipped`).
    pub async fn reconcile(&self, key: &IngestionKey) -> Result<LoadOutcome> {
        let table = key.table_name();
        let mut state = LoadState::Unchecked;
        // One re-entry is allowed after losing a creation race; a second
        // collision fails the key.
        let mut lost_create_race = false;

        loop {
            state = match state {
                LoadState::Unchecked => {
                    if self.store.table_exists(&table).await? {
                        LoadState::TablePresent
                    } else {
                        LoadState::TableAbsent
                    }
                },
                LoadState::TableAbsent => {
                    let batch = self.fetch_and_clean(key).await?;
                    match self.store.create_and_load(&table, &batch).await {
                        Ok(rows_written) => {
                            info!(%key, table = %table, rows_written, "created table and loaded month");
                            return Ok(LoadOutcome::Loaded { rows_written });
                        },
                        Err(IngestError::TableAlreadyExists(_)) if !lost_create_race => {
                            lost_create_race = true;
                            info!(
                                %key,
                                table = %table,
                                "lost table-creation race; re-checking month presence"
                            );
                            LoadState::TablePresent
                        },
                        Err(err) => return Err(err),
                    }
                },
                LoadState::TablePresent => {
                    let months = self.store.months_present(&table).await?;
                    if months.contains(&key.month) {
                        info!(%key, table = %table, "month already present; skipping fetch");
                        return Ok(LoadOutcome::Skipped);
                    }
                    LoadState::MonthAbsent
                },
                LoadState::MonthAbsent => {
                    let batch = self.fetch_and_clean(key).await?;
                    let rows_written = self.store.append(&table, &batch).await?;
                    info!(%key, table = %table, rows_written, "appended month to existing table");
                    return Ok(LoadOutcome::Loaded { rows_written });
                },
            };
        }
    }

    async fn fetch_and_clean(&self, key: &IngestionKey) -> Result<RecordBatch> {
        let raw = self.source.fetch(key).await?;
        clean::clean(&raw, key)
    }
}
