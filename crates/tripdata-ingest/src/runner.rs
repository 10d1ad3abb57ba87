//! Batch runner: drives the reconciler over a request cross-product

use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::error::Result;
use crate::key::{Category, IngestionKey};
use crate::reconcile::{LoadOutcome, Reconciler};
use crate::source::SourceProvider;
use crate::store::TableStore;

/// Per-key outcome kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOutcome {
    Loaded,
    Skipped,
    Failed,
}

/// Outcome recorded for one ingestion key.
#[derive(Debug, Clone, Serialize)]
pub struct KeyReport {
    pub category: Category,
    pub year: i32,
    pub month: u32,
    pub outcome: KeyOutcome,
    pub rows_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<KeyReport>,
    pub loaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows_written: usize,
}

impl RunSummary {
    /// A run fails overall when any key failed, even if others loaded.
    pub fn overall_failed(&self) -> bool {
        self.failed > 0
    }

    fn record(&mut self, report: KeyReport) {
        match report.outcome {
            KeyOutcome::Loaded => self.loaded += 1,
            KeyOutcome::Skipped => self.skipped += 1,
            KeyOutcome::Failed => self.failed += 1,
        }
        self.rows_written += report.rows_written;
        self.reports.push(report);
    }
}

/// Iterates the requested cross-product and reconciles every key.
pub struct BatchRunner<S, T> {
    reconciler: Reconciler<S, T>,
}

impl<S: SourceProvider, T: TableStore> BatchRunner<S, T> {
    pub fn new(reconciler: Reconciler<S, T>) -> Self {
        Self { reconciler }
    }

    /// Reconcile every (category, year, month) combination, in a fixed
    /// nested order: category outer, year middle, month inner.
    ///
    /// A failed key never aborts the run; its error is recorded in the
    /// summary and the remaining keys are still attempted.
    pub async fn run(&self, categories: &[Category], years: &[i32], months: &[u32]) -> RunSummary {
        let mut summary = RunSummary::default();

        for &category in categories {
            for &year in years {
                for &month in months {
                    let started = Instant::now();
                    let report = match self.reconcile_one(category, year, month).await {
                        Ok(LoadOutcome::Loaded { rows_written }) => KeyReport {
                            category,
                            year,
                            month,
                            outcome: KeyOutcome::Loaded,
                            rows_written,
                            error: None,
                            elapsed_secs: started.elapsed().as_secs_f64(),
                        },
                        Ok(LoadOutcome::Skipped) => KeyReport {
                            category,
                            year,
                            month,
                            outcome: KeyOutcome::Skipped,
                            rows_written: 0,
                            error: None,
                            elapsed_secs: started.elapsed().as_secs_f64(),
                        },
                        Err(e) => {
                            error!(%category, year, month, error = %e, "ingestion failed for key");
                            KeyReport {
                                category,
                                year,
                                month,
                                outcome: KeyOutcome::Failed,
                                rows_written: 0,
                                error: Some(e.to_string()),
                                elapsed_secs: started.elapsed().as_secs_f64(),
                            }
                        },
                    };
                    summary.record(report);
                }
            }
        }

        info!(
            loaded = summary.loaded,
            skipped = summary.skipped,
            failed = summary.failed,
            rows_written = summary.rows_written,
            "run complete"
        );

        summary
    }

    /// Validate one raw triple into a key and reconcile it.
    ///
    /// Key validation happens here so that an invalid triple fails its own
    /// key with `InvalidKey` without touching source or store.
    async fn reconcile_one(&self, category: Category, year: i32, month: u32) -> Result<LoadOutcome> {
        let key = IngestionKey::new(category, year, month)?;
        info!(%key, month_name = key.month_name(), "reconciling key");
        self.reconciler.reconcile(&key).await
    }
}
