//! Cleaning rules for raw monthly batches
//!
//! Each step is a total function over the batch and returns a new batch;
//! nothing is mutated in place. After cleaning, every remaining row has a
//! nonzero passenger count and pickup/dropoff timestamps that both resolve
//! to the requested (year, month).

use arrow::array::{AsArray, Float64Array, Int32Array};
use arrow::compute::kernels::boolean::{and, is_null, or_kleene};
use arrow::compute::kernels::cmp::{eq, neq};
use arrow::compute::kernels::temporal::{date_part, DatePart};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::{DataType, Float64Type, Int32Type};
use arrow::record_batch::RecordBatch;
use tracing::{debug, warn};

use crate::batch;
use crate::error::{IngestError, Result};
use crate::key::{Category, IngestionKey};

/// Passenger-count column carried by every monthly file.
pub const PASSENGER_COUNT: &str = "passenger_count";

/// Canonical pickup timestamp column name.
pub const PICKUP_DATETIME: &str = "pickup_datetime";

/// Canonical dropoff timestamp column name.
pub const DROPOFF_DATETIME: &str = "dropoff_datetime";

/// Clean a raw monthly batch for one ingestion key.
///
/// Steps, in order: drop zero-passenger rows, canonicalize the
/// category-specific timestamp column names, filter to rows whose dropoff
/// month matches the key, then filter on the pickup month as well (both
/// must match). The combined removed-row count is reported through tracing.
pub fn clean(raw: &RecordBatch, key: &IngestionKey) -> Result<RecordBatch> {
    let initial_rows = raw.num_rows();

    let batch = drop_zero_passenger_rows(raw)?;
    let batch = canonicalize_timestamp_columns(&batch, key.category)?;
    let batch = filter_to_key_month(&batch, DROPOFF_DATETIME, key)?;
    let batch = filter_to_key_month(&batch, PICKUP_DATETIME, key)?;

    let removed = initial_rows - batch.num_rows();
    debug!(%key, removed, kept = batch.num_rows(), "cleaned monthly batch");

    // Near-total removal points at a timestamp or schema problem upstream.
    if initial_rows > 0 && removed * 10 >= initial_rows * 9 {
        warn!(
            %key,
            removed,
            total = initial_rows,
            "cleaning removed nearly the whole batch; upstream file may be corrupt"
        );
    }

    Ok(batch)
}

/// Drop rows whose passenger count reads exactly zero.
///
/// Null counts are kept: only a definite zero marks a row as invalid.
fn drop_zero_passenger_rows(batch: &RecordBatch) -> Result<RecordBatch> {
    let column = batch.column_by_name(PASSENGER_COUNT).ok_or_else(|| {
        IngestError::SchemaMismatch(format!("column '{PASSENGER_COUNT}' is missing"))
    })?;

    // The column arrives as int64 in some files and float64 in others.
    let counts = cast(column, &DataType::Float64)?;
    let counts = counts.as_primitive::<Float64Type>();

    let nonzero = neq(counts, &Float64Array::new_scalar(0.0))?;
    let keep = or_kleene(&nonzero, &is_null(counts)?)?;

    filter_record_batch(batch, &keep).map_err(Into::into)
}

/// Rename the category-specific pickup/dropoff columns to canonical names.
///
/// The category decides which naming convention to expect; there is no
/// probing of alternatives. A batch that already carries the canonical
/// names passes through untouched, anything else is a data-contract
/// violation.
fn canonicalize_timestamp_columns(batch: &RecordBatch, category: Category) -> Result<RecordBatch> {
    let prefix = category.timestamp_prefix();
    let pickup_src = format!("{prefix}_pickup_datetime");
    let dropoff_src = format!("{prefix}_dropoff_datetime");

    if batch.column_by_name(&pickup_src).is_some() && batch.column_by_name(&dropoff_src).is_some() {
        return batch::rename_columns(
            batch,
            &[
                (pickup_src.as_str(), PICKUP_DATETIME),
                (dropoff_src.as_str(), DROPOFF_DATETIME),
            ],
        );
    }

    if batch.column_by_name(PICKUP_DATETIME).is_some()
        && batch.column_by_name(DROPOFF_DATETIME).is_some()
    {
        return Ok(batch.clone());
    }

    Err(IngestError::SchemaMismatch(format!(
        "expected '{pickup_src}'/'{dropoff_src}' or canonical timestamp columns in {category} data"
    )))
}

/// Keep rows whose timestamp in `column` falls in the key's (year, month).
///
/// Null timestamps compare as null and are dropped by the filter.
fn filter_to_key_month(batch: &RecordBatch, column: &str, key: &IngestionKey) -> Result<RecordBatch> {
    let timestamps = batch
        .column_by_name(column)
        .ok_or_else(|| IngestError::SchemaMismatch(format!("column '{column}' is missing")))?;

    let years = date_part(timestamps.as_ref(), DatePart::Year)?;
    let months = date_part(timestamps.as_ref(), DatePart::Month)?;

    let year_matches = eq(
        years.as_primitive::<Int32Type>(),
        &Int32Array::new_scalar(key.year),
    )?;
    let month_matches = eq(
        months.as_primitive::<Int32Type>(),
        &Int32Array::new_scalar(key.month as i32),
    )?;
    let keep = and(&year_matches, &month_matches)?;

    filter_record_batch(batch, &keep).map_err(Into::into)
}
