//! Record-batch helpers for the columnar monthly files

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::{IngestError, Result};

/// Decode a whole parquet payload into a single record batch.
///
/// The monthly files are small enough to hold in memory, and the cleaning
/// filters operate on the full month at once.
pub fn batch_from_parquet(payload: Bytes) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(payload)
        .map_err(|e| IngestError::SourceUnavailable(format!("malformed parquet payload: {e}")))?;
    let schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| IngestError::SourceUnavailable(format!("malformed parquet payload: {e}")))?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| IngestError::SourceUnavailable(format!("malformed parquet payload: {e}")))?;

    concat_batches(&schema, &batches)
        .map_err(|e| IngestError::SourceUnavailable(format!("malformed parquet payload: {e}")))
}

/// Lower-case every column name, keeping column order and data untouched.
pub fn lowercase_columns(batch: &RecordBatch) -> Result<RecordBatch> {
    let fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone().with_name(f.name().to_lowercase()))
        .collect();

    let schema = Arc::new(Schema::new(fields));
    RecordBatch::try_new(schema, batch.columns().to_vec()).map_err(Into::into)
}

/// Rename columns according to `renames` (old name -> new name).
///
/// Columns not named in `renames` are left alone; a missing old name is not
/// an error here - callers decide whether absence violates their contract.
pub fn rename_columns(batch: &RecordBatch, renames: &[(&str, &str)]) -> Result<RecordBatch> {
    let fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| {
            let name = renames
                .iter()
                .find(|(old, _)| old == f.name())
                .map(|(_, new)| new.to_string())
                .unwrap_or_else(|| f.name().clone());
            f.as_ref().clone().with_name(name)
        })
        .collect();

    let schema = Arc::new(Schema::new(fields));
    RecordBatch::try_new(schema, batch.columns().to_vec()).map_err(Into::into)
}
