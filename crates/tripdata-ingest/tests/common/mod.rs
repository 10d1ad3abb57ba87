//! Common test utilities: batch builders, a scripted source provider, and
//! an in-memory table store mirroring the postgres semantics.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{Array, AsArray, Float64Array, TimestampMicrosecondArray};
use arrow::compute::kernels::temporal::{date_part, DatePart};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parquet::arrow::ArrowWriter;

use tripdata_ingest::clean::{DROPOFF_DATETIME, PASSENGER_COUNT, PICKUP_DATETIME};
use tripdata_ingest::error::{IngestError, Result};
use tripdata_ingest::key::{Category, IngestionKey};
use tripdata_ingest::source::SourceProvider;
use tripdata_ingest::store::TableStore;

/// Microseconds since epoch for a `YYYY-MM-DD HH:MM:SS` literal.
pub fn micros(ts: &str) -> i64 {
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
        .expect("valid test timestamp")
        .and_utc()
        .timestamp_micros()
}

fn timestamp_field(name: impl Into<String>) -> Field {
    Field::new(name, DataType::Timestamp(TimeUnit::Microsecond, None), true)
}

fn build_batch(
    pickup_name: String,
    dropoff_name: String,
    rows: &[(Option<f64>, &str, &str)],
) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new(PASSENGER_COUNT, DataType::Float64, true),
        timestamp_field(pickup_name),
        timestamp_field(dropoff_name),
        Field::new("fare_amount", DataType::Float64, true),
    ]));

    let passengers: Float64Array = rows.iter().map(|(p, _, _)| *p).collect();
    let pickups: TimestampMicrosecondArray =
        rows.iter().map(|(_, p, _)| Some(micros(p))).collect();
    let dropoffs: TimestampMicrosecondArray =
        rows.iter().map(|(_, _, d)| Some(micros(d))).collect();
    let fares: Float64Array = rows.iter().map(|_| Some(12.5)).collect();

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(passengers),
            Arc::new(pickups),
            Arc::new(dropoffs),
            Arc::new(fares),
        ],
    )
    .expect("valid test batch")
}

/// A raw monthly batch shaped like the upstream files for `category`:
/// prefixed timestamp columns plus passenger and fare columns. Rows are
/// (passenger_count, pickup, dropoff) triples.
pub fn raw_batch(category: Category, rows: &[(Option<f64>, &str, &str)]) -> RecordBatch {
    let prefix = category.timestamp_prefix();
    build_batch(
        format!("{prefix}_pickup_datetime"),
        format!("{prefix}_dropoff_datetime"),
        rows,
    )
}

/// A batch already carrying the canonical timestamp column names.
pub fn canonical_batch(rows: &[(Option<f64>, &str, &str)]) -> RecordBatch {
    build_batch(PICKUP_DATETIME.to_string(), DROPOFF_DATETIME.to_string(), rows)
}

/// Serialize a batch into an in-memory parquet payload.
pub fn parquet_payload(batch: &RecordBatch) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut payload, batch.schema(), None).expect("parquet writer");
    writer.write(batch).expect("write batch");
    writer.close().expect("close writer");
    payload
}

/// Distinct months of a timestamp column.
pub fn distinct_months(batch: &RecordBatch, column: &str) -> BTreeSet<u32> {
    let timestamps = batch.column_by_name(column).expect("timestamp column");
    let months = date_part(timestamps.as_ref(), DatePart::Month).expect("temporal column");
    let months = months.as_primitive::<Int32Type>();

    (0..months.len())
        .filter(|i| months.is_valid(*i))
        .map(|i| months.value(i) as u32)
        .collect()
}

// ============================================================================
// Scripted Source Provider
// ============================================================================

/// Source provider serving pre-built batches and counting fetches.
pub struct ScriptedSource {
    batches: HashMap<IngestionKey, RecordBatch>,
    failure: Option<String>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            batches: HashMap::new(),
            failure: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// A provider that fails every fetch with `SourceUnavailable`.
    pub fn failing(message: &str) -> Self {
        Self {
            batches: HashMap::new(),
            failure: Some(message.to_string()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_batch(mut self, key: IngestionKey, batch: RecordBatch) -> Self {
        self.batches.insert(key, batch);
        self
    }

    /// How many times fetch was invoked, across all keys.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceProvider for ScriptedSource {
    async fn fetch(&self, key: &IngestionKey) -> Result<RecordBatch> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure {
            return Err(IngestError::SourceUnavailable(message.clone()));
        }

        self.batches
            .get(key)
            .cloned()
            .ok_or_else(|| IngestError::SourceUnavailable(format!("no scripted batch for {key}")))
    }
}

// ============================================================================
// In-Memory Table Store
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct StoredTable {
    pub rows: usize,
    pub months: BTreeSet<u32>,
}

/// In-memory table store with the same per-operation semantics as the
/// postgres store: create fails on an existing table, append fails on a
/// missing one, and month presence tracks the pickup column only.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, StoredTable>>,
    race: Mutex<Option<(String, u32)>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a concurrent writer that creates `table` holding `month`
    /// just before our own create_and_load lands.
    pub fn with_create_race(table: &str, month: u32) -> Self {
        let store = Self::default();
        *store.race.lock().unwrap() = Some((table.to_string(), month));
        store
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows)
            .unwrap_or(0)
    }

    pub fn months(&self, table: &str) -> BTreeSet<u32> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.months.clone())
            .unwrap_or_default()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(name))
    }

    async fn months_present(&self, name: &str) -> Result<BTreeSet<u32>> {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .map(|t| t.months.clone())
            .ok_or_else(|| IngestError::TableNotFound(name.to_string()))
    }

    async fn create_and_load(&self, name: &str, batch: &RecordBatch) -> Result<usize> {
        {
            let mut race = self.race.lock().unwrap();
            if race.as_ref().is_some_and(|(table, _)| table == name) {
                let (_, month) = race.take().expect("race entry present");
                let mut tables = self.tables.lock().unwrap();
                let entry = tables.entry(name.to_string()).or_default();
                entry.rows += 50;
                entry.months.insert(month);
                return Err(IngestError::TableAlreadyExists(name.to_string()));
            }
        }

        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(name) {
            return Err(IngestError::TableAlreadyExists(name.to_string()));
        }

        tables.insert(
            name.to_string(),
            StoredTable {
                rows: batch.num_rows(),
                months: distinct_months(batch, PICKUP_DATETIME),
            },
        );
        Ok(batch.num_rows())
    }

    async fn append(&self, name: &str, batch: &RecordBatch) -> Result<usize> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| IngestError::TableNotFound(name.to_string()))?;

        table.rows += batch.num_rows();
        table.months.extend(distinct_months(batch, PICKUP_DATETIME));
        Ok(batch.num_rows())
    }
}
