//! Destination table store
//!
//! Abstracts the relational store behind the pipeline: existence checks,
//! month-presence queries, and bulk create/append. The PostgreSQL
//! implementation chunks inserts for transaction-size control, but a whole
//! write is a single transaction - a failed chunk rolls back everything.

use std::collections::BTreeSet;
use std::time::Duration;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array,
    Int64Array, StringArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int32Type, Int64Type, Schema, TimeUnit,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use crate::clean::PICKUP_DATETIME;
use crate::config::{DatabaseConfig, DEFAULT_INSERT_CHUNK_ROWS};
use crate::error::{IngestError, Result};

/// PostgreSQL caps bind parameters per statement at u16::MAX.
const PG_BIND_LIMIT: usize = 65_535;

/// Destination store for cleaned monthly batches.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Whether `name` exists in the store.
    async fn table_exists(&self, name: &str) -> Result<bool>;

    /// Distinct calendar months already stored in the table's pickup
    /// timestamp column. Fails with `TableNotFound` if the table does not
    /// exist; callers must check existence first.
    async fn months_present(&self, name: &str) -> Result<BTreeSet<u32>>;

    /// Create `name` from the batch's schema and bulk-insert the batch.
    /// Fails with `TableAlreadyExists` when a concurrent writer won the
    /// creation race. Returns the number of rows written.
    async fn create_and_load(&self, name: &str, batch: &RecordBatch) -> Result<usize>;

    /// Bulk-insert into an existing table. Returns the number of rows
    /// written.
    async fn append(&self, name: &str, batch: &RecordBatch) -> Result<usize>;
}

#[async_trait]
impl<S: TableStore + ?Sized> TableStore for std::sync::Arc<S> {
    async fn table_exists(&self, name: &str) -> Result<bool> {
        (**self).table_exists(name).await
    }

    async fn months_present(&self, name: &str) -> Result<BTreeSet<u32>> {
        (**self).months_present(name).await
    }

    async fn create_and_load(&self, name: &str, batch: &RecordBatch) -> Result<usize> {
        (**self).create_and_load(name, batch).await
    }

    async fn append(&self, name: &str, batch: &RecordBatch) -> Result<usize> {
        (**self).append(name, batch).await
    }
}

/// PostgreSQL-backed table store.
pub struct PostgresTableStore {
    pool: PgPool,
    insert_chunk_rows: usize,
}

impl PostgresTableStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            insert_chunk_rows: DEFAULT_INSERT_CHUNK_ROWS,
        }
    }

    /// Override the rows-per-statement knob.
    pub fn with_chunk_rows(mut self, insert_chunk_rows: usize) -> Self {
        self.insert_chunk_rows = insert_chunk_rows.max(1);
        self
    }

    /// Connect using explicit database configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.connection_url())
            .await
            .map_err(|e| IngestError::StoreUnavailable(format!("connecting to postgres: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Get database connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TableStore for PostgresTableStore {
    async fn table_exists(&self, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_store_error(e, name))?;

        Ok(exists)
    }

    async fn months_present(&self, name: &str) -> Result<BTreeSet<u32>> {
        let query = format!(
            "SELECT DISTINCT EXTRACT(MONTH FROM {})::int FROM {} WHERE {} IS NOT NULL",
            quote_ident(PICKUP_DATETIME),
            quote_ident(name),
            quote_ident(PICKUP_DATETIME),
        );

        let months: Vec<i32> = sqlx::query_scalar(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_store_error(e, name))?;

        Ok(months
            .into_iter()
            .filter(|m| (1..=12).contains(m))
            .map(|m| m as u32)
            .collect())
    }

    async fn create_and_load(&self, name: &str, batch: &RecordBatch) -> Result<usize> {
        let ddl = create_table_sql(name, batch.schema().as_ref())?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_store_error(e, name))?;

        // No IF NOT EXISTS: a lost creation race must surface as
        // TableAlreadyExists so the reconciler can re-check month presence.
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_store_error(e, name))?;

        let rows = insert_chunks(&mut tx, name, batch, self.insert_chunk_rows).await?;

        tx.commit().await.map_err(|e| map_store_error(e, name))?;

        info!(table = name, rows, "created table and loaded initial batch");
        Ok(rows)
    }

    async fn append(&self, name: &str, batch: &RecordBatch) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_store_error(e, name))?;

        let rows = insert_chunks(&mut tx, name, batch, self.insert_chunk_rows).await?;

        tx.commit().await.map_err(|e| map_store_error(e, name))?;

        info!(table = name, rows, "appended batch");
        Ok(rows)
    }
}

/// Map a sqlx error onto the store taxonomy using the SQLSTATE code.
fn map_store_error(err: sqlx::Error, table: &str) -> IngestError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            // duplicate_table
            Some("42P07") => return IngestError::TableAlreadyExists(table.to_string()),
            // undefined_table
            Some("42P01") => return IngestError::TableNotFound(table.to_string()),
            // integrity violations and type/column mismatches
            Some(code) if code.starts_with("23") || code == "42804" || code == "42703" => {
                return IngestError::ConstraintViolation(format!("{table}: {}", db.message()));
            },
            _ => {},
        }
    }

    IngestError::StoreUnavailable(format!("{table}: {err}"))
}

/// Quote a SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build CREATE TABLE DDL from an arrow schema.
fn create_table_sql(name: &str, schema: &Schema) -> Result<String> {
    let mut columns = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let pg_type = pg_type_for(field.data_type()).ok_or_else(|| {
            IngestError::ConstraintViolation(format!(
                "column '{}' has no postgres mapping for arrow type {:?}",
                field.name(),
                field.data_type()
            ))
        })?;
        columns.push(format!("{} {}", quote_ident(field.name()), pg_type));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_ident(name),
        columns.join(", ")
    ))
}

/// PostgreSQL column type for an arrow data type.
fn pg_type_for(data_type: &DataType) -> Option<&'static str> {
    match data_type {
        DataType::Boolean => Some("BOOLEAN"),
        DataType::Int32 => Some("INTEGER"),
        DataType::Int64 => Some("BIGINT"),
        DataType::Float32 => Some("REAL"),
        DataType::Float64 => Some("DOUBLE PRECISION"),
        DataType::Utf8 => Some("TEXT"),
        DataType::Timestamp(_, None) => Some("TIMESTAMP"),
        DataType::Timestamp(_, Some(_)) => Some("TIMESTAMPTZ"),
        DataType::Date32 => Some("DATE"),
        _ => None,
    }
}

/// Rows per statement that keep `rows * columns` under the bind limit.
fn effective_chunk_rows(configured: usize, num_columns: usize) -> usize {
    let max_rows = (PG_BIND_LIMIT / num_columns.max(1)).max(1);
    configured.clamp(1, max_rows)
}

/// Bulk-insert a batch in chunks inside the caller's transaction.
async fn insert_chunks(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    batch: &RecordBatch,
    chunk_rows: usize,
) -> Result<usize> {
    if batch.num_rows() == 0 {
        return Ok(0);
    }

    let writers = batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, column)| ColumnWriter::try_new(field.name(), field.data_type(), column))
        .collect::<Result<Vec<_>>>()?;

    let column_list = batch
        .schema()
        .fields()
        .iter()
        .map(|f| quote_ident(f.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_prefix = format!("INSERT INTO {} ({}) ", quote_ident(name), column_list);

    let chunk_rows = effective_chunk_rows(chunk_rows, batch.num_columns());
    let total_chunks = (batch.num_rows() + chunk_rows - 1) / chunk_rows;
    let mut written = 0usize;

    for (chunk_idx, start) in (0..batch.num_rows()).step_by(chunk_rows).enumerate() {
        let end = (start + chunk_rows).min(batch.num_rows());
        debug!(
            table = name,
            chunk = chunk_idx + 1,
            total_chunks,
            rows = end - start,
            "inserting chunk"
        );

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert_prefix);
        query_builder.push_values(start..end, |mut b, row| {
            for writer in &writers {
                writer.bind(&mut b, row);
            }
        });

        query_builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(|e| map_store_error(e, name))?;

        written += end - start;
    }

    Ok(written)
}

/// Typed view over one batch column for row-wise binding.
enum ColumnWriter {
    Bool(BooleanArray),
    Int32(Int32Array),
    Int64(Int64Array),
    Float32(Float32Array),
    Float64(Float64Array),
    Text(StringArray),
    TimestampSecond(TimestampSecondArray),
    TimestampMillisecond(TimestampMillisecondArray),
    TimestampMicrosecond(TimestampMicrosecondArray),
    TimestampNanosecond(TimestampNanosecondArray),
    Date(Date32Array),
}

impl ColumnWriter {
    fn try_new(name: &str, data_type: &DataType, column: &ArrayRef) -> Result<Self> {
        let writer = match data_type {
            DataType::Boolean => Self::Bool(column.as_boolean().clone()),
            DataType::Int32 => Self::Int32(column.as_primitive::<Int32Type>().clone()),
            DataType::Int64 => Self::Int64(column.as_primitive::<Int64Type>().clone()),
            DataType::Float32 => Self::Float32(column.as_primitive::<Float32Type>().clone()),
            DataType::Float64 => Self::Float64(column.as_primitive::<Float64Type>().clone()),
            DataType::Utf8 => Self::Text(column.as_string::<i32>().clone()),
            DataType::Timestamp(TimeUnit::Second, _) => {
                Self::TimestampSecond(column.as_primitive::<TimestampSecondType>().clone())
            },
            DataType::Timestamp(TimeUnit::Millisecond, _) => {
                Self::TimestampMillisecond(column.as_primitive::<TimestampMillisecondType>().clone())
            },
            DataType::Timestamp(TimeUnit::Microsecond, _) => {
                Self::TimestampMicrosecond(column.as_primitive::<TimestampMicrosecondType>().clone())
            },
            DataType::Timestamp(TimeUnit::Nanosecond, _) => {
                Self::TimestampNanosecond(column.as_primitive::<TimestampNanosecondType>().clone())
            },
            DataType::Date32 => Self::Date(column.as_primitive::<Date32Type>().clone()),
            other => {
                return Err(IngestError::ConstraintViolation(format!(
                    "column '{name}' has no postgres mapping for arrow type {other:?}"
                )))
            },
        };

        Ok(writer)
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, row: usize) {
        match self {
            Self::Bool(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            },
            Self::Int32(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            },
            Self::Int64(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            },
            Self::Float32(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            },
            Self::Float64(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            },
            Self::Text(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row).to_string()));
            },
            Self::TimestampSecond(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value_as_datetime(row)).flatten());
            },
            Self::TimestampMillisecond(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value_as_datetime(row)).flatten());
            },
            Self::TimestampMicrosecond(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value_as_datetime(row)).flatten());
            },
            Self::TimestampNanosecond(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value_as_datetime(row)).flatten());
            },
            Self::Date(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value_as_date(row)).flatten());
            },
        }
    }
}
