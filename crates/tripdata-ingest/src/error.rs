//! Error types for trip-data ingestion

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error taxonomy for the ingestion pipeline
///
/// Every failure for a key is recorded against that key in the run summary;
/// no variant is ever swallowed into a log line alone.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Bad category/year/month - caller error, never retried
    #[error("invalid ingestion key: {0}")]
    InvalidKey(String),

    /// Transient network or upstream failure - retryable with backoff
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Unexpected upstream column layout - not retryable
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Lost a table-creation race to a concurrent writer
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    /// Table missing where the caller expected one
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Batch incompatible with the destination table
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Store connectivity loss - retryable
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl IngestError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::SourceUnavailable(_) | IngestError::StoreUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::SourceUnavailable(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for IngestError {
    fn from(err: arrow::error::ArrowError) -> Self {
        IngestError::SchemaMismatch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(IngestError::SourceUnavailable("timeout".into()).is_retryable());
        assert!(IngestError::StoreUnavailable("connection reset".into()).is_retryable());
        assert!(!IngestError::InvalidKey("month 13".into()).is_retryable());
        assert!(!IngestError::SchemaMismatch("missing column".into()).is_retryable());
        assert!(!IngestError::TableAlreadyExists("green_2022_tripdata".into()).is_retryable());
    }
}
