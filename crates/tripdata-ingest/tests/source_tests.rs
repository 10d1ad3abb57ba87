//! HTTP source provider tests against a local mock server

mod common;

use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::parquet_payload;
use tripdata_ingest::config::SourceConfig;
use tripdata_ingest::error::IngestError;
use tripdata_ingest::key::{Category, IngestionKey};
use tripdata_ingest::source::{HttpSource, SourceProvider};

fn source_for(server: &MockServer, max_retries: u32) -> HttpSource {
    let config = SourceConfig {
        base_url: format!("{}/trip-data", server.uri()),
        file_format: "parquet".to_string(),
        timeout_secs: 10,
        max_retries,
    };
    HttpSource::new(config).expect("valid source config")
}

fn mixed_case_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("VendorID", DataType::Int64, true),
        Field::new("Trip_Distance", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![Some(2), Some(1)])),
            Arc::new(Float64Array::from(vec![Some(1.2), Some(4.7)])),
        ],
    )
    .expect("valid batch")
}

#[tokio::test]
async fn fetch_uses_exact_url_shape_and_lowercases_columns() {
    let server = MockServer::start().await;
    let payload = parquet_payload(&mixed_case_batch());

    Mock::given(method("GET"))
        .and(path("/trip-data/yellow_tripdata_2022-03.parquet"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload))
        .expect(1)
        .mount(&server)
        .await;

    let source = source_for(&server, 1);
    let key = IngestionKey::new(Category::Yellow, 2022, 3).expect("valid key");

    let batch = source.fetch(&key).await.expect("fetch");
    assert_eq!(batch.num_rows(), 2);
    assert!(batch.column_by_name("vendorid").is_some());
    assert!(batch.column_by_name("trip_distance").is_some());
    assert!(batch.column_by_name("VendorID").is_none());
}

#[tokio::test]
async fn missing_file_is_source_unavailable() {
    let server = MockServer::start().await;
    // Nothing mounted: the server answers 404 for every path.

    let source = source_for(&server, 1);
    let key = IngestionKey::new(Category::Green, 2021, 7).expect("valid key");

    let err = source.fetch(&key).await.expect_err("must fail");
    assert!(matches!(err, IngestError::SourceUnavailable(_)));
}

#[tokio::test]
async fn malformed_payload_is_source_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trip-data/green_tripdata_2021-07.parquet"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"definitely not parquet".to_vec()))
        .mount(&server)
        .await;

    let source = source_for(&server, 1);
    let key = IngestionKey::new(Category::Green, 2021, 7).expect("valid key");

    let err = source.fetch(&key).await.expect_err("must fail");
    assert!(matches!(err, IngestError::SourceUnavailable(_)));
}

#[tokio::test]
async fn server_errors_are_retried_with_backoff() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trip-data/green_tripdata_2021-07.parquet"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let source = source_for(&server, 2);
    let key = IngestionKey::new(Category::Green, 2021, 7).expect("valid key");

    let err = source.fetch(&key).await.expect_err("must fail");
    assert!(matches!(err, IngestError::SourceUnavailable(_)));
    // The mock's expect(2) verifies both attempts arrived on drop.
}
