//! Tripdata Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared ambient concerns for the tripdata workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all tripdata workspace
//! members:
//!
//! - **Logging**: Centralized tracing configuration (console/file, text/JSON)
//!
//! # Example
//!
//! ```no_run
//! use tripdata_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("pipeline starting");
//!     Ok(())
//! }
//! ```

pub mod logging;
