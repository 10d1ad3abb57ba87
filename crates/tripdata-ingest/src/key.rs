//! Ingestion keys and table identity

use chrono::{Datelike, Month, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{IngestError, Result};

/// Earliest year the upstream host publishes monthly trip files for.
pub const EARLIEST_YEAR: i32 = 2019;

/// Dataset category of a monthly trip file.
///
/// Each category names its raw timestamp columns with its own prefix
/// (`lpep_pickup_datetime` for green, `tpep_pickup_datetime` for yellow);
/// the cleaner resolves them to canonical names using this enum rather
/// than probing renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Green,
    Yellow,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Green => "green",
            Category::Yellow => "yellow",
        }
    }

    /// Column prefix used by this category's raw timestamp columns.
    pub fn timestamp_prefix(&self) -> &'static str {
        match self {
            Category::Green => "lpep",
            Category::Yellow => "tpep",
        }
    }

    /// All categories in the reference deployment.
    pub fn all() -> [Category; 2] {
        [Category::Green, Category::Yellow]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "green" => Ok(Category::Green),
            "yellow" => Ok(Category::Yellow),
            other => Err(IngestError::InvalidKey(format!(
                "category must be green or yellow, got '{other}'"
            ))),
        }
    }
}

/// One unit of ingestion work: a (category, year, month) triple.
///
/// A key can only be constructed through [`IngestionKey::new`], so any key
/// reaching the pipeline has already passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IngestionKey {
    pub category: Category,
    pub year: i32,
    pub month: u32,
}

impl IngestionKey {
    /// Build a key, validating year range and month bounds.
    ///
    /// The year upper bound is the current year, exclusive, evaluated at
    /// request time; complete monthly files only exist for past years.
    pub fn new(category: Category, year: i32, month: u32) -> Result<Self> {
        let current_year = Utc::now().year();
        if year < EARLIEST_YEAR || year >= current_year {
            return Err(IngestError::InvalidKey(format!(
                "year must be between {EARLIEST_YEAR} and {}, got {year}",
                current_year - 1
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(IngestError::InvalidKey(format!(
                "month is out of range: {month}"
            )));
        }
        Ok(Self {
            category,
            year,
            month,
        })
    }

    /// Destination table for this key's (category, year) pair.
    ///
    /// All months of one category/year share a single table; this name is a
    /// persisted-state layout contract and must not change.
    pub fn table_name(&self) -> String {
        format!("{}_{}_tripdata", self.category, self.year)
    }

    /// Human-readable month name for progress logs.
    pub fn month_name(&self) -> &'static str {
        Month::try_from(self.month as u8)
            .map(|m| m.name())
            .unwrap_or("unknown")
    }
}

impl fmt::Display for IngestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{:02}", self.category, self.year, self.month)
    }
}
