//! Domain models for the rebate transformation engine.
//!
//! This module contains the core data structures used throughout a run:
//!
//! - [`Table`] / [`Row`] - index-addressed string grids flowing through the pipeline
//! - [`ColumnIndex`] - a column address, written as a number or spreadsheet letters
//! - [`Quarter`] - fiscal quarter of the run
//! - [`RunResult`] / [`RunResults`] - per-configuration timing and the run report
//! - [`DiscrepancyResult`] - reconciliation output for one partition

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};

// =============================================================================
// Rows and Tables
// =============================================================================

/// One row of string cells.
///
/// The row remembers which file it was read from so `meta` operations can
/// report it after tables are flattened together.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub cells: Vec<String>,
    pub origin: Arc<PathBuf>,
}

impl Row {
    pub fn new(cells: Vec<String>, origin: Arc<PathBuf>) -> Self {
        Self { cells, origin }
    }

    /// Get the cell at `index`, failing when the row is too short.
    pub fn cell(&self, index: ColumnIndex) -> EvalResult<&str> {
        self.cells
            .get(index.get())
            .map(String::as_str)
            .ok_or(EvalError::MissingColumn {
                index: index.get(),
                width: self.cells.len(),
            })
    }

    /// File name of the table this row came from.
    pub fn source_name(&self) -> String {
        self.origin
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// An ordered sequence of rows read from (or destined for) one place.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub origin: Arc<PathBuf>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Build a table from a raw string grid.
    pub fn from_grid(origin: impl Into<PathBuf>, grid: Vec<Vec<String>>) -> Self {
        let origin = Arc::new(origin.into());
        let rows = grid
            .into_iter()
            .map(|cells| Row::new(cells, Arc::clone(&origin)))
            .collect();
        Self { origin, rows }
    }

    /// A new table with the same origin and different rows.
    pub fn with_rows(&self, rows: Vec<Row>) -> Self {
        Self {
            origin: Arc::clone(&self.origin),
            rows,
        }
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy the cells out as a plain grid.
    pub fn to_grid(&self) -> Vec<Vec<String>> {
        self.rows.iter().map(|r| r.cells.clone()).collect()
    }
}

// =============================================================================
// Column Index
// =============================================================================

/// Zero-based column address.
///
/// Deserializes from a non-negative integer (`0`), a digit string (`"0"`)
/// or spreadsheet letters (`"A"` = 0, `"Z"` = 25, `"AA"` = 26).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawColumn", into = "usize")]
pub struct ColumnIndex(usize);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawColumn {
    Number(u64),
    Text(String),
}

impl ColumnIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    /// Parse spreadsheet letters or a decimal index.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("column index cannot be empty".to_string());
        }

        if text.chars().all(|c| c.is_ascii_digit()) {
            return text
                .parse::<usize>()
                .map(Self)
                .map_err(|e| format!("invalid column index '{}': {}", text, e));
        }

        if !text.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("invalid column index '{}'", text));
        }

        let mut value: usize = 0;
        for c in text.chars() {
            let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
            value = value
                .checked_mul(26)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| format!("column index '{}' is too large", text))?;
        }
        Ok(Self(value - 1))
    }
}

impl TryFrom<RawColumn> for ColumnIndex {
    type Error = String;

    fn try_from(raw: RawColumn) -> Result<Self, Self::Error> {
        match raw {
            RawColumn::Number(n) => usize::try_from(n)
                .map(Self)
                .map_err(|_| format!("column index {} is too large", n)),
            RawColumn::Text(s) => Self::parse(&s),
        }
    }
}

impl From<ColumnIndex> for usize {
    fn from(index: ColumnIndex) -> Self {
        index.0
    }
}

impl fmt::Display for ColumnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quarter
// =============================================================================

/// Fiscal quarter, always in `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quarter(u8);

impl Quarter {
    pub fn new(number: u8) -> Option<Self> {
        (1..=4).contains(&number).then_some(Self(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Last calendar day of this quarter in `year`.
    pub fn last_day(self, year: i32) -> Option<NaiveDate> {
        let (month, day) = match self.0 {
            1 => (3, 31),
            2 => (6, 30),
            3 => (9, 30),
            _ => (12, 31),
        };
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

impl TryFrom<u8> for Quarter {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("quarter must be 1-4, got {}", value))
    }
}

impl From<Quarter> for u8 {
    fn from(q: Quarter) -> Self {
        q.0
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

// =============================================================================
// Run Results
// =============================================================================

/// Timing for one transformer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RunResult {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// A configuration that could not finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFailure {
    pub name: String,
    pub reason: String,
}

/// A row skipped because of a recoverable evaluation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoredRow {
    pub transformer: String,
    pub source: String,
    pub reason: String,
}

/// Reconciliation output for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyResult {
    pub name: String,
    /// Expected records missing from the output.
    pub additions: Vec<String>,
    /// Output records missing from the expected set.
    pub removals: Vec<String>,
}

impl DiscrepancyResult {
    pub fn is_clean(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Everything a run produced, carried by the `done` status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub config: Vec<RunResult>,
    pub failures: Vec<ConfigFailure>,
    pub ignored: Vec<IgnoredRow>,
    pub discrepancy: Option<Vec<DiscrepancyResult>>,
}
