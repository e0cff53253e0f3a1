//! Error types for the rebate transformation engine.
//!
//! The hierarchy follows the layers of a run:
//!
//! - [`CsvError`] - CSV decoding and parsing errors
//! - [`ConfigError`] - transformer configuration errors (fatal before any row runs)
//! - [`EvalError`] - row-level evaluation errors (recoverable, except references)
//! - [`ReferenceError`] - reference table lookups, loads and persistence
//! - [`PipelineError`] - one transformer run
//! - [`RunError`] - orchestration of a whole run
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors while reading or writing CSV files.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read or write the file.
    #[error("Failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid CSV content.
    #[error("Invalid CSV in '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The file holds no header row.
    #[error("CSV file '{}' has no header row", path.display())]
    NoHeaders { path: PathBuf },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// One schema violation, located by its JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value (`""` for the document root).
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors in a transformer configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read configuration '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON or a value serde could not map.
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document violates the configuration schema.
    #[error("Configuration does not match schema: {}", join_violations(.violations))]
    Schema { violations: Vec<SchemaViolation> },

    /// A value passed the schema but cannot be used.
    #[error("Invalid value at '{path}': {message}")]
    InvalidValue { path: String, message: String },
}

// =============================================================================
// Reference Errors
// =============================================================================

/// Errors from the reference resolution subsystem.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// Nobody answered the question for a missing entry.
    #[error("Table '{table}' has no item '{value}' for '{match_column}'")]
    Missing {
        table: String,
        value: String,
        match_column: String,
    },

    /// Failed to load or persist the table.
    #[error("Reference table error: {0}")]
    Csv(#[from] CsvError),
}

// =============================================================================
// Evaluation Errors
// =============================================================================

/// Errors while evaluating a transformation against one row.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The row has no cell at this index.
    #[error("There is no data in column {} (row has {width} cells)", index + 1)]
    MissingColumn { index: usize, width: usize },

    /// The value is not a number.
    #[error("'{value}' is not a number")]
    InvalidNumber { value: String },

    /// The value is not a valid calendar date.
    #[error("Date '{value}' could not be parsed")]
    InvalidDate { value: String },

    /// Decimal arithmetic left the representable range.
    #[error("'{value}' overflows a decimal")]
    Overflow { value: String },

    /// Division of a value by zero.
    #[error("Cannot divide '{value}' by zero")]
    DivisionByZero { value: String },

    /// A filter chain produced something other than `true`/`false`.
    #[error("Filter criteria produced '{value}', expected 'true' or 'false'")]
    NotBoolean { value: String },

    /// A reference lookup failed. Fatal for the whole transformer.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

impl EvalError {
    /// Whether the error must abort the transformer instead of skipping the row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::Reference(_))
    }
}

// =============================================================================
// Pipeline Errors
// =============================================================================

/// Errors from a single transformer run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source could not be read.
    #[error("Source '{}' failed: {message}", path.display())]
    Source { path: PathBuf, message: String },

    /// The destination could not be written.
    #[error("Destination error: {0}")]
    Destination(#[from] CsvError),

    /// A fatal evaluation error (unanswered reference).
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),
}

impl From<ReferenceError> for PipelineError {
    fn from(err: ReferenceError) -> Self {
        PipelineError::Evaluation(EvalError::Reference(err))
    }
}

// =============================================================================
// Run Errors (top-level)
// =============================================================================

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum RunError {
    /// A run was requested while another one is active.
    #[error("A run is already in progress")]
    AlreadyRunning,

    /// Cancel was requested with no run in progress.
    #[error("No run is in progress")]
    NotRunning,

    /// The engine task is gone.
    #[error("The engine has shut down")]
    EngineStopped,

    /// Invalid run settings.
    #[error("Invalid settings: {0}")]
    Settings(String),

    /// Failed to list files.
    #[error("Failed to list '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    /// CSV error outside of a transformer (e.g. while scoring).
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for configuration parsing.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for cell/row/table evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Result type for reference resolution.
pub type ReferenceResult<T> = Result<T, ReferenceError>;

/// Result type for transformer runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for orchestration.
pub type RunnerResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // ReferenceError -> PipelineError keeps the reference message
        let err = ReferenceError::Missing {
            table: "members".into(),
            value: "ACME".into(),
            match_column: "name".into(),
        };
        let pipeline_err: PipelineError = err.into();
        let msg = pipeline_err.to_string();
        assert!(msg.contains("members"));
        assert!(msg.contains("ACME"));
    }

    #[test]
    fn test_only_reference_errors_are_fatal() {
        let bad_date = EvalError::InvalidDate { value: "13/45/2024".into() };
        assert!(!bad_date.is_fatal());

        let missing = EvalError::from(ReferenceError::Missing {
            table: "t".into(),
            value: "v".into(),
            match_column: "m".into(),
        });
        assert!(missing.is_fatal());
    }

    #[test]
    fn test_schema_violation_format() {
        let err = ConfigError::Schema {
            violations: vec![
                SchemaViolation { path: "/properties/total/1/as".into(), message: "bad".into() },
                SchemaViolation { path: String::new(), message: "root".into() },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("/properties/total/1/as: bad"));
        assert!(msg.contains("/: root"));
    }

    #[test]
    fn test_missing_column_is_one_based() {
        let err = EvalError::MissingColumn { index: 2, width: 1 };
        assert!(err.to_string().contains("column 3"));
    }
}
