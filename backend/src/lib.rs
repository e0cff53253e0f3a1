//! # Rebate engine - declarative transformation of tabular rebate records
//!
//! The engine reads spreadsheet extracts, reshapes every record through a
//! user-authored transformer configuration, resolves ambiguous values against
//! growable reference tables (asking a human when a value is unknown), writes
//! CSV output and reconciles it against previously accepted records.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Workbooks  │────▶│  Pipeline   │────▶│     CSV     │────▶│  Reconcile  │
//! │ (per group) │     │ (DSL + refs)│     │ destination │     │  vs truth   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                            │ ▲
//!                      question│ │answer
//!                            ▼ │
//!                     ┌─────────────┐
//!                     │   Runner    │◀──── CLI / HTTP control
//!                     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rebate_engine::{Engine, EngineOptions, Event, Quarter, RunSettings, Status};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (engine, _task) = Engine::spawn(EngineOptions::default());
//!     let mut events = engine.subscribe();
//!     engine.start(RunSettings::new("data", 2024, Quarter::new(1).unwrap())).unwrap();
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             Event::Question { question } => engine.answer(question.hash, None).unwrap(),
//!             Event::Status { status } if status.is_terminal() => break,
//!             Event::Status { .. } => {}
//!         }
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Rows, tables, quarters and run results
//! - [`parser`] - CSV reading and writing with auto-detection
//! - [`transform`] - DSL, transformer configuration and pipeline
//! - [`reference`] - Reference tables and the ask-once resolution flow
//! - [`ask`] - Question broker between the engine and a human
//! - [`io`] - Workbook sources and CSV destinations
//! - [`validation`] - Transformer schema validation
//! - [`reconcile`] - Comparison of output against accepted records
//! - [`runner`] - Run orchestration and status machine
//! - [`report`] - Text report of a finished run
//! - [`api`] - HTTP API server and log stream

// Core modules
pub mod error;
pub mod models;

// Parsing
pub mod parser;

// Transformation
pub mod transform;

// References
pub mod ask;
pub mod reference;

// Sources and destinations
pub mod io;

// Validation
pub mod validation;

// Reconciliation
pub mod reconcile;

// Orchestration
pub mod report;
pub mod runner;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, CsvError, EvalError, PipelineError, ReferenceError, RunError, SchemaViolation,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    ColumnIndex, ConfigFailure, DiscrepancyResult, IgnoredRow, Quarter, Row, RunResult,
    RunResults, Table,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{is_valid, validate, validate_transformer, TRANSFORMER_SCHEMA};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes_auto, read_file_auto,
    CsvDocument, Record,
};

// =============================================================================
// Re-exports - Transformation
// =============================================================================

pub use transform::dsl::{
    operations_description, CellTransformation, RowTransformation, SkippedRow,
    TableTransformation,
};
pub use transform::{Context, TransformerConfig};
pub use transform::pipeline::{PipelineOptions, PipelineOutput};

// =============================================================================
// Re-exports - References
// =============================================================================

pub use ask::{Asker, NoAnswer, Question, QuestionBroker};
pub use reference::{ReferenceStore, ReferenceTable};

// =============================================================================
// Re-exports - Orchestration
// =============================================================================

pub use reconcile::{compare, compare_directory, compare_files, CompareOptions};
pub use runner::{Engine, EngineHandle, EngineOptions, Event, RunSettings, Status};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server};
}
