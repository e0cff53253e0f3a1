//! DSL (Domain Specific Language) for rebate transformations
//!
//! This module provides:
//! - `cell`: operations producing one string from a row (folded into chains)
//! - `coerce`: date, number and dollar coercers behind `coerce`
//! - `row`: operations applied to each sheet as it is read
//! - `table`: operations applied to whole tables before and after the cell step
//! - `executor`: evaluation of all three families against a run context
//! - `operations`: the reference card printed by the CLI
//!
//! ## Example
//!
//! ```rust,ignore
//! use rebate_engine::transform::dsl::{evaluate_cell_chain, CellTransformation};
//!
//! let chain: Vec<CellTransformation> = serde_json::from_str(r#"[
//!     {"type": "column", "index": "B"},
//!     {"type": "coerce", "as": "usd"}
//! ]"#)?;
//! let total = evaluate_cell_chain(&chain, &row, &ctx).await?;
//! ```

pub mod cell;
pub mod coerce;
pub mod executor;
pub mod operations;
pub mod row;
pub mod table;

// Re-exports for convenience
pub use cell::{Action, CellTransformation, MetaValue};
pub use coerce::{Coercion, RoundMode, YearMode};
pub use executor::{
    evaluate_cell, evaluate_cell_chain, evaluate_row_chain, evaluate_rows, evaluate_table,
    evaluate_table_chain, SkippedRow,
};
pub use operations::{operations_description, EXAMPLE_TRANSFORMER};
pub use row::RowTransformation;
pub use table::{Keep, Otherwise, TableTransformation, Values};
