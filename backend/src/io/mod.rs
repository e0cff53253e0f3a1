//! Source and destination adapters.
//!
//! - [`source`] - workbook discovery and extraction into [`Table`](crate::models::Table)s
//! - [`destination`] - CSV output of the final table

pub mod destination;
pub mod source;

pub use destination::{destination_path, write_destination};
pub use source::{list_files, read_source, source_files, source_pattern, CalamineReader, Sheet, WorkbookReader};
