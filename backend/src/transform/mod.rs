//! Transformation module.
//!
//! This module turns source tables into destination tables:
//! - DSL: cell, row and table operations and their executor
//! - Config: the transformer configuration file
//! - Context: run-wide state shared by every evaluation
//! - Pipeline: one transformer run, sources to destination

pub mod config;
pub mod context;
pub mod dsl;
pub mod pipeline;

pub use config::{Destination, Properties, Source, TransformerConfig};
pub use context::{Context, Counter};
pub use dsl::*;
pub use pipeline::*;
