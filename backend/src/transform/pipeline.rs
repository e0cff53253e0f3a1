//! One transformer run, from sources to destination.
//!
//! The steps are strictly ordered:
//!
//! 1. read every source into tables (row operations applied per sheet)
//! 2. apply `preprocess` to each table independently
//! 3. flatten all rows, keeping their origin
//! 4. evaluate every property chain against every row, in declaration order
//! 5. recombine into one table whose first row holds the property names
//! 6. apply `postprocess`
//! 7. write the destination
//!
//! # Example
//!
//! ```rust,ignore
//! use rebate_engine::transform::{pipeline, Context, PipelineOptions, TransformerConfig};
//!
//! let config = TransformerConfig::load(Path::new("transformers/acme.json")).await?;
//! let output = pipeline::run(&config, &ctx, &PipelineOptions::default()).await?;
//! println!("{} rows in {} ms", output.rows, output.result.duration_ms());
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::debug;

use super::config::{Properties, TransformerConfig};
use super::context::Context;
use super::dsl::{evaluate_cell_chain, evaluate_table_chain, SkippedRow};
use crate::api::logs::{log_info, log_info_indent, log_success, log_warning_indent};
use crate::error::{EvalResult, PipelineResult};
use crate::io::{read_source, write_destination, CalamineReader, WorkbookReader};
use crate::models::{Row, RunResult, Table};

/// Options for a transformer run
#[derive(Clone)]
pub struct PipelineOptions {
    /// Workbook extraction used by `excel` sources
    pub reader: Arc<dyn WorkbookReader>,

    /// Rows evaluated concurrently. Output order is always input order.
    pub row_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            reader: Arc::new(CalamineReader),
            row_concurrency: 1,
        }
    }
}

/// Result of one transformer run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub result: RunResult,

    /// File written by the destination
    pub destination: PathBuf,

    /// Data rows written, header excluded
    pub rows: usize,

    /// Rows dropped by recoverable errors
    pub skipped: Vec<SkippedRow>,
}

/// Run one transformer configuration against `ctx`.
///
/// Recoverable row errors skip the row; reference errors, source and
/// destination failures abort the transformer.
pub async fn run(config: &TransformerConfig, ctx: &Context, options: &PipelineOptions) -> PipelineResult<PipelineOutput> {
    let start = Utc::now();
    let mut skipped = Vec::new();

    // 1. Sources
    let mut tables = Vec::new();
    for source in &config.sources {
        let read = read_source(source, ctx, Arc::clone(&options.reader), &mut skipped).await?;
        tables.extend(read);
    }
    log_info_indent(format!("Read {} table(s)", tables.len()), 1);

    // 2. Preprocess each table on its own
    let mut preprocessed = Vec::with_capacity(tables.len());
    for table in tables {
        preprocessed.push(evaluate_table_chain(&config.preprocess, table, ctx, &mut skipped).await?);
    }

    // 3. Flatten
    let rows: Vec<Row> = preprocessed.into_iter().flat_map(|t| t.rows).collect();
    debug!(transformer = %config.name, rows = rows.len(), "Evaluating properties");

    // 4-5. Properties, recombined under a header row
    let origin = Arc::new(PathBuf::from(&config.name));
    let mut recombined = vec![Row::new(config.header(), Arc::clone(&origin))];

    let concurrency = options.row_concurrency.max(1);
    let mut evaluated = stream::iter(rows)
        .map(move |row| async move {
            let cells = evaluate_properties(&config.properties, &row, ctx).await;
            (row, cells)
        })
        .buffered(concurrency);

    while let Some((row, cells)) = evaluated.next().await {
        match cells {
            Ok(cells) => recombined.push(Row::new(cells, Arc::clone(&origin))),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => skipped.push(SkippedRow::new(&row, &e)),
        }
    }
    drop(evaluated);

    // 6. Postprocess
    let table = Table { origin, rows: recombined };
    let table = evaluate_table_chain(&config.postprocess, table, ctx, &mut skipped).await?;

    // 7. Destination
    let destination = write_destination(&config.destination, &ctx.directory, &config.name, &table).await?;

    for row in &skipped {
        log_warning_indent(format!("Skipped row from {}: {}", row.source, row.reason), 1);
    }

    let rows = table.len().saturating_sub(1);
    log_success(format!("{}: {} row(s) written, {} skipped", config.name, rows, skipped.len()));

    Ok(PipelineOutput {
        result: RunResult {
            name: config.name.clone(),
            start,
            end: Utc::now(),
        },
        destination,
        rows,
        skipped,
    })
}

/// Evaluate every property chain against one row.
pub async fn evaluate_properties(properties: &Properties, row: &Row, ctx: &Context) -> EvalResult<Vec<String>> {
    let mut cells = Vec::with_capacity(properties.len());
    for (_, chain) in properties.iter() {
        cells.push(evaluate_cell_chain(chain, row, ctx).await?);
    }
    Ok(cells)
}

/// Log the start of a transformer, as `[index/total] Running name...`.
pub fn announce(index: usize, total: usize, name: &str) {
    log_info(format!("[{}/{}] Running {}...", index + 1, total, name));
}
