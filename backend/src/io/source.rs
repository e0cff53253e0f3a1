//! Sources: materialize tables from workbooks on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::models::Table;
use crate::transform::config::Source;
use crate::transform::context::Context;
use crate::transform::dsl::{evaluate_row_chain, SkippedRow};

/// One sheet of a workbook as a raw string grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Reads workbooks into string grids.
///
/// `sheets` selects sheets by name; `None` reads every sheet in workbook
/// order. Blank rows are not returned.
pub trait WorkbookReader: Send + Sync {
    fn read(&self, path: &Path, sheets: Option<&[String]>) -> PipelineResult<Vec<Sheet>>;
}

/// [`WorkbookReader`] backed by calamine (xlsx, xlsm, xlsb, xls, ods).
#[derive(Debug, Default, Clone, Copy)]
pub struct CalamineReader;

impl WorkbookReader for CalamineReader {
    fn read(&self, path: &Path, sheets: Option<&[String]>) -> PipelineResult<Vec<Sheet>> {
        let source_err = |message: String| PipelineError::Source {
            path: path.to_path_buf(),
            message,
        };

        let mut workbook = open_workbook_auto(path).map_err(|e| source_err(e.to_string()))?;
        let available = workbook.sheet_names();
        let names: Vec<String> = match sheets {
            Some(wanted) => wanted.to_vec(),
            None => available.clone(),
        };

        let mut result = Vec::with_capacity(names.len());
        for name in names {
            if !available.contains(&name) {
                return Err(source_err(format!("Sheet '{}' does not exist on workbook", name)));
            }
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| source_err(format!("Sheet '{}': {}", name, e)))?;

            // calamine ranges start at the first used cell; pad back to column A.
            let offset = range.start().map(|(_, col)| col as usize).unwrap_or(0);
            let rows = range
                .rows()
                .filter(|cells| cells.iter().any(|c| !matches!(c, Data::Empty)))
                .map(|cells| {
                    std::iter::repeat(String::new())
                        .take(offset)
                        .chain(cells.iter().map(cell_text))
                        .collect()
                })
                .collect();

            result.push(Sheet { name, rows });
        }
        Ok(result)
    }
}

/// Raw text of a cell. Dates stay as their serial number.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::Error(e) => e.to_string(),
    }
}

/// Glob pattern matched by an Excel source for the run's year and quarter.
pub fn source_pattern(directory: &Path, group: &str, subgroup: &str, year: i32, quarter: u8) -> PathBuf {
    directory
        .join(group)
        .join(subgroup)
        .join(year.to_string())
        .join(format!("Q{}", quarter))
        .join("**")
        .join("*")
}

/// Regular files matching `pattern`, sorted.
pub fn list_files(pattern: &Path) -> Result<Vec<PathBuf>, glob::PatternError> {
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable path");
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Files an Excel source will read for this run.
pub fn source_files(source: &Source, ctx: &Context) -> PipelineResult<Vec<PathBuf>> {
    match source {
        Source::Excel { group, subgroup, .. } => {
            let pattern = source_pattern(&ctx.directory, group, subgroup, ctx.year, ctx.quarter.number());
            list_files(&pattern).map_err(|e| PipelineError::Source {
                path: pattern.clone(),
                message: e.to_string(),
            })
        }
    }
}

/// Read every table of a source, applying its row operations per sheet.
pub async fn read_source(
    source: &Source,
    ctx: &Context,
    reader: Arc<dyn WorkbookReader>,
    skipped: &mut Vec<SkippedRow>,
) -> PipelineResult<Vec<Table>> {
    let files = source_files(source, ctx)?;
    let Source::Excel { sheets, rows, .. } = source;

    let mut tables = Vec::new();
    for file in files {
        let read = {
            let reader = Arc::clone(&reader);
            let path = file.clone();
            let sheets = sheets.clone();
            tokio::task::spawn_blocking(move || reader.read(&path, sheets.as_deref()))
                .await
                .map_err(|e| PipelineError::Source {
                    path: file.clone(),
                    message: e.to_string(),
                })??
        };

        for sheet in read {
            let raw = sheet.rows.len();
            let table = Table::from_grid(file.clone(), sheet.rows);
            let table = evaluate_row_chain(rows, table, ctx, skipped).await?;
            debug!(file = %file.display(), sheet = %sheet.name, raw, kept = table.len(), "Sheet read");
            tables.push(table);
        }
    }

    info!(tables = tables.len(), "Source read");
    Ok(tables)
}
