//! CSV reading and writing with encoding and delimiter auto-detection.
//!
//! Used for reference tables, reconciliation inputs and destinations.
//! Nothing here knows about transformations.

use std::path::Path;

use csv::{ReaderBuilder, Terminator, WriterBuilder};
use indexmap::IndexMap;

use crate::error::{CsvError, CsvResult};

/// A record keyed by header name, in header order.
pub type Record = IndexMap<String, String>;

/// A decoded CSV file.
#[derive(Debug, Clone, Default)]
pub struct CsvDocument {
    /// Column headers
    pub headers: Vec<String>,
    /// Data rows, without the header row
    pub rows: Vec<Vec<String>>,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
}

impl CsvDocument {
    /// Rows as header-keyed records. Short rows are padded with empty values.
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect()
    }
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let text = match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    text.trim_start_matches('\u{feff}').to_string()
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV text with an explicit delimiter.
///
/// The first record is the header row. Blank lines are skipped and rows may
/// have any number of cells. Header names are trimmed; cell values are kept
/// verbatim so a written file reads back unchanged.
pub fn parse_str(content: &str, delimiter: char, path: &Path) -> CsvResult<CsvDocument> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| CsvError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    if rows.is_empty() {
        return Err(CsvError::NoHeaders { path: path.to_path_buf() });
    }
    let headers = rows.remove(0).iter().map(|h| h.trim().to_string()).collect();

    Ok(CsvDocument {
        headers,
        rows,
        encoding: "utf-8".to_string(),
        delimiter,
    })
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8], path: &Path) -> CsvResult<CsvDocument> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);

    let mut document = parse_str(&content, delimiter, path)?;
    document.encoding = encoding;
    Ok(document)
}

/// Read a CSV file with auto-detection of encoding and delimiter.
pub async fn read_file_auto(path: &Path) -> CsvResult<CsvDocument> {
    let bytes = tokio::fs::read(path).await.map_err(|source| CsvError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bytes_auto(&bytes, path)
}

/// Serialize rows to comma-separated text. The first row is written as-is,
/// so callers put their header there.
pub fn to_csv_string(rows: &[Vec<String>], path: &Path) -> CsvResult<String> {
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row).map_err(|e| CsvError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    }
    let bytes = writer.into_inner().map_err(|e| CsvError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write rows to `path`, creating parent directories.
pub async fn write_file(path: &Path, rows: &[Vec<String>]) -> CsvResult<()> {
    let content = to_csv_string(rows, path)?;
    let io_err = |source| CsvError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, content).await.map_err(io_err)
}
