//! Transformer configuration files.
//!
//! One JSON file describes one transformer: where its rows come from, how
//! they are reshaped, which properties each output row has and where the
//! result is written.
//!
//! ```json
//! {
//!   "sources": [{ "type": "excel", "group": "acme", "subgroup": "east" }],
//!   "preprocess": [{ "type": "trim", "top": 1 }],
//!   "properties": {
//!     "id": [{ "type": "column", "index": 0 }],
//!     "total": [{ "type": "column", "index": "B" }, { "type": "coerce", "as": "usd" }]
//!   },
//!   "destination": { "type": "csv", "group": "acme", "subgroup": "east" }
//! }
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dsl::{CellTransformation, RowTransformation, TableTransformation};
use crate::error::{ConfigError, ConfigResult};
use crate::validation::validate_transformer;

/// A parsed transformer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerConfig {
    /// File stem of the configuration; not part of the document.
    #[serde(skip)]
    pub name: String,

    pub sources: Vec<Source>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preprocess: Vec<TableTransformation>,

    pub properties: Properties,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocess: Vec<TableTransformation>,

    pub destination: Destination,
}

impl TransformerConfig {
    /// Parse and validate a configuration document.
    ///
    /// The document is checked against the embedded schema first so every
    /// violation is reported with its JSON path.
    pub fn from_json(name: impl Into<String>, text: &str) -> ConfigResult<Self> {
        let document: Value = serde_json::from_str(text)?;
        validate_transformer(&document)?;

        // Parsed from the text again: going through `Value` would lose the
        // declaration order of `properties`.
        let mut config: TransformerConfig = serde_json::from_str(text)?;
        config.name = name.into();
        Ok(config)
    }

    /// Read a configuration file; its name is the file stem.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_json(name, &text)
    }

    /// Property names in declaration order, i.e. the destination header.
    pub fn header(&self) -> Vec<String> {
        self.properties.iter().map(|(name, _)| name.to_string()).collect()
    }
}

/// Output properties, either as a list of named definitions or as a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Properties {
    List(Vec<Property>),
    Map(IndexMap<String, Vec<CellTransformation>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Property {
    pub name: String,
    pub definition: Vec<CellTransformation>,
}

impl Properties {
    /// `(name, chain)` pairs in declaration order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&str, &[CellTransformation])> + Send + '_> {
        match self {
            Properties::List(list) => Box::new(
                list.iter()
                    .map(|p| (p.name.as_str(), p.definition.as_slice())),
            ),
            Properties::Map(map) => Box::new(map.iter().map(|(k, v)| (k.as_str(), v.as_slice()))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Properties::List(list) => list.len(),
            Properties::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Source {
    /// Every workbook under `<group>/<subgroup>/<year>/Q<quarter>/`.
    Excel {
        group: String,
        subgroup: String,
        /// Sheet names to read; all sheets when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sheets: Option<Vec<String>>,
        /// Row operations applied to every sheet as it is read.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rows: Vec<RowTransformation>,
    },
}

/// Where the final table goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Destination {
    /// `<group>/<subgroup>/<transformer name>.csv`
    Csv { group: String, subgroup: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::dsl::Coercion;

    const CONFIG: &str = r#"{
        "sources": [{ "type": "excel", "group": "acme", "subgroup": "east", "sheets": ["Data"] }],
        "preprocess": [{ "type": "trim", "top": 1 }],
        "properties": {
            "total": [{ "type": "column", "index": "B" }, { "type": "coerce", "as": "usd" }],
            "id": [{ "type": "column", "index": 0 }],
            "quarter": [{ "type": "meta", "value": "quarter.number" }]
        },
        "destination": { "type": "csv", "group": "acme", "subgroup": "east" }
    }"#;

    #[test]
    fn test_parse_keeps_property_order() {
        let config = TransformerConfig::from_json("acme", CONFIG).unwrap();
        assert_eq!(config.name, "acme");
        assert_eq!(config.header(), vec!["total", "id", "quarter"]);
        assert_eq!(config.preprocess.len(), 1);
        assert!(config.postprocess.is_empty());

        let (_, total) = config.properties.iter().next().unwrap();
        assert!(matches!(total[1], CellTransformation::Coerce(Coercion::Usd { .. })));
    }

    #[test]
    fn test_parse_property_list() {
        let text = r#"{
            "sources": [{ "type": "excel", "group": "g", "subgroup": "s" }],
            "properties": [
                { "name": "n", "definition": [{ "type": "counter" }] },
                { "name": "a", "definition": [{ "type": "literal", "value": 5 }] }
            ],
            "destination": { "type": "csv", "group": "g", "subgroup": "s" }
        }"#;
        let config = TransformerConfig::from_json("list", text).unwrap();
        assert!(matches!(config.properties, Properties::List(_)));
        assert_eq!(config.header(), vec!["n", "a"]);
    }

    #[test]
    fn test_schema_errors_carry_paths() {
        let text = CONFIG.replace(r#""as": "usd""#, r#""as": "euro""#);
        match TransformerConfig::from_json("bad", &text) {
            Err(ConfigError::Schema { violations }) => {
                assert!(violations.iter().any(|v| v.path == "/properties/total/1/as"));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json() {
        let err = TransformerConfig::from_json("bad", "{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[tokio::test]
    async fn test_load_names_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme-east.json");
        std::fs::write(&path, CONFIG).unwrap();

        let config = TransformerConfig::load(&path).await.unwrap();
        assert_eq!(config.name, "acme-east");
        match &config.sources[0] {
            Source::Excel { sheets, .. } => assert_eq!(sheets.as_deref(), Some(&["Data".to_string()][..])),
        }
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = TransformerConfig::load(Path::new("/nonexistent/x.json")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
