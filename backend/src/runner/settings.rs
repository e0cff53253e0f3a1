//! Settings of one orchestrated run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RunError, RunnerResult};
use crate::models::Quarter;
use crate::reconcile::CompareOptions;

/// Everything a run needs to know, as sent with `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    /// Root of the data directory
    pub directory: PathBuf,
    pub year: i32,
    pub quarter: Quarter,

    #[serde(default)]
    pub testing: TestingSettings,

    /// First value handed out by `counter`
    #[serde(default)]
    pub counter_start: u64,

    /// Rows evaluated concurrently within one transformer
    #[serde(default = "default_row_concurrency")]
    pub row_concurrency: usize,
}

fn default_row_concurrency() -> usize {
    1
}

/// Reconciliation after the transformers ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "TestingFields")]
pub struct TestingSettings {
    pub enabled: bool,

    #[serde(flatten)]
    pub compare: CompareOptions,
}

/// Wire form of [`TestingSettings`]. `flatten` cannot reject unknown keys,
/// so the fields are spelled out here.
#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TestingFields {
    enabled: bool,
    partition_key: String,
    exclude: Vec<String>,
    tolerance: Vec<String>,
}

impl Default for TestingFields {
    fn default() -> Self {
        let compare = CompareOptions::default();
        Self {
            enabled: false,
            partition_key: compare.partition_key,
            exclude: compare.exclude,
            tolerance: compare.tolerance,
        }
    }
}

impl From<TestingFields> for TestingSettings {
    fn from(fields: TestingFields) -> Self {
        Self {
            enabled: fields.enabled,
            compare: CompareOptions {
                partition_key: fields.partition_key,
                exclude: fields.exclude,
                tolerance: fields.tolerance,
            },
        }
    }
}

impl RunSettings {
    pub fn new(directory: impl Into<PathBuf>, year: i32, quarter: Quarter) -> Self {
        Self {
            directory: directory.into(),
            year,
            quarter,
            testing: TestingSettings::default(),
            counter_start: 0,
            row_concurrency: default_row_concurrency(),
        }
    }

    /// Reject settings a run cannot start with.
    pub fn validate(&self) -> RunnerResult<()> {
        if !self.directory.is_dir() {
            return Err(RunError::Settings(format!(
                "'{}' is not a directory",
                self.directory.display()
            )));
        }
        if !(1900..=9999).contains(&self.year) {
            return Err(RunError::Settings(format!("year {} is out of range", self.year)));
        }
        if self.row_concurrency == 0 {
            return Err(RunError::Settings("row_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `transformers/**/*.json`
    pub fn transformer_pattern(&self) -> PathBuf {
        self.directory.join("transformers").join("**").join("*.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings: RunSettings = serde_json::from_value(json!({
            "directory": "/data", "year": 2024, "quarter": 2
        }))
        .unwrap();

        assert_eq!(settings.quarter.number(), 2);
        assert_eq!(settings.counter_start, 0);
        assert_eq!(settings.row_concurrency, 1);
        assert!(!settings.testing.enabled);
        assert_eq!(settings.testing.compare.partition_key, "supplierId");
        assert_eq!(settings.transformer_pattern(), PathBuf::from("/data/transformers/**/*.json"));
    }

    #[test]
    fn test_testing_overrides() {
        let settings: RunSettings = serde_json::from_value(json!({
            "directory": "/data", "year": 2024, "quarter": 1,
            "testing": { "enabled": true, "partition_key": "memberId", "tolerance": [] }
        }))
        .unwrap();

        assert!(settings.testing.enabled);
        assert_eq!(settings.testing.compare.partition_key, "memberId");
        assert!(settings.testing.compare.tolerance.is_empty());
        assert_eq!(settings.testing.compare.exclude, vec!["purchaseId"]);
    }

    #[test]
    fn test_invalid_quarter_and_unknown_fields() {
        let bad_quarter = serde_json::from_value::<RunSettings>(json!({
            "directory": "/data", "year": 2024, "quarter": 5
        }));
        assert!(bad_quarter.is_err());

        let unknown = serde_json::from_value::<RunSettings>(json!({
            "directory": "/data", "year": 2024, "quarter": 1, "colour": "red"
        }));
        assert!(unknown.is_err());

        let misspelled = serde_json::from_value::<RunSettings>(json!({
            "directory": "/data", "year": 2024, "quarter": 1,
            "testing": { "enabled": true, "partition_kye": "memberId" }
        }));
        assert!(misspelled.unwrap_err().to_string().contains("partition_kye"));
    }

    #[test]
    fn test_testing_settings_json_round_trip() {
        let mut settings = RunSettings::new("/data", 2024, Quarter::new(3).unwrap());
        settings.testing.enabled = true;
        settings.testing.compare.partition_key = "memberId".into();

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["testing"]["partition_key"], "memberId");
        let back: RunSettings = serde_json::from_value(value).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let quarter = Quarter::new(1).unwrap();
        assert!(RunSettings::new(dir.path(), 2024, quarter).validate().is_ok());

        let missing = RunSettings::new(dir.path().join("nope"), 2024, quarter);
        assert!(matches!(missing.validate(), Err(RunError::Settings(_))));

        let mut zero = RunSettings::new(dir.path(), 2024, quarter);
        zero.row_concurrency = 0;
        assert!(zero.validate().is_err());
    }
}
