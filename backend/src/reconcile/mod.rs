//! Reconciliation of produced records against accepted ("truth") records.
//!
//! Both sides are partitioned by a key field. Within a partition every
//! record is reduced to a canonical line (fields ordered by name, excluded
//! fields masked, monetary fields normalised to `$X.YY`). Monetary fields
//! also yield tolerance variants one cent either way, so a record matches
//! when its line equals any variant of any record on the other side.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RunError, RunnerResult};
use crate::io::list_files;
use crate::models::DiscrepancyResult;
use crate::parser::{self, Record};
use crate::transform::dsl::coerce::{format_usd, parse_decimal};

/// Placeholder written over excluded fields.
pub const MASK: &str = "X";

/// How two record sets are compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    /// Field records are grouped by.
    pub partition_key: String,
    /// Fields that never take part in matching.
    pub exclude: Vec<String>,
    /// Monetary fields matched within one cent.
    pub tolerance: Vec<String>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            partition_key: "supplierId".to_string(),
            exclude: vec!["purchaseId".to_string()],
            tolerance: vec!["rebateAmount".to_string()],
        }
    }
}

/// Compare `actual` with `expected`, one result per partition in key order.
///
/// Unmatched actual records are removals; unmatched expected records are
/// additions.
pub fn compare(actual: &[Record], expected: &[Record], options: &CompareOptions) -> Vec<DiscrepancyResult> {
    let mut partitions: BTreeMap<String, (Vec<&Record>, Vec<&Record>)> = BTreeMap::new();
    for record in actual {
        partitions.entry(partition_of(record, options)).or_default().0.push(record);
    }
    for record in expected {
        partitions.entry(partition_of(record, options)).or_default().1.push(record);
    }

    partitions
        .into_iter()
        .map(|(name, (actual, expected))| {
            let (additions, removals) = compare_partition(&actual, &expected, options);
            debug!(partition = %name, additions = additions.len(), removals = removals.len(), "Partition compared");
            DiscrepancyResult { name, additions, removals }
        })
        .collect()
}

fn partition_of(record: &Record, options: &CompareOptions) -> String {
    record.get(&options.partition_key).cloned().unwrap_or_default()
}

fn compare_partition(actual: &[&Record], expected: &[&Record], options: &CompareOptions) -> (Vec<String>, Vec<String>) {
    let allowed = |records: &[&Record]| -> HashSet<String> {
        records.iter().flat_map(|r| tolerance_variants(r, options)).collect()
    };
    let actual_allowed = allowed(actual);
    let expected_allowed = allowed(expected);

    let removals = actual
        .iter()
        .map(|r| canonical_line(r, options))
        .filter(|line| !expected_allowed.contains(line))
        .collect();
    let additions = expected
        .iter()
        .map(|r| canonical_line(r, options))
        .filter(|line| !actual_allowed.contains(line))
        .collect();

    (additions, removals)
}

/// Field values in field-name order, masked and normalised.
fn canonical_fields(record: &Record, options: &CompareOptions) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = record
        .iter()
        .map(|(name, value)| {
            let value = if options.exclude.contains(name) {
                MASK.to_string()
            } else if options.tolerance.contains(name) {
                parse_decimal(value).map(format_usd).unwrap_or_else(|_| value.clone())
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
}

fn join(fields: &[(String, String)]) -> String {
    fields.iter().map(|(_, v)| v.as_str()).collect::<Vec<_>>().join(",")
}

/// The canonical line of a record.
pub fn canonical_line(record: &Record, options: &CompareOptions) -> String {
    join(&canonical_fields(record, options))
}

/// Every line a record may match, with each monetary field shifted by
/// -0.01, 0 and +0.01 (all combinations).
pub fn tolerance_variants(record: &Record, options: &CompareOptions) -> Vec<String> {
    let cent = Decimal::new(1, 2);
    let mut variants = vec![canonical_fields(record, options)];

    for (index, (name, original)) in canonical_fields(record, options).into_iter().enumerate() {
        if !options.tolerance.contains(&name) {
            continue;
        }
        let Ok(amount) = parse_decimal(&original) else {
            continue;
        };
        variants = variants
            .into_iter()
            .flat_map(|fields| {
                [amount.checked_sub(cent), Some(amount), amount.checked_add(cent)]
                    .into_iter()
                    .flatten()
                    .map(move |shifted| {
                        let mut fields = fields.clone();
                        fields[index].1 = format_usd(shifted);
                        fields
                    })
            })
            .collect();
    }

    variants.iter().map(|fields| join(fields)).collect()
}

// =============================================================================
// Files
// =============================================================================

/// Read every record of the given CSV files.
pub async fn load_records(files: &[PathBuf]) -> RunnerResult<Vec<Record>> {
    let mut records = Vec::new();
    for file in files {
        let document = parser::read_file_auto(file).await?;
        records.extend(document.records());
    }
    Ok(records)
}

fn glob_files(pattern: PathBuf) -> RunnerResult<Vec<PathBuf>> {
    list_files(&pattern).map_err(|e| RunError::Glob {
        pattern: pattern.display().to_string(),
        message: e.to_string(),
    })
}

/// Compare two sets of CSV files.
pub async fn compare_files(
    actual: &[PathBuf],
    expected: &[PathBuf],
    options: &CompareOptions,
) -> RunnerResult<Vec<DiscrepancyResult>> {
    let actual = load_records(actual).await?;
    let expected = load_records(expected).await?;
    info!(actual = actual.len(), expected = expected.len(), "Comparing records");
    Ok(compare(&actual, &expected, options))
}

/// Compare `rebates/**/*.csv` with `truth/**/*.csv` under `directory`.
pub async fn compare_directory(directory: &Path, options: &CompareOptions) -> RunnerResult<Vec<DiscrepancyResult>> {
    let actual = glob_files(directory.join("rebates").join("**").join("*.csv"))?;
    let expected = glob_files(directory.join("truth").join("**").join("*.csv"))?;
    compare_files(&actual, &expected, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn rebate(supplier: &str, purchase: &str, amount: &str) -> Record {
        record(&[
            ("supplierId", supplier),
            ("purchaseId", purchase),
            ("memberId", "M-1"),
            ("rebateAmount", amount),
        ])
    }

    #[test]
    fn test_one_cent_difference_matches() {
        let actual = vec![rebate("S1", "1", "$10.00")];
        let expected = vec![rebate("S1", "2", "$10.01")];

        let results = compare(&actual, &expected, &CompareOptions::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "S1");
        assert!(results[0].is_clean());
    }

    #[test]
    fn test_two_cents_do_not_match() {
        let actual = vec![rebate("S1", "1", "$10.00")];
        let expected = vec![rebate("S1", "1", "$10.02")];

        let results = compare(&actual, &expected, &CompareOptions::default());
        assert_eq!(results[0].removals, vec!["M-1,X,$10.00,S1"]);
        assert_eq!(results[0].additions, vec!["M-1,X,$10.02,S1"]);
    }

    #[test]
    fn test_field_order_and_amount_format_ignored() {
        let actual = vec![record(&[("rebateAmount", "1000"), ("supplierId", "S1"), ("memberId", "M-1")])];
        let expected = vec![record(&[("memberId", "M-1"), ("supplierId", "S1"), ("rebateAmount", "$1,000.00")])];

        let results = compare(&actual, &expected, &CompareOptions::default());
        assert!(results[0].is_clean());
    }

    #[test]
    fn test_partitions_from_both_sides_in_key_order() {
        let actual = vec![rebate("S2", "1", "$1.00")];
        let expected = vec![rebate("S1", "1", "$1.00")];

        let results = compare(&actual, &expected, &CompareOptions::default());
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["S1", "S2"]);
        assert_eq!(results[0].additions.len(), 1);
        assert!(results[0].removals.is_empty());
        assert_eq!(results[1].removals.len(), 1);
        assert!(results[1].additions.is_empty());
    }

    #[test]
    fn test_variants_cover_every_tolerance_field() {
        let options = CompareOptions {
            partition_key: "s".into(),
            exclude: vec![],
            tolerance: vec!["a".into(), "b".into()],
        };
        let variants = tolerance_variants(&record(&[("a", "1"), ("b", "2"), ("s", "x")]), &options);
        assert_eq!(variants.len(), 9);
        assert!(variants.contains(&"$0.99,$2.01,x".to_string()));
    }

    #[test]
    fn test_unparseable_amount_compared_verbatim() {
        let actual = vec![rebate("S1", "1", "n/a")];
        let expected = vec![rebate("S1", "1", "n/a")];
        assert!(compare(&actual, &expected, &CompareOptions::default())[0].is_clean());
    }

    #[test]
    fn test_extreme_amounts_do_not_overflow() {
        let max = "79228162514264337593543950335";
        let options = CompareOptions::default();
        let record = rebate("S1", "1", max);
        let variants = tolerance_variants(&record, &options);
        assert!(variants.contains(&canonical_line(&record, &options)));

        let actual = vec![rebate("S1", "1", max)];
        assert!(compare(&actual, &actual, &options)[0].is_clean());
    }

    #[tokio::test]
    async fn test_compare_directory() {
        let dir = tempfile::tempdir().unwrap();
        let write = |relative: &str, content: &str| {
            let path = dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        };
        write(
            "rebates/acme/east.csv",
            "supplierId,purchaseId,rebateAmount\nS1,1,$10.00\nS1,2,$5.00\n",
        );
        write("truth/acme/east.csv", "supplierId,purchaseId,rebateAmount\nS1,9,$10.01\n");

        let results = compare_directory(dir.path(), &CompareOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].additions.is_empty());
        assert_eq!(results[0].removals, vec!["X,$5.00,S1"]);
    }
}
