//! Plain-text report of a finished run.

use std::fmt::Write as _;

use crate::models::{DiscrepancyResult, RunResults};

/// Render `results` for a terminal.
///
/// Sections without content are left out, except performance.
pub fn render(results: &RunResults) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "==== [PERFORMANCE] ====\n");
    for config in &results.config {
        let _ = writeln!(out, "\t{}: {}ms", config.name, config.duration_ms());
    }

    if !results.failures.is_empty() {
        let _ = writeln!(out, "\n==== [FAILURES] ====\n");
        for failure in &results.failures {
            let _ = writeln!(out, "\t{}: {}", failure.name, failure.reason);
        }
    }

    if !results.ignored.is_empty() {
        let _ = writeln!(out, "\n==== [IGNORED ROWS] ====\n");
        for row in &results.ignored {
            let _ = writeln!(out, "\t{} ({}): {}", row.transformer, row.source, row.reason);
        }
    }

    if let Some(discrepancy) = &results.discrepancy {
        out.push_str(&render_discrepancy(discrepancy));
    }

    out
}

/// Render reconciliation results, one block per partition.
pub fn render_discrepancy(discrepancy: &[DiscrepancyResult]) -> String {
    let mut out = String::from("\n==== [COMPARING SOURCES] ====\n");
    for partition in discrepancy {
        let _ = writeln!(
            out,
            "\n{}: +{} -{}.",
            partition.name,
            partition.additions.len(),
            partition.removals.len()
        );
        for line in &partition.removals {
            let _ = writeln!(out, "\t[-] {}", line);
        }
        if !partition.removals.is_empty() && !partition.additions.is_empty() {
            out.push('\n');
        }
        for line in &partition.additions {
            let _ = writeln!(out, "\t[+] {}", line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigFailure, RunResult};
    use chrono::{Duration, Utc};

    #[test]
    fn test_render_full_report() {
        let start = Utc::now();
        let results = RunResults {
            config: vec![RunResult {
                name: "acme".into(),
                start,
                end: start + Duration::milliseconds(42),
            }],
            failures: vec![ConfigFailure {
                name: "broken".into(),
                reason: "bad json".into(),
            }],
            ignored: vec![],
            discrepancy: Some(vec![
                DiscrepancyResult {
                    name: "S1".into(),
                    additions: vec!["a".into()],
                    removals: vec!["r".into()],
                },
                DiscrepancyResult {
                    name: "S2".into(),
                    additions: vec![],
                    removals: vec![],
                },
            ]),
        };

        let report = render(&results);
        assert!(report.starts_with("==== [PERFORMANCE] ====\n\n\tacme: 42ms\n"));
        assert!(report.contains("\tbroken: bad json\n"));
        assert!(report.contains("\nS1: +1 -1.\n\t[-] r\n\n\t[+] a\n"));
        assert!(report.contains("\nS2: +0 -0.\n"));
        assert!(!report.contains("IGNORED"));
    }

    #[test]
    fn test_render_without_testing() {
        let report = render(&RunResults::default());
        assert_eq!(report, "==== [PERFORMANCE] ====\n\n");
    }
}
