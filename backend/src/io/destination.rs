//! Destinations: write the final table.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::PipelineResult;
use crate::models::Table;
use crate::parser;
use crate::transform::config::Destination;

/// File a destination writes for the named transformer.
pub fn destination_path(destination: &Destination, directory: &Path, name: &str) -> PathBuf {
    match destination {
        Destination::Csv { group, subgroup } => directory.join(group).join(subgroup).join(format!("{}.csv", name)),
    }
}

/// Write `table` (header row included) and return the path written.
pub async fn write_destination(
    destination: &Destination,
    directory: &Path,
    name: &str,
    table: &Table,
) -> PipelineResult<PathBuf> {
    let path = destination_path(destination, directory, name);
    parser::write_file(&path, &table.to_grid()).await?;
    info!(path = %path.display(), rows = table.len().saturating_sub(1), "Destination written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_csv_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Destination::Csv {
            group: "acme".into(),
            subgroup: "east".into(),
        };
        let table = Table::from_grid(
            "out",
            vec![
                vec!["id".to_string(), "total".to_string()],
                vec!["1".to_string(), "$10.00".to_string()],
            ],
        );

        let path = write_destination(&destination, dir.path(), "acme-east", &table).await.unwrap();
        assert_eq!(path, dir.path().join("acme/east/acme-east.csv"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "id,total\n1,$10.00\n");
    }
}
