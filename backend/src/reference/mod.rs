//! Reference tables - persistent lookups that grow by asking.
//!
//! Tables live as CSV files under `tables/<name>.csv`. They are loaded on
//! first use, kept for the rest of the run, and written back after every
//! answered question. Entries are never removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::ask::{Asker, Question};
use crate::error::{ReferenceError, ReferenceResult};
use crate::parser::{self, Record};

/// Name of the column holding the group of an entry.
pub const GROUP_COLUMN: &str = "group";

/// An in-memory reference table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceTable {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Record>,
}

impl ReferenceTable {
    /// A table with no entries that will be written to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Load a table from disk. A missing file is an empty table.
    pub async fn load(path: impl Into<PathBuf>) -> ReferenceResult<Self> {
        let path = path.into();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Reference table not found, starting empty");
            return Ok(Self::empty(path));
        }

        let document = parser::read_file_auto(&path).await?;
        let rows = document.records();
        Ok(Self {
            path,
            headers: document.headers,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The `take` value of the entry matching `value` within `group`.
    pub fn find(&self, match_column: &str, value: &str, take: &str, group: &str) -> Option<String> {
        self.rows
            .iter()
            .find(|row| {
                row.get(match_column).is_some_and(|v| v == value)
                    && row.get(GROUP_COLUMN).is_some_and(|g| g == group)
            })
            .and_then(|row| row.get(take).cloned())
    }

    /// Append an entry, adding any new columns to the header.
    pub fn append(&mut self, record: Record) {
        for key in record.keys() {
            if !self.headers.contains(key) {
                self.headers.push(key.clone());
            }
        }
        self.rows.push(record);
    }

    /// The whole table as rows, header first.
    pub fn to_grid(&self) -> Vec<Vec<String>> {
        let mut grid = Vec::with_capacity(self.rows.len() + 1);
        grid.push(self.headers.clone());
        for row in &self.rows {
            grid.push(
                self.headers
                    .iter()
                    .map(|h| row.get(h).cloned().unwrap_or_default())
                    .collect(),
            );
        }
        grid
    }

    /// Write the whole table back to its file.
    pub async fn save(&self) -> ReferenceResult<()> {
        parser::write_file(&self.path, &self.to_grid()).await?;
        Ok(())
    }
}

/// A loaded table and the gate serializing its misses.
struct SharedTable {
    data: RwLock<ReferenceTable>,
    gate: Mutex<()>,
}

/// All reference tables of one run.
pub struct ReferenceStore {
    directory: PathBuf,
    asker: Arc<dyn Asker>,
    tables: Mutex<HashMap<String, Arc<SharedTable>>>,
}

impl ReferenceStore {
    /// Tables are read from and written to `directory/<name>.csv`.
    pub fn new(directory: impl Into<PathBuf>, asker: Arc<dyn Asker>) -> Self {
        Self {
            directory: directory.into(),
            asker,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.csv", name))
    }

    async fn table(&self, name: &str) -> ReferenceResult<Arc<SharedTable>> {
        let mut tables = self.tables.lock().await;
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }

        let loaded = ReferenceTable::load(self.table_path(name)).await?;
        debug!(table = name, entries = loaded.len(), "Reference table loaded");
        let shared = Arc::new(SharedTable {
            data: RwLock::new(loaded),
            gate: Mutex::new(()),
        });
        tables.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Snapshot of a table as currently known to the run.
    pub async fn snapshot(&self, name: &str) -> ReferenceResult<ReferenceTable> {
        let table = self.table(name).await?;
        let data = table.data.read().await;
        Ok(data.clone())
    }

    /// Look `value` up, asking once when it is missing.
    ///
    /// An answer is appended to the table and persisted before it is returned.
    pub async fn resolve(
        &self,
        name: &str,
        match_column: &str,
        take: &str,
        group: &str,
        value: &str,
    ) -> ReferenceResult<String> {
        let table = self.table(name).await?;

        if let Some(found) = table.data.read().await.find(match_column, value, take, group) {
            return Ok(found);
        }

        let _gate = table.gate.lock().await;

        // Another caller may have answered while we waited for the gate.
        if let Some(found) = table.data.read().await.find(match_column, value, take, group) {
            return Ok(found);
        }

        let question = Question::new(name, match_column, take, group, value);
        info!(table = name, group, value, "Asking for missing reference");

        let answer = self.asker.ask(question).await.ok_or_else(|| ReferenceError::Missing {
            table: name.to_string(),
            value: value.to_string(),
            match_column: match_column.to_string(),
        })?;

        let mut record = Record::new();
        record.insert(match_column.to_string(), value.to_string());
        record.insert(take.to_string(), answer.clone());
        record.insert(GROUP_COLUMN.to_string(), group.to_string());

        // The run only sees the entry once it is on disk.
        let mut data = table.data.write().await;
        let mut grown = data.clone();
        grown.append(record);
        grown.save().await?;
        *data = grown;

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers every question with a fixed value after a short delay.
    struct CountingAsker {
        asked: AtomicUsize,
        answer: Option<String>,
    }

    #[async_trait]
    impl Asker for CountingAsker {
        async fn ask(&self, _question: Question) -> Option<String> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.answer.clone()
        }
    }

    fn asker(answer: Option<&str>) -> Arc<CountingAsker> {
        Arc::new(CountingAsker {
            asked: AtomicUsize::new(0),
            answer: answer.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_existing_entry_is_not_asked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("members.csv"),
            "name,id,group\nWidget Co,W-1,acme\nWidget Co,Z-9,zeta\n",
        )
        .unwrap();

        let asker = asker(Some("never"));
        let store = ReferenceStore::new(dir.path(), asker.clone());
        let found = store.resolve("members", "name", "id", "zeta", "Widget Co").await.unwrap();

        assert_eq!(found, "Z-9");
        assert_eq!(asker.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_ask_once() {
        let dir = tempfile::tempdir().unwrap();
        let asker = asker(Some("W-1"));
        let store = Arc::new(ReferenceStore::new(dir.path(), asker.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.resolve("members", "name", "id", "acme", "Widget Co").await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "W-1");
        }

        assert_eq!(asker.asked.load(Ordering::SeqCst), 1);
        let table = store.snapshot("members").await.unwrap();
        assert_eq!(table.len(), 1);

        let saved = std::fs::read_to_string(dir.path().join("members.csv")).unwrap();
        assert_eq!(saved, "name,id,group\nWidget Co,W-1,acme\n");
    }

    #[tokio::test]
    async fn test_unanswered_is_missing_and_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path(), asker(None));

        let err = store.resolve("members", "name", "id", "acme", "Nobody").await.unwrap_err();
        match err {
            ReferenceError::Missing { table, value, match_column } => {
                assert_eq!(table, "members");
                assert_eq!(value, "Nobody");
                assert_eq!(match_column, "name");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("members.csv").exists());
    }

    #[tokio::test]
    async fn test_answers_are_visible_without_reload() {
        let dir = tempfile::tempdir().unwrap();
        let asker = asker(Some("W-1"));
        let store = ReferenceStore::new(dir.path(), asker.clone());

        store.resolve("members", "name", "id", "acme", "Widget Co").await.unwrap();
        store.resolve("members", "name", "id", "acme", "Widget Co").await.unwrap();
        assert_eq!(asker.asked.load(Ordering::SeqCst), 1);

        // a different group is a different entry
        store.resolve("members", "name", "id", "zeta", "Widget Co").await.unwrap();
        assert_eq!(asker.asked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_spaced_entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();

        let first = asker(Some(" 007"));
        let store = ReferenceStore::new(dir.path(), first.clone());
        assert_eq!(store.resolve("members", "name", "id", "acme", "Widget Co ").await.unwrap(), " 007");

        let second = asker(Some("never"));
        let store = ReferenceStore::new(dir.path(), second.clone());
        assert_eq!(store.resolve("members", "name", "id", "acme", "Widget Co ").await.unwrap(), " 007");
        assert_eq!(second.asked.load(Ordering::SeqCst), 0);
        assert_eq!(store.snapshot("members").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_entry_out_of_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the tables directory should be makes every save fail.
        let blocked = dir.path().join("tables");
        std::fs::write(&blocked, "").unwrap();

        let asker = asker(Some("W-1"));
        let store = ReferenceStore::new(&blocked, asker.clone());

        let err = store.resolve("members", "name", "id", "acme", "Widget Co").await.unwrap_err();
        assert!(matches!(err, ReferenceError::Csv(_)));
        assert!(store.snapshot("members").await.unwrap().is_empty());

        assert!(store.resolve("members", "name", "id", "acme", "Widget Co").await.is_err());
        assert_eq!(asker.asked.load(Ordering::SeqCst), 2);
    }
}
