//! Per-run state shared by every cell evaluation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ask::Asker;
use crate::models::Quarter;
use crate::reference::ReferenceStore;

/// Run-wide counter behind the `counter` operation.
///
/// Every call returns the current value and advances it by one, so N calls
/// from any interleaving of rows yield N consecutive values.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// Value the next call will return.
    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared state of one orchestrated run.
pub struct Context {
    pub directory: PathBuf,
    pub year: i32,
    pub quarter: Quarter,
    pub counter: Counter,
    pub references: ReferenceStore,
}

impl Context {
    pub fn new(directory: impl Into<PathBuf>, year: i32, quarter: Quarter, asker: Arc<dyn Asker>) -> Self {
        let directory = directory.into();
        let references = ReferenceStore::new(directory.join("tables"), asker);
        Self {
            directory,
            year,
            quarter,
            counter: Counter::default(),
            references,
        }
    }

    pub fn with_counter_start(mut self, start: u64) -> Self {
        self.counter = Counter::new(start);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_post_increments() {
        let counter = Counter::new(7);
        assert_eq!(counter.next(), 7);
        assert_eq!(counter.next(), 8);
        assert_eq!(counter.peek(), 9);
    }

    #[test]
    fn test_counter_no_gaps_across_threads() {
        let counter = Arc::new(Counter::new(100));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || (0..250).map(|_| counter.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (100..1100).collect::<Vec<_>>());
    }
}
