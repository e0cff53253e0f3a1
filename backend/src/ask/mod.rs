//! Question broker - forward reference questions to a human.
//!
//! Identical questions asked concurrently collapse onto one pending request
//! keyed by the question hash; every caller receives the same answer.
//! Pending questions stay listed until answered, so late observers can
//! still find them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// A question about a missing reference entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Stable identity of the question.
    pub hash: String,
    /// Human-readable text.
    pub text: String,
    pub table: String,
    pub take: String,
    pub group: String,
    pub value: String,
}

impl Question {
    pub fn new(table: &str, match_column: &str, take: &str, group: &str, value: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [table, match_column, take, group, value] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }

        Self {
            hash: hex::encode(hasher.finalize()),
            text: format!("For `{}`, the `{}` of `{}` is?", group, take, value),
            table: table.to_string(),
            take: take.to_string(),
            group: group.to_string(),
            value: value.to_string(),
        }
    }
}

/// Something that can answer reference questions.
///
/// `None` means no answer is available (declined, ignored or cancelled).
#[async_trait]
pub trait Asker: Send + Sync {
    async fn ask(&self, question: Question) -> Option<String>;
}

/// Never answers. Used for unattended runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnswer;

#[async_trait]
impl Asker for NoAnswer {
    async fn ask(&self, _question: Question) -> Option<String> {
        None
    }
}

/// An unanswered question and the channel its askers wait on.
struct Pending {
    question: Question,
    tx: broadcast::Sender<Option<String>>,
}

/// Coalescing broker between the engine and whoever answers questions.
///
/// New questions are published on the channel handed to [`QuestionBroker::new`];
/// answers come back through [`QuestionBroker::answer`].
pub struct QuestionBroker {
    pending: Mutex<IndexMap<String, Pending>>,
    ignoring: AtomicBool,
    outbox: mpsc::UnboundedSender<Question>,
}

impl QuestionBroker {
    pub fn new(outbox: mpsc::UnboundedSender<Question>) -> Self {
        Self {
            pending: Mutex::new(IndexMap::new()),
            ignoring: AtomicBool::new(false),
            outbox,
        }
    }

    /// Resolve a pending question. Returns false when nobody was waiting.
    pub fn answer(&self, hash: &str, answer: Option<String>) -> bool {
        let pending = self.lock_pending().shift_remove(hash);
        match pending {
            Some(pending) => {
                debug!(hash, answered = answer.is_some(), "Question resolved");
                let _ = pending.tx.send(answer);
                true
            }
            None => false,
        }
    }

    /// Resolve every outstanding and future question with no answer.
    pub fn ignore_all(&self) {
        self.ignoring.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.lock_pending().drain(..).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Ignoring outstanding questions");
        }
        for (_, pending) in drained {
            let _ = pending.tx.send(None);
        }
    }

    /// Accept questions again, for the next run.
    pub fn reset(&self) {
        self.ignoring.store(false, Ordering::SeqCst);
    }

    pub fn is_ignoring(&self) -> bool {
        self.ignoring.load(Ordering::SeqCst)
    }

    /// Number of questions waiting for an answer.
    pub fn outstanding(&self) -> usize {
        self.lock_pending().len()
    }

    /// Questions waiting for an answer, oldest first.
    pub fn pending(&self) -> Vec<Question> {
        self.lock_pending().values().map(|p| p.question.clone()).collect()
    }

    /// Number of callers waiting on one question.
    pub fn waiting(&self, hash: &str) -> usize {
        self.lock_pending()
            .get(hash)
            .map(|p| p.tx.receiver_count())
            .unwrap_or(0)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, IndexMap<String, Pending>> {
        // A poisoned map is still structurally valid.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Asker for QuestionBroker {
    async fn ask(&self, question: Question) -> Option<String> {
        if self.is_ignoring() {
            return None;
        }

        let mut rx = {
            let mut pending = self.lock_pending();
            // Checked again under the lock so ignore_all cannot miss this question.
            if self.is_ignoring() {
                return None;
            }
            match pending.get(&question.hash) {
                Some(existing) => existing.tx.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    if self.outbox.send(question.clone()).is_err() {
                        return None;
                    }
                    pending.insert(question.hash.clone(), Pending { question, tx });
                    rx
                }
            }
        };

        rx.recv().await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn question(value: &str) -> Question {
        Question::new("members", "name", "id", "acme", value)
    }

    #[test]
    fn test_question_text_and_hash() {
        let q = question("Widget Co");
        assert_eq!(q.text, "For `acme`, the `id` of `Widget Co` is?");
        assert_eq!(q.hash.len(), 64);
        assert_eq!(q.hash, question("Widget Co").hash);
        assert_ne!(q.hash, question("Other").hash);
    }

    #[tokio::test]
    async fn test_duplicate_questions_coalesce() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = Arc::new(QuestionBroker::new(tx));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move { broker.ask(question("Widget Co")).await }));
        }

        let published = rx.recv().await.unwrap();
        while broker.waiting(&published.hash) < 5 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err(), "question must be published once");
        assert!(broker.answer(&published.hash, Some("42".into())));

        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("42"));
        }
    }

    #[tokio::test]
    async fn test_ignore_all_resolves_pending_and_future() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = Arc::new(QuestionBroker::new(tx));

        let waiting = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.ask(question("a")).await })
        };
        rx.recv().await.unwrap();

        broker.ignore_all();
        assert_eq!(waiting.await.unwrap(), None);
        assert_eq!(broker.ask(question("b")).await, None);
        assert_eq!(broker.outstanding(), 0);

        broker.reset();
        assert!(!broker.is_ignoring());
    }

    #[tokio::test]
    async fn test_pending_lists_unanswered_questions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = Arc::new(QuestionBroker::new(tx));
        assert!(broker.pending().is_empty());

        let mut handles = Vec::new();
        for value in ["a", "b"] {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move { broker.ask(question(value)).await }));
            rx.recv().await.unwrap();
        }

        let pending = broker.pending();
        assert_eq!(pending, vec![question("a"), question("b")]);

        assert!(broker.answer(&pending[0].hash, Some("1".into())));
        assert_eq!(broker.pending(), vec![question("b")]);

        broker.ignore_all();
        assert!(broker.pending().is_empty());
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_closed_outbox_answers_none() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let broker = QuestionBroker::new(tx);
        assert_eq!(broker.ask(question("a")).await, None);
    }

    #[test]
    fn test_answer_unknown_hash() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let broker = QuestionBroker::new(tx);
        assert!(!broker.answer("nope", Some("x".into())));
    }
}
