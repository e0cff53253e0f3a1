//! The run engine actor.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use super::{Control, Event, RunSettings, Status};
use crate::api::logs::{log_error, log_info, log_info_indent, log_success, log_warning};
use crate::ask::{Question, QuestionBroker};
use crate::error::{RunError, RunnerResult};
use crate::io::{list_files, source_files, CalamineReader, WorkbookReader};
use crate::models::{ConfigFailure, IgnoredRow, RunResults};
use crate::reconcile::compare_directory;
use crate::transform::pipeline::{self, announce, PipelineOptions};
use crate::transform::{Context, TransformerConfig};

/// Collaborators of the engine.
#[derive(Clone)]
pub struct EngineOptions {
    pub reader: Arc<dyn WorkbookReader>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reader: Arc::new(CalamineReader),
        }
    }
}

/// State visible to handles.
struct Shared {
    events: broadcast::Sender<Event>,
    status: RwLock<Status>,
    running: AtomicBool,
    cancelled: AtomicBool,
}

impl Shared {
    fn set_status(&self, status: Status) {
        let mut current = self.status.write().unwrap_or_else(|e| e.into_inner());
        debug!(?status, "Status changed");
        *current = status.clone();
        let _ = self.events.send(Event::Status { status });
    }

    /// Publish the final status and release the engine for the next run.
    fn finish(&self, status: Status) {
        let mut current = self.status.write().unwrap_or_else(|e| e.into_inner());
        *current = status.clone();
        self.running.store(false, Ordering::SeqCst);
        let _ = self.events.send(Event::Status { status });
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cheap, cloneable access to a running [`Engine`].
#[derive(Clone)]
pub struct EngineHandle {
    control: mpsc::UnboundedSender<Control>,
    shared: Arc<Shared>,
    broker: Arc<QuestionBroker>,
}

impl EngineHandle {
    /// Start a run. Rejected while another run is active.
    pub fn start(&self, settings: RunSettings) -> RunnerResult<()> {
        settings.validate()?;
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunError::AlreadyRunning);
        }
        if self.control.send(Control::Start { settings }).is_err() {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(RunError::EngineStopped);
        }
        Ok(())
    }

    /// Answer a question; `None` declines it.
    pub fn answer(&self, hash: impl Into<String>, answer: Option<String>) -> RunnerResult<()> {
        self.send(Control::Answer {
            hash: hash.into(),
            answer,
        })
    }

    /// Decline every outstanding and future question of the current run.
    pub fn ignore_all(&self) -> RunnerResult<()> {
        self.send(Control::IgnoreAll)
    }

    /// Stop the current run before its next transformer and go back to idle.
    pub fn cancel(&self) -> RunnerResult<()> {
        if !self.is_running() {
            return Err(RunError::NotRunning);
        }
        self.send(Control::Cancel)
    }

    /// Stop the engine.
    pub fn exit(&self) -> RunnerResult<()> {
        self.send(Control::Exit)
    }

    /// Forward a raw control message.
    pub fn send(&self, control: Control) -> RunnerResult<()> {
        if let Control::Start { settings } = control {
            return self.start(settings);
        }
        self.control.send(control).map_err(|_| RunError::EngineStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> Status {
        self.shared.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Questions of the current run still waiting for an answer.
    pub fn pending(&self) -> Vec<Question> {
        self.broker.pending()
    }
}

/// Owns the question broker and executes runs on request.
pub struct Engine {
    control: mpsc::UnboundedReceiver<Control>,
    questions: mpsc::UnboundedReceiver<Question>,
    broker: Arc<QuestionBroker>,
    shared: Arc<Shared>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(options: EngineOptions) -> (Self, EngineHandle) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (question_tx, question_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            events,
            status: RwLock::new(Status::Idle),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        });

        let broker = Arc::new(QuestionBroker::new(question_tx));

        let engine = Self {
            control: control_rx,
            questions: question_rx,
            broker: Arc::clone(&broker),
            shared: Arc::clone(&shared),
            options,
        };
        let handle = EngineHandle {
            control: control_tx,
            shared,
            broker,
        };
        (engine, handle)
    }

    /// Create an engine and run it on the tokio runtime.
    pub fn spawn(options: EngineOptions) -> (EngineHandle, JoinHandle<()>) {
        let (engine, handle) = Self::new(options);
        (handle, tokio::spawn(engine.run()))
    }

    /// Process control messages until `exit` or until every handle is gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(question) = self.questions.recv() => {
                    info!(hash = %question.hash, "{}", question.text);
                    let _ = self.shared.events.send(Event::Question { question });
                }
                control = self.control.recv() => match control {
                    Some(Control::Start { settings }) => self.start(settings),
                    Some(Control::Answer { hash, answer }) => {
                        if !self.broker.answer(&hash, answer) {
                            debug!(hash, "Answer for a question nobody is waiting on");
                        }
                    }
                    Some(Control::IgnoreAll) => self.broker.ignore_all(),
                    Some(Control::Cancel) => self.cancel(),
                    Some(Control::Exit) | None => {
                        self.cancel();
                        break;
                    }
                },
            }
        }
        debug!("Engine stopped");
    }

    fn start(&self, settings: RunSettings) {
        self.broker.reset();
        self.shared.cancelled.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let broker = Arc::clone(&self.broker);
        let reader = Arc::clone(&self.options.reader);
        tokio::spawn(async move {
            let inner = Arc::clone(&shared);
            let run = tokio::spawn(async move {
                let mut results = RunResults::default();
                let outcome = run_all(&settings, &inner, broker, reader, &mut results).await;
                (outcome, results)
            });
            shared.finish(final_status(run.await));
        });
    }

    fn cancel(&self) {
        if self.shared.running.load(Ordering::SeqCst) {
            info!("Cancelling run");
        }
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.broker.ignore_all();
    }
}

/// Terminal status of a run task. A task that panicked ends in `error`.
fn final_status(joined: Result<(RunnerResult<bool>, RunResults), JoinError>) -> Status {
    match joined {
        Ok((Ok(true), results)) => {
            log_success("Run complete");
            Status::Done { results }
        }
        Ok((Ok(false), _)) => {
            log_warning("Run cancelled");
            Status::Idle
        }
        Ok((Err(e), results)) => {
            log_error(format!("Run failed: {}", e));
            Status::Error {
                message: e.to_string(),
                results,
            }
        }
        Err(e) => {
            log_error(format!("Run aborted: {}", e));
            Status::Error {
                message: format!("Run aborted: {}", e),
                results: RunResults::default(),
            }
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Execute one run. Returns `false` when it was cancelled.
async fn run_all(
    settings: &RunSettings,
    shared: &Shared,
    broker: Arc<QuestionBroker>,
    reader: Arc<dyn WorkbookReader>,
    results: &mut RunResults,
) -> RunnerResult<bool> {
    shared.set_status(Status::loading("Reading transformers..."));
    let pattern = settings.transformer_pattern();
    let files = list_files(&pattern).map_err(|e| RunError::Glob {
        pattern: pattern.display().to_string(),
        message: e.to_string(),
    })?;

    let mut configs = Vec::with_capacity(files.len());
    for file in &files {
        match TransformerConfig::load(file).await {
            Ok(config) => configs.push(config),
            Err(e) => {
                let name = file_stem(file);
                log_error(format!("{}: {}", name, e));
                results.failures.push(ConfigFailure {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }
    log_info(format!("Found {} transformer(s)", files.len()));

    let ctx = Context::new(&settings.directory, settings.year, settings.quarter, broker)
        .with_counter_start(settings.counter_start);

    shared.set_status(Status::loading("Loading sources..."));
    for config in &configs {
        let count: usize = config
            .sources
            .iter()
            .map(|source| source_files(source, &ctx).map(|f| f.len()).unwrap_or(0))
            .sum();
        log_info_indent(format!("{}: {} source file(s)", config.name, count), 1);
    }

    let options = PipelineOptions {
        reader,
        row_concurrency: settings.row_concurrency,
    };
    let total = configs.len();
    for (index, config) in configs.iter().enumerate() {
        if shared.is_cancelled() {
            return Ok(false);
        }
        shared.set_status(Status::Running {
            progress: index as f64 / total as f64,
        });
        announce(index, total, &config.name);

        match pipeline::run(config, &ctx, &options).await {
            Ok(output) => {
                results.ignored.extend(output.skipped.into_iter().map(|row| IgnoredRow {
                    transformer: config.name.clone(),
                    source: row.source,
                    reason: row.reason,
                }));
                results.config.push(output.result);
            }
            Err(e) => {
                log_error(format!("{} failed: {}", config.name, e));
                results.failures.push(ConfigFailure {
                    name: config.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    if shared.is_cancelled() {
        return Ok(false);
    }

    shared.set_status(Status::loading("Saving data..."));
    debug!(
        completed = results.config.len(),
        failed = results.failures.len(),
        ignored = results.ignored.len(),
        "Transformers finished"
    );

    if settings.testing.enabled {
        shared.set_status(Status::loading("Scoring accuracy..."));
        results.discrepancy = Some(compare_directory(&settings.directory, &settings.testing.compare).await?);
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::source::tests::{touch, MemoryReader};
    use crate::models::Quarter;
    use std::time::Duration;

    const LOOKUP: &str = r#"{
        "sources": [{ "type": "excel", "group": "acme", "subgroup": "east" }],
        "properties": {
            "member": [
                { "type": "column", "index": 0 },
                { "type": "reference", "table": "members", "match": "name", "take": "id", "group": "acme" }
            ],
            "total": [{ "type": "column", "index": 1 }, { "type": "coerce", "as": "usd" }]
        },
        "destination": { "type": "csv", "group": "rebates", "subgroup": "acme" }
    }"#;

    const PLAIN: &str = r#"{
        "sources": [{ "type": "excel", "group": "acme", "subgroup": "east" }],
        "properties": {
            "supplierId": [{ "type": "literal", "value": "S1" }],
            "rebateAmount": [{ "type": "column", "index": 1 }, { "type": "coerce", "as": "usd" }]
        },
        "destination": { "type": "csv", "group": "rebates", "subgroup": "acme" }
    }"#;

    const PRODUCT: &str = r#"{
        "sources": [{ "type": "excel", "group": "acme", "subgroup": "east" }],
        "properties": {
            "total": [{ "type": "column", "index": 0 }, { "type": "multiply", "with": [{ "type": "column", "index": 1 }] }]
        },
        "destination": { "type": "csv", "group": "rebates", "subgroup": "acme" }
    }"#;

    fn fixture(configs: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "acme/east/2024/Q1/march.xlsx");
        std::fs::create_dir_all(dir.path().join("transformers")).unwrap();
        for (name, text) in configs {
            std::fs::write(dir.path().join("transformers").join(format!("{}.json", name)), text).unwrap();
        }
        dir
    }

    fn engine() -> EngineHandle {
        let options = EngineOptions {
            reader: Arc::new(MemoryReader::single(&[&["Widget Co", "9.995"]])),
        };
        Engine::spawn(options).0
    }

    fn settings(dir: &Path) -> RunSettings {
        RunSettings::new(dir, 2024, Quarter::new(1).unwrap())
    }

    async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("engine went quiet")
            .expect("event channel closed")
    }

    /// Collect statuses until a terminal one, answering questions with `answer`.
    async fn drive(handle: &EngineHandle, rx: &mut broadcast::Receiver<Event>, answer: Option<&str>) -> Vec<Status> {
        let mut statuses = Vec::new();
        loop {
            match next_event(rx).await {
                Event::Question { question } => {
                    handle.answer(question.hash, answer.map(str::to_string)).unwrap();
                }
                Event::Status { status } => {
                    let terminal = status.is_terminal();
                    statuses.push(status);
                    if terminal {
                        return statuses;
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_run_answers_question_and_completes() {
        let dir = fixture(&[("acme", LOOKUP)]);
        let handle = engine();
        let mut rx = handle.subscribe();

        handle.start(settings(dir.path())).unwrap();
        let statuses = drive(&handle, &mut rx, Some("W-1")).await;

        assert_eq!(statuses[0], Status::loading("Reading transformers..."));
        assert!(statuses.contains(&Status::Running { progress: 0.0 }));
        let Some(Status::Done { results }) = statuses.last() else {
            panic!("run did not finish: {:?}", statuses.last());
        };
        assert_eq!(results.config.len(), 1);
        assert!(results.failures.is_empty());
        assert!(results.discrepancy.is_none());

        let written = std::fs::read_to_string(dir.path().join("rebates/acme/acme.csv")).unwrap();
        assert_eq!(written, "member,total\nW-1,$10.00\n");
        let table = std::fs::read_to_string(dir.path().join("tables/members.csv")).unwrap();
        assert_eq!(table, "name,id,group\nWidget Co,W-1,acme\n");
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_second_start_rejected_and_cancel_returns_to_idle() {
        let dir = fixture(&[("acme", LOOKUP)]);
        let handle = engine();
        let mut rx = handle.subscribe();

        handle.start(settings(dir.path())).unwrap();
        loop {
            if let Event::Question { .. } = next_event(&mut rx).await {
                break;
            }
        }

        assert!(matches!(handle.start(settings(dir.path())), Err(RunError::AlreadyRunning)));
        let pending = handle.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, "Widget Co");

        handle.cancel().unwrap();
        let statuses = drive(&handle, &mut rx, None).await;
        assert_eq!(statuses.last(), Some(&Status::Idle));
        assert_eq!(handle.status(), Status::Idle);
        assert!(!handle.is_running());
        assert!(handle.pending().is_empty());
        assert!(!dir.path().join("tables/members.csv").exists());
    }

    #[tokio::test]
    async fn test_ignore_all_fails_only_that_transformer() {
        let dir = fixture(&[("acme", LOOKUP), ("plain", PLAIN), ("broken", "{ not json")]);
        let handle = engine();
        let mut rx = handle.subscribe();

        handle.start(settings(dir.path())).unwrap();
        handle.ignore_all().unwrap();
        let statuses = drive(&handle, &mut rx, None).await;

        let Some(Status::Done { results }) = statuses.last() else {
            panic!("run did not finish: {:?}", statuses.last());
        };
        let mut failed: Vec<_> = results.failures.iter().map(|f| f.name.as_str()).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec!["acme", "broken"]);
        assert_eq!(results.config.len(), 1);
        assert_eq!(results.config[0].name, "plain");
    }

    #[tokio::test]
    async fn test_testing_scores_output() {
        let dir = fixture(&[("acme", PLAIN)]);
        let truth = dir.path().join("truth/acme/acme.csv");
        std::fs::create_dir_all(truth.parent().unwrap()).unwrap();
        std::fs::write(&truth, "supplierId,rebateAmount\nS1,$9.99\n").unwrap();

        let handle = engine();
        let mut rx = handle.subscribe();
        let mut run = settings(dir.path());
        run.testing.enabled = true;

        handle.start(run).unwrap();
        let statuses = drive(&handle, &mut rx, None).await;

        assert!(statuses.contains(&Status::loading("Scoring accuracy...")));
        let Some(Status::Done { results }) = statuses.last() else {
            panic!("run did not finish: {:?}", statuses.last());
        };
        let discrepancy = results.discrepancy.as_ref().unwrap();
        assert_eq!(discrepancy.len(), 1);
        assert_eq!(discrepancy[0].name, "S1");
        assert!(discrepancy[0].is_clean());
    }

    #[tokio::test]
    async fn test_overflowing_row_is_ignored_and_engine_released() {
        let dir = fixture(&[("acme", PRODUCT)]);
        let options = EngineOptions {
            reader: Arc::new(MemoryReader::single(&[&["1e20", "1e20"], &["2", "3"]])),
        };
        let (handle, _) = Engine::spawn(options);
        let mut rx = handle.subscribe();

        handle.start(settings(dir.path())).unwrap();
        let statuses = drive(&handle, &mut rx, None).await;

        let Some(Status::Done { results }) = statuses.last() else {
            panic!("run did not finish: {:?}", statuses.last());
        };
        assert_eq!(results.ignored.len(), 1);
        assert!(results.ignored[0].reason.contains("overflows"));
        let written = std::fs::read_to_string(dir.path().join("rebates/acme/acme.csv")).unwrap();
        assert_eq!(written, "total\n6\n");

        assert!(!handle.is_running());
        handle.start(settings(dir.path())).unwrap();
        drive(&handle, &mut rx, None).await;
    }

    #[tokio::test]
    async fn test_panicked_run_ends_in_error() {
        let task = tokio::spawn(async {
            if std::hint::black_box(true) {
                panic!("boom");
            }
            (Ok(true), RunResults::default())
        });

        match final_status(task.await) {
            Status::Error { message, results } => {
                assert!(message.starts_with("Run aborted"));
                assert!(results.config.is_empty());
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let handle = engine();
        let err = handle
            .start(settings(Path::new("/nonexistent/data/dir")))
            .unwrap_err();
        assert!(matches!(err, RunError::Settings(_)));
        assert!(!handle.is_running());
        assert_eq!(handle.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_exit_stops_engine() {
        let (handle, task) = Engine::spawn(EngineOptions::default());
        handle.exit().unwrap();
        task.await.unwrap();
        assert!(matches!(handle.ignore_all(), Err(RunError::EngineStopped)));
        assert!(matches!(handle.cancel(), Err(RunError::NotRunning)));
    }
}
