//! Rebate CLI - run transformers, check configurations, reconcile output
//!
//! # Main Commands
//!
//! ```bash
//! rebate run -d data -y 2024 -q 1      # Run every transformer under data/transformers
//! rebate run ... --testing             # Also score the output against data/truth
//! rebate serve                         # Start HTTP run control (port 3000)
//! ```
//!
//! # Tooling
//!
//! ```bash
//! rebate check transformers/acme.json  # Parse and validate one transformer
//! rebate compare rebates/ truth/       # Reconcile two CSV files or directories
//! rebate operations                    # Show available DSL operations
//! ```

use clap::{ArgAction, Parser, Subcommand};
use rebate_engine::error::ConfigError;
use rebate_engine::io::list_files;
use rebate_engine::report::{render, render_discrepancy};
use rebate_engine::{
    compare_files, operations_description, CompareOptions, Engine, EngineOptions,
    Event, Quarter, RunSettings, Status, TransformerConfig,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rebate")]
#[command(about = "Declarative transformation engine for tabular rebate records", long_about = None)]
struct Cli {
    /// More output (-v debug, -vv trace). RUST_LOG applies when absent.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every transformer of a data directory
    Run {
        /// Data directory
        #[arg(short, long, env = "REBATE_DIRECTORY")]
        directory: PathBuf,

        /// Year of the quarter to process
        #[arg(short, long, env = "REBATE_YEAR")]
        year: i32,

        /// Quarter to process (1-4)
        #[arg(short, long, env = "REBATE_QUARTER", value_parser = clap::value_parser!(u8).range(1..=4))]
        quarter: u8,

        /// Compare rebates/ with truth/ after the run
        #[arg(long)]
        testing: bool,

        /// Decline every question instead of prompting
        #[arg(long)]
        ignore_all: bool,

        /// First value of the `counter` operation
        #[arg(long, default_value = "0")]
        counter_start: u64,

        /// Rows evaluated concurrently within a transformer
        #[arg(long, default_value = "1")]
        row_concurrency: usize,

        /// Also write the run results as JSON
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Parse and validate a transformer configuration
    Check {
        /// Transformer JSON file
        config: PathBuf,
    },

    /// Reconcile CSV records against expected records
    Compare {
        /// Produced CSV file or directory
        actual: PathBuf,

        /// Expected CSV file or directory
        expected: PathBuf,

        /// Field records are partitioned by
        #[arg(long, default_value = "supplierId")]
        partition_key: String,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Show available DSL operations
    Operations,
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            directory,
            year,
            quarter,
            testing,
            ignore_all,
            counter_start,
            row_concurrency,
            results,
        } => {
            let Some(quarter) = Quarter::new(quarter) else {
                eprintln!("❌ Error: quarter must be between 1 and 4");
                std::process::exit(2);
            };
            let mut settings = RunSettings::new(directory, year, quarter);
            settings.testing.enabled = testing;
            settings.counter_start = counter_start;
            settings.row_concurrency = row_concurrency;
            cmd_run(settings, ignore_all, results.as_deref()).await
        }

        Commands::Check { config } => cmd_check(&config).await,

        Commands::Compare {
            actual,
            expected,
            partition_key,
        } => cmd_compare(&actual, &expected, partition_key).await,

        Commands::Serve { port } => cmd_serve(port).await,

        Commands::Operations => cmd_operations(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_run(
    settings: RunSettings,
    ignore_all: bool,
    results_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _task) = Engine::spawn(EngineOptions::default());
    let mut events = engine.subscribe();

    engine.start(settings)?;
    if ignore_all {
        engine.ignore_all()?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let status = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n⏹️  Cancelling...");
                // The run may have just finished.
                let _ = engine.cancel();
                continue;
            }
        };

        match event {
            Ok(Event::Question { question }) => {
                let answer = prompt(&mut stdin, &question.text).await?;
                engine.answer(question.hash, answer)?;
            }
            Ok(Event::Status { status }) if status.is_terminal() => break status,
            Ok(Event::Status { .. }) => {}
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Missed engine events");
            }
            Err(RecvError::Closed) => return Err("engine stopped unexpectedly".into()),
        }
    };

    engine.exit()?;
    finish(status, results_path)
}

/// Ask on stderr, read one line. An empty line declines.
async fn prompt<R>(
    stdin: &mut tokio::io::Lines<R>,
    text: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    eprintln!("\n❓ {}", text);
    eprint!("   > ");
    let line = stdin.next_line().await?.unwrap_or_default();
    let answer = line.trim();
    Ok((!answer.is_empty()).then(|| answer.to_string()))
}

fn finish(status: Status, results_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let (results, error) = match status {
        Status::Done { results } => (results, None),
        Status::Error { message, results } => (results, Some(message)),
        _ => {
            eprintln!("⏹️  Run cancelled");
            return Ok(());
        }
    };

    println!("{}", render(&results));

    if let Some(path) = results_path {
        std::fs::write(path, serde_json::to_string_pretty(&results)?)?;
        eprintln!("💾 Results written to: {}", path.display());
    }

    match error {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

async fn cmd_check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Checking: {}", path.display());

    match TransformerConfig::load(path).await {
        Ok(config) => {
            eprintln!("   Sources: {}", config.sources.len());
            eprintln!("   Properties: {}", config.header().join(", "));
            eprintln!("✅ {} is valid", config.name);
            Ok(())
        }
        Err(ConfigError::Schema { violations }) => {
            for violation in violations.iter().take(10) {
                eprintln!("   - {}", violation);
            }
            Err(format!("{} schema violation(s)", violations.len()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// A CSV file, or every CSV file below a directory.
fn csv_files(path: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    if path.is_dir() {
        Ok(list_files(&path.join("**").join("*.csv"))?)
    } else {
        Ok(vec![path.to_path_buf()])
    }
}

async fn cmd_compare(actual: &Path, expected: &Path, partition_key: String) -> Result<(), Box<dyn std::error::Error>> {
    let options = CompareOptions {
        partition_key,
        ..CompareOptions::default()
    };

    let results = compare_files(&csv_files(actual)?, &csv_files(expected)?, &options).await?;
    println!("{}", render_discrepancy(&results));

    let dirty = results.iter().filter(|r| !r.is_clean()).count();
    if dirty > 0 {
        return Err(format!("{} of {} partition(s) differ", dirty, results.len()).into());
    }
    eprintln!("✅ All {} partition(s) match", results.len());
    Ok(())
}

async fn cmd_serve(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _task) = Engine::spawn(EngineOptions::default());
    rebate_engine::server::start_server(port, engine).await
}

fn cmd_operations() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", operations_description());
    Ok(())
}
