//! Run orchestration.
//!
//! A run loads every transformer under `transformers/`, executes them one
//! after the other against a shared [`Context`](crate::transform::Context),
//! optionally scores the output against `truth/`, and reports its progress
//! as a status machine:
//!
//! ```text
//! idle ─start─▶ loading ─▶ running(progress) ─▶ loading ─▶ done | error
//!   ▲                                                        │
//!   └──────────────────────── cancel ────────────────────────┘
//! ```
//!
//! The engine is an actor: callers talk to it through an [`EngineHandle`]
//! (control messages in, [`Event`]s out) and never share its state.

pub mod engine;
pub mod settings;

use serde::{Deserialize, Serialize};

use crate::ask::Question;
use crate::models::RunResults;

pub use engine::{Engine, EngineHandle, EngineOptions};
pub use settings::{RunSettings, TestingSettings};

/// Where the engine is in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Status {
    Idle,
    Loading {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Running {
        /// Fraction of transformers started, in `[0, 1]`.
        progress: f64,
    },
    Done {
        results: RunResults,
    },
    Error {
        message: String,
        /// Whatever finished before the failure
        results: RunResults,
    },
}

impl Status {
    pub fn loading(message: impl Into<String>) -> Self {
        Status::Loading {
            message: Some(message.into()),
        }
    }

    /// Whether the status ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Idle | Status::Done { .. } | Status::Error { .. })
    }
}

/// Messages sent by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Status { status: Status },
    Question { question: Question },
}

/// Messages understood by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Control {
    Start { settings: RunSettings },
    Answer { hash: String, answer: Option<String> },
    IgnoreAll,
    Cancel,
    Exit,
}
