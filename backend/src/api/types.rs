//! REST API types for the control surface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::ask::Question;
use crate::error::RunError;
use crate::runner::Status;

/// Body of `POST /api/answer`. A missing or null `answer` declines the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub hash: String,
    #[serde(default)]
    pub answer: Option<String>,
}

/// Reply to every accepted control request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    /// Identifier for correlating the request with the log stream
    pub request_id: String,

    /// Always "accepted"
    pub status: String,

    /// What the engine was asked to do
    pub action: String,
}

impl AcceptedResponse {
    pub fn new(action: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            status: "accepted".to_string(),
            action: action.to_string(),
        }
    }
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub running: bool,
    pub status: Status,
    /// Questions still waiting for an answer.
    pub questions: Vec<Question>,
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "requestId": Uuid::new_v4().to_string(),
        "status": "error",
        "error": error,
    })
}

/// HTTP status code for an engine error.
pub fn status_code(error: &RunError) -> u16 {
    match error {
        RunError::AlreadyRunning | RunError::NotRunning => 409,
        RunError::Settings(_) => 400,
        RunError::EngineStopped => 503,
        _ => 500,
    }
}
