//! HTTP API module.
//!
//! This module provides the HTTP control surface of the run engine and the
//! log broadcaster every other module writes to.

pub mod logs;
pub mod server;
pub mod types;

pub use logs::*;
pub use server::{router, start_server, AppState};
pub use types::*;
