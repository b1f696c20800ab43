//! AgentMesh - local event trace daemon and agent discovery.
//!
//! This library provides the core functionality for the `agentmeshd` binary,
//! including the event model, the dual-write event store, the HTTP trace
//! service, daemon lifecycle management, and agent discovery.

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod logging;
pub mod models;
pub mod storage;

use std::path::PathBuf;


/// Library-level error type for AgentMesh operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database operation failed ({}): {source}", resource.display())]
    Database {
        resource: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("storage write failed ({}): {source}", resource.display())]
    Storage {
        resource: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Event store is closed")]
    StoreClosed,

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    DaemonUnavailable(String),

    #[error("Daemon request failed: {0}")]
    Transport(String),

    #[error("Failed to fetch agent descriptor from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("agentmeshd failed to start. Check {}", log_path.display())]
    StartupFailed { log_path: PathBuf },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code the `agentmeshd` binary uses for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidInput(_) => 2,
            Error::DaemonUnavailable(_) | Error::Transport(_) => 10,
            Error::Discovery(_) | Error::Fetch { .. } => 11,
            _ => 1,
        }
    }
}

/// Result type alias for AgentMesh operations.
pub type Result<T> = std::result::Result<T, Error>;
