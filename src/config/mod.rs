//! Configuration for AgentMesh.
//!
//! ## Data directory
//!
//! Defaults to `~/.agentmesh`, overridden by `--data-dir` or
//! `AGENTMESH_DATA_DIR`. It holds the PID file, the daemon log, the event log
//! and index, and the optional `config.kdl`.
//!
//! ## config.kdl - Serve defaults
//!
//! Contains:
//! - `host` - Bind address for the trace service
//! - `port` - Bind port for the trace service
//! - `bootstrap` - Static discovery bootstrap file
//!
//! ## Precedence
//!
//! CLI flag > environment > config.kdl > defaults. Use the [`resolver`]
//! module for resolution with source tracking.

pub mod resolver;
pub mod schema;

pub use resolver::{
    DAEMON_URL_ENV, DATA_DIR_ENV, Resolved, ResolvedServe, ServeOverrides, ValueSource,
    expand_tilde, resolve_daemon_url, resolve_data_dir, resolve_serve,
};
pub use schema::{AgentMeshConfig, CONFIG_FILE_NAME};
