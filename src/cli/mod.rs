//! CLI argument definitions for agentmeshd.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agentmeshd - AgentMesh trace daemon and agent discovery.
///
/// Start the daemon with `agentmeshd start -b`, then inspect runs with
/// `agentmeshd trace <id>`.
#[derive(Parser, Debug)]
#[command(name = "agentmeshd")]
#[command(author, version, about = "AgentMesh trace daemon and agent discovery", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Data directory (default: ~/.agentmesh).
    /// Can also be set via AGENTMESH_DATA_DIR environment variable.
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Emit log lines as JSON
    #[arg(long = "json-logs", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the trace daemon
    Start {
        /// Bind address (default: config.kdl, then 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (default: config.kdl, then 8321)
        #[arg(long)]
        port: Option<u16>,

        /// Run detached; logs go to agentmeshd.log in the data directory
        #[arg(short = 'b', long)]
        background: bool,
    },

    /// Stop a running daemon
    Stop,

    /// Check whether the daemon is running
    Status,

    /// Rebuild the SQLite index from the JSONL event log
    RebuildIndex,

    /// Show the event trace for a run or task
    Trace {
        /// Run ID or task ID
        id: String,

        /// Daemon URL (default: AGENTMESH_DAEMON_URL, then http://127.0.0.1:8321)
        #[arg(long)]
        daemon_url: Option<String>,
    },

    /// Discover agents on the local network and in a bootstrap file
    Discover {
        /// Bootstrap JSON file for static discovery (default: config.kdl)
        #[arg(long)]
        bootstrap: Option<PathBuf>,

        /// Seconds to listen for mDNS advertisements
        #[arg(long, default_value_t = 5.0)]
        timeout: f64,

        /// Skip mDNS browsing
        #[arg(long)]
        no_mdns: bool,
    },

    /// Advertise an agent over mDNS until interrupted
    Announce {
        /// Agent name (mDNS instance name)
        #[arg(long)]
        name: String,

        /// Agent port
        #[arg(long)]
        port: u16,

        /// URL of the agent's descriptor
        #[arg(long)]
        url: String,
    },
}
