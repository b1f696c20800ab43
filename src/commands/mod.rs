//! Command implementations for the agentmeshd CLI.
//!
//! Each command returns a result type implementing [`CommandResult`], which
//! the binary prints as JSON (default) or human-readable text (`-H`).

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::client::{DaemonClient, Trace, fetch_trace};
use crate::daemon::{self, DaemonOptions, DaemonStatus, StartOutcome};
use crate::discovery::{DiscoveryManager, MdnsAnnouncer, MdnsDiscovery, StaticDiscovery};
use crate::models::{DiscoveredAgent, Event, EventKind};
use crate::storage::EventStore;
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait CommandResult {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn to_json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

// === start ===

#[derive(Debug, Serialize)]
pub struct StartResult {
    #[serde(flatten)]
    pub outcome: StartOutcome,
    pub url: String,
}

impl CommandResult for StartResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        match &self.outcome {
            StartOutcome::AlreadyRunning { pid } => {
                format!("agentmeshd already running (pid {})", pid)
            }
            StartOutcome::Started { pid, log_path } => format!(
                "agentmeshd started (pid {}) at {}\nLogs: {}",
                pid,
                self.url,
                log_path.display()
            ),
        }
    }
}

/// Start a detached daemon.
pub fn start_background(opts: &DaemonOptions) -> Result<StartResult> {
    let outcome = daemon::start_background(opts)?;
    Ok(StartResult {
        outcome,
        url: opts.url(),
    })
}

// === stop ===

#[derive(Debug, Serialize)]
pub struct StopResult {
    pub stopped: bool,
}

impl CommandResult for StopResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.stopped {
            "agentmeshd stopped.".to_string()
        } else {
            "agentmeshd is not running.".to_string()
        }
    }
}

pub fn stop(data_dir: &Path) -> StopResult {
    StopResult {
        stopped: daemon::stop(data_dir),
    }
}

// === status ===

#[derive(Debug, Serialize)]
pub struct StatusResult {
    #[serde(flatten)]
    pub status: DaemonStatus,
    pub data_dir: PathBuf,
}

impl CommandResult for StatusResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("agentmeshd: {}", self.status)
    }
}

pub fn status(data_dir: &Path) -> StatusResult {
    StatusResult {
        status: daemon::status(data_dir),
        data_dir: data_dir.to_path_buf(),
    }
}

// === rebuild-index ===

#[derive(Debug, Serialize)]
pub struct RebuildResult {
    pub indexed: usize,
    pub log_path: PathBuf,
}

impl CommandResult for RebuildResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Rebuilt index with {} event(s) from {}",
            self.indexed,
            self.log_path.display()
        )
    }
}

/// Rebuild the SQLite index from the event log.
pub fn rebuild_index(data_dir: &Path) -> Result<RebuildResult> {
    let store = EventStore::open(data_dir)?;
    let indexed = store.rebuild_index()?;
    let log_path = store.log_path().to_path_buf();
    store.close()?;
    info!(indexed, "event index rebuilt");
    Ok(RebuildResult { indexed, log_path })
}

// === trace ===

#[derive(Debug, Serialize)]
pub struct TraceResult {
    #[serde(flatten)]
    pub trace: Trace,
}

impl CommandResult for TraceResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let events = &self.trace.events;
        let Some(first) = events.first() else {
            return "No events found.".to_string();
        };

        let agent = ["agent_name", "agent_url"]
            .iter()
            .filter_map(|key| first.metadata().get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .unwrap_or("unknown");

        let mut lines = vec![format!(
            "Run: {}  Agent: {}  Started: {}",
            self.trace.resolved_id,
            agent,
            first.timestamp()
        )];
        for event in events {
            lines.push(format!(
                "  {}  {:<10} {}",
                time_of_day(event.timestamp()),
                event.kind(),
                event_detail(event)
            ));
        }
        lines.join("\n")
    }
}

/// `HH:MM:SS.mmm` portion of an RFC 3339 timestamp.
fn time_of_day(ts: &str) -> &str {
    let time = ts.split_once('T').map(|(_, time)| time).unwrap_or(ts);
    match time.char_indices().nth(12) {
        Some((end, _)) => &time[..end],
        None => time,
    }
}

/// One-line summary of an event's payload.
fn event_detail(event: &Event) -> String {
    let payload = event.payload();
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let quoted = |s: String| if s.is_empty() { s } else { format!("\"{}\"", s) };

    match EventKind::parse(event.kind()) {
        Some(EventKind::Message) | Some(EventKind::Artifact) => quoted(text("text")),
        Some(EventKind::Status) => {
            let state = text("state");
            if state.is_empty() {
                event
                    .metadata()
                    .get("state")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            } else {
                state
            }
        }
        Some(EventKind::Tool) => {
            let (name, phase) = (text("name"), text("phase"));
            if phase.is_empty() {
                name
            } else {
                format!("{} ({})", name, phase)
            }
        }
        Some(EventKind::Error) => text("message"),
        Some(EventKind::Reasoning) | None => {
            if payload.is_empty() {
                String::new()
            } else {
                Value::Object(payload.clone())
                    .to_string()
                    .chars()
                    .take(60)
                    .collect()
            }
        }
    }
}

/// Fetch the trace for a run or task id.
pub async fn trace(daemon_url: &str, id: &str) -> Result<TraceResult> {
    let client = DaemonClient::new(daemon_url)?;
    let trace = fetch_trace(&client, id).await?;
    if trace.events.is_empty() {
        return Err(Error::Other(format!("No events found for '{}'.", id)));
    }
    Ok(TraceResult { trace })
}

// === discover ===

#[derive(Debug, Serialize)]
pub struct DiscoverResult {
    pub agents: Vec<DiscoveredAgent>,
}

impl CommandResult for DiscoverResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Discovered {} agent(s):", self.agents.len())];
        for agent in &self.agents {
            let skills = agent
                .descriptor
                .as_ref()
                .map(|d| {
                    d.skills
                        .iter()
                        .map(|s| s.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let reachability = if agent.descriptor.is_some() {
                "reachable"
            } else {
                "discovered"
            };
            lines.push(format!(
                "  {}  {}  [{}]  {}  {}",
                agent.name, agent.identity_url, agent.source, reachability, skills
            ));
        }
        lines.join("\n").trim_end().to_string()
    }
}

/// Options for [`discover`].
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    pub bootstrap: Option<PathBuf>,
    pub timeout: Duration,
    pub mdns: bool,
}

/// Collect agents from mDNS and the bootstrap file, then resolve descriptors.
///
/// Finding no agents at all is a discovery failure.
pub async fn discover(opts: &DiscoverOptions) -> Result<DiscoverResult> {
    let manager = DiscoveryManager::new();

    if opts.mdns {
        let mdns = MdnsDiscovery::new();
        mdns.start(None)?;
        tokio::time::sleep(opts.timeout).await;
        manager.collect(&mdns)?;
        mdns.stop();
    }

    if let Some(ref path) = opts.bootstrap {
        manager.collect(&StaticDiscovery::new(path))?;
    }

    if manager.is_empty() {
        return Err(Error::Discovery("No A2A agents found.".to_string()));
    }

    manager.resolve_descriptors().await;
    Ok(DiscoverResult {
        agents: manager.list(),
    })
}

// === announce ===

#[derive(Debug, Serialize)]
pub struct AnnounceResult {
    pub name: String,
    pub port: u16,
    pub url: String,
}

impl CommandResult for AnnounceResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Announcing {} on port {} ({}). Press Ctrl+C to stop.",
            self.name, self.port, self.url
        )
    }
}

/// Register an mDNS advertisement. It stays up until the announcer is
/// stopped or dropped.
pub fn announce(name: &str, port: u16, url: &str) -> Result<(MdnsAnnouncer, AnnounceResult)> {
    let mut announcer = MdnsAnnouncer::new(name, port, url);
    announcer.start()?;
    Ok((
        announcer,
        AnnounceResult {
            name: name.to_string(),
            port,
            url: url.to_string(),
        },
    ))
}
