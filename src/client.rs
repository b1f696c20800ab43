//! HTTP client for the trace service.
//!
//! [`DaemonClient`] talks to a running `agentmeshd`. [`EventRecorder`] layers
//! best-effort recording on top: it probes the daemon once and silently drops
//! events when the daemon is unavailable. [`fetch_trace`] resolves an id that
//! may name either a run or a task.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::models::Event;
use crate::storage::EventQuery;
use crate::{Error, Result};

/// Daemon URL used when neither a flag nor `AGENTMESH_DAEMON_URL` is set.
pub const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:8321";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one trace service instance.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Whether the daemon answers its liveness probe. Never fails.
    pub async fn healthz(&self) -> bool {
        match self.http.get(self.url("/healthz")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.base_url, error = %e, "health check failed");
                false
            }
        }
    }

    /// Record an event. Returns the event as stored by the daemon.
    pub async fn post_event(&self, event: &Event) -> Result<Event> {
        let response = self
            .http
            .post(self.url("/api/events"))
            .json(event)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::Transport(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Query events. `query.limit` is always sent.
    pub async fn get_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let mut params: Vec<(&str, String)> = vec![("limit", query.limit.to_string())];
        if let Some(run_id) = &query.run_id {
            params.push(("run_id", run_id.clone()));
        }
        if let Some(task_id) = &query.task_id {
            params.push(("task_id", task_id.clone()));
        }
        if let Some(kind) = &query.kind {
            params.push(("kind", kind.clone()));
        }

        let response = self
            .http
            .get(self.url("/api/events"))
            .query(&params)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::Transport(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// Best-effort event recording.
///
/// The first call probes the daemon and caches the answer for the life of
/// the recorder. Post failures are logged at debug level and otherwise
/// ignored.
#[derive(Debug, Default)]
pub struct EventRecorder {
    client: Option<DaemonClient>,
    available: OnceCell<bool>,
}

impl EventRecorder {
    pub fn new(client: DaemonClient) -> Self {
        Self {
            client: Some(client),
            available: OnceCell::new(),
        }
    }

    /// A recorder that never records.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Probe the daemon on first use; later calls return the cached result.
    pub async fn try_connect(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        *self
            .available
            .get_or_init(|| async { client.healthz().await })
            .await
    }

    /// Send `event` if the daemon is available. Returns whether it was stored.
    pub async fn record(&self, event: &Event) -> bool {
        if !self.try_connect().await {
            return false;
        }
        let Some(client) = &self.client else {
            return false;
        };

        match client.post_event(event).await {
            Ok(_) => true,
            Err(e) => {
                debug!(run_id = %event.run_id(), error = %e, "dropping event");
                false
            }
        }
    }
}

/// Events for one trace, and the id they were resolved under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub resolved_id: String,
    pub events: Vec<Event>,
}

/// Resolve `id` as a run id, or failing that as a task id expanded to its
/// whole run.
///
/// Fails with [`Error::DaemonUnavailable`] if the daemon does not answer its
/// health check. An id matching nothing yields an empty trace.
pub async fn fetch_trace(client: &DaemonClient, id: &str) -> Result<Trace> {
    if !client.healthz().await {
        return Err(Error::DaemonUnavailable(
            "agentmeshd not running; trace requires the daemon. Start it with 'agentmeshd start'."
                .to_string(),
        ));
    }

    let by_run = client.get_events(&EventQuery::new().run_id(id)).await?;
    if !by_run.is_empty() {
        return Ok(Trace {
            resolved_id: id.to_string(),
            events: by_run,
        });
    }

    let by_task = client.get_events(&EventQuery::new().task_id(id)).await?;
    let run_id = by_task
        .first()
        .map(|event| event.run_id().to_string())
        .unwrap_or_default();
    if !run_id.is_empty() {
        let full = client.get_events(&EventQuery::new().run_id(&run_id)).await?;
        if !full.is_empty() {
            return Ok(Trace {
                resolved_id: run_id,
                events: full,
            });
        }
    }

    Ok(Trace {
        resolved_id: id.to_string(),
        events: by_task,
    })
}
