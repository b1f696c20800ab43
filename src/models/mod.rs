//! Data models for AgentMesh.
//!
//! This module defines the core data structures:
//! - `Event` - Canonical trace record for one observed step of an agent run
//! - `EventKind` - Advisory enumeration of well-known event kinds
//! - `DiscoveredAgent` / `AgentDescriptor` - Discovery results (see [`agents`])

pub mod agents;

pub use agents::{AgentDescriptor, AgentSkill, DiscoveredAgent, DiscoverySource};

use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Current event schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Well-known event kinds.
///
/// The set is advisory: events carry their kind as a plain string and unknown
/// kinds from newer producers are stored and returned unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    Message,
    Artifact,
    Tool,
    Reasoning,
    Error,
}

impl EventKind {
    /// All well-known kinds.
    pub const ALL: [EventKind; 6] = [
        EventKind::Status,
        EventKind::Message,
        EventKind::Artifact,
        EventKind::Tool,
        EventKind::Reasoning,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Message => "message",
            EventKind::Artifact => "artifact",
            EventKind::Tool => "tool",
            EventKind::Reasoning => "reasoning",
            EventKind::Error => "error",
        }
    }

    /// Parse a kind string. Returns `None` for kinds outside the known set.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

/// One observed step in an agent interaction (schema version 1).
///
/// Events are immutable once built: fields are only readable through
/// accessors, and the `with_*` builders consume the value. Serialized as a
/// single JSON object with the fields in declaration order.
///
/// Deserialization goes through [`Event::from_value`], so records in the
/// legacy shape (`event_type` + `message`) are promoted transparently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Event {
    schema_version: String,
    #[serde(rename = "ts")]
    timestamp: String,
    run_id: String,
    kind: String,
    task_id: Option<String>,
    step: Option<String>,
    payload: Map<String, Value>,
    metadata: Map<String, Value>,
    team_run_id: Option<String>,
}

impl Event {
    /// Create a new event stamped with the current schema version and time.
    pub fn new(run_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: now_timestamp(),
            run_id: run_id.into(),
            kind: kind.into(),
            task_id: None,
            step: None,
            payload: Map::new(),
            metadata: Map::new(),
            team_run_id: None,
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_team_run_id(mut self, team_run_id: impl Into<String>) -> Self {
        self.team_run_id = Some(team_run_id.into());
        self
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// ISO-8601 timestamp (`ts` on the wire).
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn team_run_id(&self) -> Option<&str> {
        self.team_run_id.as_deref()
    }

    /// Whether `kind` is one of the well-known kinds.
    pub fn has_known_kind(&self) -> bool {
        EventKind::parse(&self.kind).is_some()
    }

    /// Serialize to a single line of JSON. Non-ASCII text is kept literal.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one JSON line, applying legacy-format promotion.
    pub fn from_json(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::MalformedRecord(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Build an event from an arbitrary JSON value.
    ///
    /// Fails only when the value is not an object. Missing fields default:
    /// `schema_version` to the current version, `kind` to `error`, strings to
    /// empty, maps to `{}`, optional strings to `None`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(data) => Ok(Self::from_map(data)),
            _ => Err(Error::MalformedRecord("expected JSON object".to_string())),
        }
    }

    fn from_map(mut data: Map<String, Value>) -> Self {
        // Legacy records (pre-v1 `EventRecord`) carry `event_type` and a
        // free-form `message`. A present `kind` always marks the new format.
        let is_legacy = data.contains_key("event_type") && !data.contains_key("kind");

        let (kind_field, payload) = if is_legacy {
            let payload = match data.remove("message") {
                Some(Value::String(text)) => {
                    let mut payload = Map::new();
                    payload.insert("text".to_string(), Value::String(text));
                    payload
                }
                Some(Value::Object(message)) => message,
                _ => Map::new(),
            };
            ("event_type", payload)
        } else {
            ("kind", as_map(data.remove("payload")))
        };

        Self {
            schema_version: string_field(data.get("schema_version"))
                .unwrap_or_else(|| SCHEMA_VERSION.to_string()),
            timestamp: string_field(data.get("ts")).unwrap_or_default(),
            run_id: string_field(data.get("run_id")).unwrap_or_default(),
            kind: string_field(data.get(kind_field))
                .unwrap_or_else(|| EventKind::Error.as_str().to_string()),
            task_id: string_field(data.get("task_id")),
            step: string_field(data.get("step")),
            payload,
            metadata: as_map(data.remove("metadata")),
            team_run_id: string_field(data.get("team_run_id")),
        }
    }
}

impl TryFrom<Value> for Event {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

/// Current UTC time in the event timestamp format.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Fresh identifier for a new run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Coerce a JSON scalar to a string. `null` and missing values are `None`;
/// numbers and booleans are rendered as their JSON text.
fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_map(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
