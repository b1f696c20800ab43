//! Static discovery from a bootstrap JSON file.
//!
//! ```json
//! {"agents": [{"name": "Echo", "url": "http://127.0.0.1:18789/.well-known/agent.json"}]}
//! ```

use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::Discover;
use crate::models::{DiscoveredAgent, DiscoverySource};
use crate::{Error, Result};

/// Reads candidate agents from a bootstrap file.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    path: PathBuf,
}

impl StaticDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Discover for StaticDiscovery {
    /// A missing file yields no agents. Entries that are not objects or lack
    /// a `url` are skipped.
    fn discover(&self) -> Result<Vec<DiscoveredAgent>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no bootstrap file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let malformed = |reason: &str| {
            Error::MalformedRecord(format!("{}: {}", self.path.display(), reason))
        };

        let document: Value =
            serde_json::from_str(&contents).map_err(|e| malformed(&e.to_string()))?;
        let Value::Object(document) = document else {
            return Err(malformed("expected a JSON object"));
        };

        let entries = match document.get("agents") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(malformed("\"agents\" must be an array")),
        };

        let agents = entries
            .iter()
            .filter_map(|entry| {
                let entry = entry.as_object()?;
                let url = text(entry.get("url"))?;
                if url.is_empty() {
                    return None;
                }
                let name = text(entry.get("name")).unwrap_or_default();
                Some(DiscoveredAgent::new(name, url, DiscoverySource::Static))
            })
            .collect();

        Ok(agents)
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
