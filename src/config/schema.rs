//! KDL schema for `config.kdl`.
//!
//! ```kdl
//! host "127.0.0.1"
//! port 8321
//! bootstrap "~/.agentmesh/bootstrap.json"
//! ```
//!
//! Every node is optional. Values of the wrong type or out of range are
//! ignored with a warning.

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::Result;

/// Config file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.kdl";

/// Serve defaults read from `config.kdl`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentMeshConfig {
    /// Bind address for `agentmeshd start`
    pub host: Option<String>,
    /// Bind port for `agentmeshd start`
    pub port: Option<u16>,
    /// Bootstrap file for static discovery
    pub bootstrap: Option<PathBuf>,
}

impl AgentMeshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(value) = first_value(doc, "host") {
            match value.as_string() {
                Some(s) if !s.trim().is_empty() => config.host = Some(s.trim().to_string()),
                _ => warn!(value = %value, "ignoring invalid host in config.kdl"),
            }
        }

        if let Some(value) = first_value(doc, "port") {
            match value.as_integer().and_then(|i| u16::try_from(i).ok()) {
                Some(port) => config.port = Some(port),
                None => warn!(value = %value, "ignoring invalid port in config.kdl"),
            }
        }

        if let Some(value) = first_value(doc, "bootstrap") {
            match value.as_string() {
                Some(s) if !s.is_empty() => config.bootstrap = Some(PathBuf::from(s)),
                _ => warn!(value = %value, "ignoring invalid bootstrap in config.kdl"),
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref host) = self.host {
            let mut node = KdlNode::new("host");
            node.push(KdlEntry::new(KdlValue::String(host.clone())));
            doc.nodes_mut().push(node);
        }

        if let Some(port) = self.port {
            let mut node = KdlNode::new("port");
            node.push(KdlEntry::new(KdlValue::Integer(port as i128)));
            doc.nodes_mut().push(node);
        }

        if let Some(ref bootstrap) = self.bootstrap {
            let mut node = KdlNode::new("bootstrap");
            node.push(KdlEntry::new(KdlValue::String(
                bootstrap.display().to_string(),
            )));
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Load config from `path`.
    ///
    /// A missing file is an empty config. A file that is not valid KDL is
    /// ignored with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        match contents.parse::<KdlDocument>() {
            Ok(doc) => Ok(Self::from_kdl(&doc)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
                Ok(Self::new())
            }
        }
    }

    /// Load `config.kdl` from a data directory.
    pub fn load_from_data_dir(data_dir: &Path) -> Result<Self> {
        Self::load(&data_dir.join(CONFIG_FILE_NAME))
    }

    /// Write config to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_kdl().to_string())?;
        Ok(())
    }
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}
