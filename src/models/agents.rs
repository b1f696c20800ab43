//! Discovery models: agents found on the network and their descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which discovery mechanism produced an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// Multicast DNS advertisement
    Mdns,
    /// Static bootstrap file
    Static,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Mdns => "mdns",
            DiscoverySource::Static => "static",
        }
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reachable remote agent candidate.
///
/// Agents are identified by `identity_url` (the URL of their agent card), not
/// by display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredAgent {
    /// Display name
    pub name: String,

    /// Canonical locator used for deduplication
    #[serde(rename = "agent_card_url", alias = "identity_url")]
    pub identity_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    pub source: DiscoverySource,

    /// Descriptor fetched from `identity_url`, once resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<AgentDescriptor>,

    /// Raw advertisement attributes (mDNS TXT records)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub txt: BTreeMap<String, String>,
}

impl DiscoveredAgent {
    pub fn new(
        name: impl Into<String>,
        identity_url: impl Into<String>,
        source: DiscoverySource,
    ) -> Self {
        Self {
            name: name.into(),
            identity_url: identity_url.into(),
            host: None,
            port: None,
            source,
            descriptor: None,
            txt: BTreeMap::new(),
        }
    }

    pub fn with_location(mut self, host: Option<String>, port: Option<u16>) -> Self {
        self.host = host;
        self.port = port;
        self
    }
}

/// A skill listed in an agent descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The self-description document an agent serves at its identity URL.
///
/// Unknown fields are ignored so richer agent cards still parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,

    /// RPC endpoint of the agent
    #[serde(rename = "url", alias = "endpoint_url")]
    pub endpoint_url: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}
