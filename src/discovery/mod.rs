//! Agent discovery: sources, deduplication and descriptor resolution.
//!
//! Sources implement [`Discover`]. The [`DiscoveryManager`] merges their
//! results keyed by identity URL (first seen wins) and resolves descriptors.

pub mod announcer;
pub mod mdns;
pub mod static_file;

pub use announcer::MdnsAnnouncer;
pub use mdns::{
    A2A_SERVICE_TYPE, Advertisement, AdvertisementHandler, AgentObserver, Browse, BrowseHandle,
    MdnsDiscovery, MdnsSdBrowser,
};
pub use static_file::StaticDiscovery;

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::models::{AgentDescriptor, DiscoveredAgent};
use crate::{Error, Result};

/// Timeout for fetching one agent descriptor.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A source of candidate agents.
pub trait Discover {
    fn discover(&self) -> Result<Vec<DiscoveredAgent>>;
}

/// Deduplicating aggregate of discovered agents, in first-seen order.
#[derive(Debug, Default)]
pub struct DiscoveryManager {
    agents: Mutex<IndexMap<String, DiscoveredAgent>>,
    http: reqwest::Client,
}

impl DiscoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert agents not already known by identity URL. Returns how many were new.
    pub fn add(&self, agents: impl IntoIterator<Item = DiscoveredAgent>) -> usize {
        let mut known = self.agents.lock();
        let mut added = 0;
        for agent in agents {
            if known.contains_key(&agent.identity_url) {
                continue;
            }
            known.insert(agent.identity_url.clone(), agent);
            added += 1;
        }
        added
    }

    /// Snapshot of all agents in insertion order.
    pub fn list(&self) -> Vec<DiscoveredAgent> {
        self.agents.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.lock().is_empty()
    }

    /// Run one source and add its results.
    pub fn collect(&self, source: &dyn Discover) -> Result<usize> {
        let found = source.discover()?;
        let total = found.len();
        let added = self.add(found);
        debug!(total, added, "collected agents from source");
        Ok(added)
    }

    /// Attach a resolved descriptor to a known agent.
    pub fn set_descriptor(&self, identity_url: &str, descriptor: AgentDescriptor) -> bool {
        match self.agents.lock().get_mut(identity_url) {
            Some(agent) => {
                agent.descriptor = Some(descriptor);
                true
            }
            None => false,
        }
    }

    /// Fetch and parse the descriptor served at `identity_url`.
    pub async fn fetch_descriptor(&self, identity_url: &str) -> Result<AgentDescriptor> {
        fetch_descriptor(&self.http, identity_url).await
    }

    /// Fetch descriptors for every known agent concurrently.
    ///
    /// Agents whose descriptor cannot be fetched keep `descriptor = None`.
    /// Returns the number resolved.
    pub async fn resolve_descriptors(&self) -> usize {
        let mut tasks = JoinSet::new();
        for agent in self.list() {
            let http = self.http.clone();
            tasks.spawn(async move {
                let result = fetch_descriptor(&http, &agent.identity_url).await;
                (agent.identity_url, result)
            });
        }

        let mut resolved = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((url, Ok(descriptor))) => {
                    if self.set_descriptor(&url, descriptor) {
                        resolved += 1;
                    }
                }
                Ok((url, Err(e))) => debug!(%url, error = %e, "descriptor fetch failed"),
                Err(e) => debug!(error = %e, "descriptor task failed"),
            }
        }
        info!(resolved, total = self.len(), "resolved agent descriptors");
        resolved
    }
}

async fn fetch_descriptor(http: &reqwest::Client, url: &str) -> Result<AgentDescriptor> {
    let fetch_error = |reason: String| Error::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = http
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(format!("HTTP {}", status)));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| fetch_error(format!("invalid descriptor: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoverySource;
    use axum::{Json, Router, http::StatusCode, routing::get};
    use serde_json::json;

    fn agent(name: &str, url: &str, source: DiscoverySource) -> DiscoveredAgent {
        DiscoveredAgent::new(name, url, source)
    }

    struct FixedSource(Vec<DiscoveredAgent>);

    impl Discover for FixedSource {
        fn discover(&self) -> Result<Vec<DiscoveredAgent>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl Discover for FailingSource {
        fn discover(&self) -> Result<Vec<DiscoveredAgent>> {
            Err(Error::Discovery("no multicast socket".into()))
        }
    }

    #[test]
    fn test_add_deduplicates_first_seen_wins() {
        let manager = DiscoveryManager::new();
        let added = manager.add(vec![
            agent("A", "http://x/card", DiscoverySource::Mdns),
            agent("B", "http://x/card", DiscoverySource::Static),
        ]);
        assert_eq!(added, 1);

        let agents = manager.list();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "A");
        assert_eq!(agents[0].source, DiscoverySource::Mdns);
    }

    #[test]
    fn test_add_across_calls_preserves_insertion_order() {
        let manager = DiscoveryManager::new();
        manager.add(vec![agent("A", "http://a", DiscoverySource::Mdns)]);
        manager.add(vec![
            agent("B", "http://b", DiscoverySource::Static),
            agent("A2", "http://a", DiscoverySource::Static),
            agent("C", "http://c", DiscoverySource::Static),
        ]);

        let names: Vec<_> = manager.list().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_same_name_different_urls_are_distinct() {
        let manager = DiscoveryManager::new();
        manager.add(vec![
            agent("Echo", "http://a", DiscoverySource::Mdns),
            agent("Echo", "http://b", DiscoverySource::Mdns),
        ]);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_collect_from_sources() {
        let manager = DiscoveryManager::new();
        let mdns = FixedSource(vec![agent("A", "http://a", DiscoverySource::Mdns)]);
        let bootstrap = FixedSource(vec![
            agent("A", "http://a", DiscoverySource::Static),
            agent("B", "http://b", DiscoverySource::Static),
        ]);

        assert_eq!(manager.collect(&mdns).unwrap(), 1);
        assert_eq!(manager.collect(&bootstrap).unwrap(), 1);
        assert_eq!(manager.list()[0].source, DiscoverySource::Mdns);
    }

    #[test]
    fn test_collect_propagates_source_error() {
        let manager = DiscoveryManager::new();
        let err = manager.collect(&FailingSource).unwrap_err();
        assert_eq!(err.exit_code(), 11);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_set_descriptor_unknown_agent() {
        let manager = DiscoveryManager::new();
        let descriptor = AgentDescriptor {
            name: "A".into(),
            endpoint_url: "http://a/rpc".into(),
            description: String::new(),
            version: None,
            skills: vec![],
        };
        assert!(!manager.set_descriptor("http://a", descriptor));
    }

    async fn card_server() -> String {
        let app = Router::new()
            .route(
                "/card.json",
                get(|| async {
                    Json(json!({
                        "name": "Echo",
                        "url": "http://127.0.0.1:1/rpc",
                        "skills": [{"id": "echo", "name": "Echo"}]
                    }))
                }),
            )
            .route("/broken.json", get(|| async { "not a card" }))
            .route("/missing.json", get(|| async { StatusCode::NOT_FOUND }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_descriptor() {
        let base = card_server().await;
        let manager = DiscoveryManager::new();
        let descriptor = manager
            .fetch_descriptor(&format!("{}/card.json", base))
            .await
            .unwrap();
        assert_eq!(descriptor.name, "Echo");
        assert_eq!(descriptor.skills.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_descriptor_failures() {
        let base = card_server().await;
        let manager = DiscoveryManager::new();

        let err = manager
            .fetch_descriptor(&format!("{}/missing.json", base))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { ref reason, .. } if reason.contains("404")));

        let err = manager
            .fetch_descriptor(&format!("{}/broken.json", base))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_resolve_descriptors_keeps_failures_unresolved() {
        let base = card_server().await;
        let manager = DiscoveryManager::new();
        manager.add(vec![
            agent("Echo", &format!("{}/card.json", base), DiscoverySource::Static),
            agent("Gone", &format!("{}/missing.json", base), DiscoverySource::Static),
        ]);

        assert_eq!(manager.resolve_descriptors().await, 1);
        let agents = manager.list();
        assert!(agents[0].descriptor.is_some());
        assert!(agents[1].descriptor.is_none());
    }
}
