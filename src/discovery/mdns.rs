//! mDNS discovery of agents advertising `_a2a._tcp.local.`.
//!
//! Advertisements arrive on a listener thread owned by the browsing backend.
//! They are decoded into [`DiscoveredAgent`]s and recorded in one map behind a
//! single mutex, so concurrent callbacks never interleave partially.

use indexmap::IndexMap;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::Discover;
use crate::models::{DiscoveredAgent, DiscoverySource};
use crate::{Error, Result};

/// Service type agents advertise under.
pub const A2A_SERVICE_TYPE: &str = "_a2a._tcp.local.";

const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A resolved service advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Instance name without the service type suffix
    pub instance_name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub txt: BTreeMap<String, String>,
}

impl Advertisement {
    /// Decode into an agent. Advertisements without a `url` TXT record are
    /// not agents.
    pub fn to_agent(&self) -> Option<DiscoveredAgent> {
        let url = self.txt.get("url").filter(|url| !url.is_empty())?;
        let name = self
            .txt
            .get("name")
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.instance_name);

        let host = self.addresses.first().map(|addr| addr.to_string());
        let port = (self.port != 0).then_some(self.port);

        let mut agent = DiscoveredAgent::new(name.clone(), url.clone(), DiscoverySource::Mdns)
            .with_location(host, port);
        agent.txt = self.txt.clone();
        Some(agent)
    }
}

/// Callback invoked on the backend's listener thread.
pub type AdvertisementHandler = Arc<dyn Fn(Advertisement) + Send + Sync>;

/// Callback invoked for every agent recorded by a running browse.
pub type AgentObserver = Arc<dyn Fn(&DiscoveredAgent) + Send + Sync>;

/// A browsing backend.
pub trait Browse: Send + Sync {
    /// Start browsing `service_type`, delivering resolved advertisements to
    /// `handler` until the returned handle is closed.
    fn browse(
        &self,
        service_type: &str,
        handler: AdvertisementHandler,
    ) -> Result<Box<dyn BrowseHandle>>;
}

/// A live browse session.
pub trait BrowseHandle: Send {
    /// Stop browsing and release network resources. Blocks until the
    /// listener has exited.
    fn close(self: Box<Self>);
}

/// [`Browse`] backed by the `mdns-sd` daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct MdnsSdBrowser;

impl Browse for MdnsSdBrowser {
    fn browse(
        &self,
        service_type: &str,
        handler: AdvertisementHandler,
    ) -> Result<Box<dyn BrowseHandle>> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
        let receiver = daemon
            .browse(service_type)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let listener_stop = Arc::clone(&stop);
        let service_type = service_type.to_string();

        let listener = thread::Builder::new()
            .name("mdns-browse".to_string())
            .spawn(move || {
                while !listener_stop.load(Ordering::Acquire) {
                    match receiver.recv_timeout(LISTENER_POLL_INTERVAL) {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            handler(advertisement_from(&info, &service_type));
                        }
                        Ok(_) => {}
                        Err(_) if receiver.is_disconnected() => break,
                        Err(_) => {}
                    }
                }
            })?;

        Ok(Box::new(MdnsSdSession {
            daemon,
            stop,
            listener: Some(listener),
        }))
    }
}

struct MdnsSdSession {
    daemon: ServiceDaemon,
    stop: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl BrowseHandle for MdnsSdSession {
    fn close(mut self: Box<Self>) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mdns daemon shutdown");
        }
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!("mdns listener thread panicked");
            }
        }
    }
}

fn advertisement_from(info: &ServiceInfo, service_type: &str) -> Advertisement {
    let fullname = info.get_fullname();
    let instance_name = fullname
        .strip_suffix(service_type)
        .map(|name| name.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string();

    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();

    let txt = info
        .get_properties()
        .iter()
        .map(|property| (property.key().to_string(), property.val_str().to_string()))
        .collect();

    Advertisement {
        instance_name,
        addresses,
        port: info.get_port(),
        txt,
    }
}

type AgentMap = Arc<Mutex<IndexMap<String, DiscoveredAgent>>>;

/// Record an advertisement; a re-advertisement replaces the earlier entry.
fn record(agents: &AgentMap, advert: &Advertisement) -> Option<DiscoveredAgent> {
    let agent = advert.to_agent()?;
    agents
        .lock()
        .insert(agent.identity_url.clone(), agent.clone());
    Some(agent)
}

/// Closes a browse session when dropped, so a cancelled wait still tears down.
struct BrowseGuard(Option<Box<dyn BrowseHandle>>);

impl BrowseGuard {
    async fn close(mut self) {
        if let Some(handle) = self.0.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || handle.close()).await {
                warn!(error = %e, "browse teardown task failed");
            }
        }
    }
}

impl Drop for BrowseGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.close();
        }
    }
}

/// mDNS discovery source.
pub struct MdnsDiscovery {
    browser: Arc<dyn Browse>,
    agents: AgentMap,
    session: Mutex<Option<Box<dyn BrowseHandle>>>,
}

impl MdnsDiscovery {
    pub fn new() -> Self {
        Self::with_browser(Arc::new(MdnsSdBrowser))
    }

    pub fn with_browser(browser: Arc<dyn Browse>) -> Self {
        Self {
            browser,
            agents: Arc::new(Mutex::new(IndexMap::new())),
            session: Mutex::new(None),
        }
    }

    /// Snapshot of agents seen so far.
    pub fn agents(&self) -> Vec<DiscoveredAgent> {
        self.agents.lock().values().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Start a background browse. Calling `start` while running is a no-op.
    pub fn start(&self, observer: Option<AgentObserver>) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }

        let agents = Arc::clone(&self.agents);
        let handler: AdvertisementHandler = Arc::new(move |advert| {
            if let Some(agent) = record(&agents, &advert) {
                debug!(name = %agent.name, url = %agent.identity_url, "mdns agent found");
                if let Some(observer) = &observer {
                    observer(&agent);
                }
            }
        });

        *session = Some(self.browser.browse(A2A_SERVICE_TYPE, handler)?);
        info!(service_type = A2A_SERVICE_TYPE, "mdns browse started");
        Ok(())
    }

    /// Stop the background browse, if any.
    pub fn stop(&self) {
        let handle = self.session.lock().take();
        if let Some(handle) = handle {
            handle.close();
            info!("mdns browse stopped");
        }
    }

    /// Return one agent, browsing for up to `timeout` if none is known yet.
    ///
    /// The temporary browse is torn down whether an agent arrived, the
    /// deadline passed, or the caller dropped the future.
    pub async fn discover_one(&self, timeout: Duration) -> Result<Option<DiscoveredAgent>> {
        if let Some(agent) = self.agents.lock().values().next().cloned() {
            return Ok(Some(agent));
        }

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let agents = Arc::clone(&self.agents);
        let handler: AdvertisementHandler = Arc::new(move |advert| {
            if let Some(agent) = record(&agents, &advert) {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(agent);
                }
            }
        });

        let guard = BrowseGuard(Some(self.browser.browse(A2A_SERVICE_TYPE, handler)?));
        let found = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(agent)) => Some(agent),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!(?timeout, "no mdns agent before deadline");
                None
            }
        };
        guard.close().await;

        Ok(found)
    }
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Discover for MdnsDiscovery {
    fn discover(&self) -> Result<Vec<DiscoveredAgent>> {
        Ok(self.agents())
    }
}
