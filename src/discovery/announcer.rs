//! Advertise a local agent over mDNS.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::time::Duration;
use tracing::{debug, info};

use super::mdns::A2A_SERVICE_TYPE;
use crate::{Error, Result};

/// TXT record protocol version.
const TXT_VERSION: &str = "1";

const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// Registers `<name>._a2a._tcp.local.` until stopped.
pub struct MdnsAnnouncer {
    name: String,
    port: u16,
    identity_url: String,
    address: String,
    registered: Option<(ServiceDaemon, String)>,
}

impl MdnsAnnouncer {
    pub fn new(name: impl Into<String>, port: u16, identity_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            identity_url: identity_url.into(),
            address: "127.0.0.1".to_string(),
            registered: None,
        }
    }

    /// Advertise a different address than loopback.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn is_registered(&self) -> bool {
        self.registered.is_some()
    }

    /// TXT records published with the service.
    pub fn txt_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("url", self.identity_url.clone()),
            ("name", self.name.clone()),
            ("v", TXT_VERSION.to_string()),
        ]
    }

    /// Host name used in the SRV record, derived from the agent name.
    pub fn host_name(&self) -> String {
        let label: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let label = label.trim_matches('-');
        let label = if label.is_empty() { "agent" } else { label };
        format!("{}.local.", label.to_ascii_lowercase())
    }

    /// Register the service. Calling `start` while registered is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.registered.is_some() {
            return Ok(());
        }

        let discovery_error = |e: mdns_sd::Error| Error::Discovery(e.to_string());

        let properties = self.txt_properties();
        let properties: Vec<(&str, &str)> = properties
            .iter()
            .map(|(key, value)| (*key, value.as_str()))
            .collect();

        let info = ServiceInfo::new(
            A2A_SERVICE_TYPE,
            &self.name,
            &self.host_name(),
            self.address.as_str(),
            self.port,
            &properties[..],
        )
        .map_err(discovery_error)?;
        let fullname = info.get_fullname().to_string();

        let daemon = ServiceDaemon::new().map_err(discovery_error)?;
        daemon.register(info).map_err(discovery_error)?;
        info!(service = %fullname, port = self.port, "mdns service registered");

        self.registered = Some((daemon, fullname));
        Ok(())
    }

    /// Unregister the service and shut the responder down.
    pub fn stop(&mut self) {
        let Some((daemon, fullname)) = self.registered.take() else {
            return;
        };

        match daemon.unregister(&fullname) {
            Ok(status) => {
                if status.recv_timeout(UNREGISTER_TIMEOUT).is_err() {
                    debug!(service = %fullname, "no unregister confirmation");
                }
            }
            Err(e) => debug!(service = %fullname, error = %e, "mdns unregister failed"),
        }
        if let Err(e) = daemon.shutdown() {
            debug!(error = %e, "mdns daemon shutdown");
        }
        info!(service = %fullname, "mdns service unregistered");
    }
}

impl Drop for MdnsAnnouncer {
    fn drop(&mut self) {
        self.stop();
    }
}
