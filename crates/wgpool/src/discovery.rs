//! Best-effort network lookups.
//!
//! Both lookups are cosmetic from the store's point of view: the public
//! endpoint only appears in client exports and the outbound interface only
//! in NAT hooks. A failed or slow lookup degrades to a configured fallback
//! and is logged, never returned as an error.

use std::net::IpAddr;

use tracing::{debug, warn};

use crate::command::CommandRunner;
use crate::error::{Error, Result};
use crate::settings::Settings;

/// Address used to ask the routing table for the outbound path.
const ROUTE_QUERY_TARGET: &str = "8.8.8.8";

/// Network lookups consumed by the store.
#[allow(async_fn_in_trait)]
pub trait NetworkDiscovery {
    /// Public address clients should connect to. Never fails.
    async fn discover_public_endpoint(&self) -> String;

    /// Name of the interface carrying outbound traffic. Never fails.
    async fn detect_outbound_path(&self) -> String;
}

/// Lookups through `curl` and `ip route`.
#[derive(Debug, Clone)]
pub struct SystemDiscovery {
    local: CommandRunner,
    network: CommandRunner,
    endpoint_url: String,
    endpoint_placeholder: String,
    default_outbound: String,
}

impl SystemDiscovery {
    /// Create from settings.
    pub fn new(settings: &Settings) -> Self {
        Self {
            local: CommandRunner::new(settings.command_timeout()),
            network: CommandRunner::new(settings.network_timeout()),
            endpoint_url: settings.endpoint_url.clone(),
            endpoint_placeholder: settings.endpoint_placeholder.clone(),
            default_outbound: settings.default_outbound.clone(),
        }
    }

    async fn query_public_address(&self) -> Result<IpAddr> {
        let max_time = self.network.timeout().as_secs().max(1).to_string();
        let out = self
            .network
            .run_checked(
                "curl",
                &[
                    "-fsS",
                    "--max-time",
                    max_time.as_str(),
                    self.endpoint_url.as_str(),
                ],
                None,
            )
            .await
            .map_err(|e| Error::NetworkQueryFailed(e.to_string()))?;
        out.trim().parse().map_err(|_| {
            Error::NetworkQueryFailed(format!("{} returned {:?}", self.endpoint_url, out))
        })
    }

    async fn query_outbound_interface(&self) -> Result<String> {
        let out = self
            .local
            .run_checked("ip", &["route", "get", ROUTE_QUERY_TARGET], None)
            .await
            .map_err(|e| Error::NetworkQueryFailed(e.to_string()))?;
        route_dev(&out)
            .ok_or_else(|| Error::NetworkQueryFailed(format!("no device in route: {:?}", out)))
    }
}

impl NetworkDiscovery for SystemDiscovery {
    async fn discover_public_endpoint(&self) -> String {
        match self.query_public_address().await {
            Ok(addr) => {
                debug!(%addr, "discovered public endpoint");
                addr.to_string()
            }
            Err(e) => {
                warn!(error = %e, fallback = %self.endpoint_placeholder, "public endpoint discovery failed");
                self.endpoint_placeholder.clone()
            }
        }
    }

    async fn detect_outbound_path(&self) -> String {
        match self.query_outbound_interface().await {
            Ok(dev) => dev,
            Err(e) => {
                warn!(error = %e, fallback = %self.default_outbound, "outbound path detection failed");
                self.default_outbound.clone()
            }
        }
    }
}

/// Extract the `dev` field from `ip route get` output.
pub fn route_dev(output: &str) -> Option<String> {
    let mut parts = output.split_whitespace();
    while let Some(part) = parts.next() {
        if part == "dev" {
            return parts.next().map(str::to_string);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_dev() {
        let out = "8.8.8.8 via 192.168.1.1 dev enp3s0 src 192.168.1.20 uid 0 \n    cache \n";
        assert_eq!(route_dev(out), Some("enp3s0".to_string()));
        assert_eq!(route_dev("unreachable"), None);
        assert_eq!(route_dev("8.8.8.8 dev"), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back_to_placeholder() {
        let mut settings = Settings::default();
        settings.endpoint_url = "http://127.0.0.1:9/".to_string();
        settings.network_timeout_secs = 1;
        let discovery = SystemDiscovery::new(&settings);
        assert_eq!(discovery.discover_public_endpoint().await, "YOUR_PUBLIC_IP");
    }
}
