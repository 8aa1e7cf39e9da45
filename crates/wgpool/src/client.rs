//! Client-side configuration exports.

use std::fmt::Write;
use std::net::Ipv4Addr;

use crate::document::{INTERFACE_MARKER, PEER_MARKER};
use crate::keys::WgKey;
use crate::settings::Settings;

/// Everything a peer needs to connect to the server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The peer's private key.
    pub private_key: WgKey,
    /// Address assigned to the peer.
    pub address: Ipv4Addr,
    /// DNS server.
    pub dns: String,
    /// The server's public key.
    pub server_public_key: WgKey,
    /// Server host (address or placeholder).
    pub endpoint_host: String,
    /// Server UDP port.
    pub endpoint_port: u16,
    /// Traffic routed through the tunnel.
    pub allowed_ips: String,
    /// Keepalive interval in seconds; zero omits the line.
    pub persistent_keepalive: u16,
}

impl ClientConfig {
    /// Fill client defaults from settings.
    pub fn new(
        settings: &Settings,
        private_key: WgKey,
        address: Ipv4Addr,
        server_public_key: WgKey,
        endpoint_host: impl Into<String>,
    ) -> Self {
        Self {
            private_key,
            address,
            dns: settings.dns.clone(),
            server_public_key,
            endpoint_host: endpoint_host.into(),
            endpoint_port: settings.listen_port,
            allowed_ips: settings.client_allowed_ips.clone(),
            persistent_keepalive: settings.persistent_keepalive,
        }
    }

    /// `host:port`, bracketing IPv6 hosts.
    pub fn endpoint(&self) -> String {
        if self.endpoint_host.contains(':') {
            format!("[{}]:{}", self.endpoint_host, self.endpoint_port)
        } else {
            format!("{}:{}", self.endpoint_host, self.endpoint_port)
        }
    }

    /// Render in wg-quick format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", INTERFACE_MARKER);
        let _ = writeln!(out, "PrivateKey = {}", self.private_key);
        let _ = writeln!(out, "Address = {}/32", self.address);
        if !self.dns.is_empty() {
            let _ = writeln!(out, "DNS = {}", self.dns);
        }
        out.push('\n');
        let _ = writeln!(out, "{}", PEER_MARKER);
        let _ = writeln!(out, "PublicKey = {}", self.server_public_key);
        let _ = writeln!(out, "Endpoint = {}", self.endpoint());
        let _ = writeln!(out, "AllowedIPs = {}", self.allowed_ips);
        if self.persistent_keepalive > 0 {
            let _ = writeln!(out, "PersistentKeepalive = {}", self.persistent_keepalive);
        }
        out
    }
}
