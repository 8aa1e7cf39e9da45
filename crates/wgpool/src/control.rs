//! Live interface control.
//!
//! [`InterfaceControl`] is the set of primitives the sync engine needs from
//! the host: activate from a document, deactivate, query state, read the
//! runtime peer table and push single-peer updates. [`WgQuick`] implements
//! it with `wg-quick` and `wg`.

use std::path::Path;

use tracing::debug;

use crate::command::CommandRunner;
use crate::document::PeerRecord;
use crate::error::{Error, Result};

/// Lifecycle state of the managed interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    /// Not present on the host.
    #[default]
    Down,
    /// Activation in progress.
    Starting,
    /// Present and configured.
    Up,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Down => write!(f, "down"),
            Self::Starting => write!(f, "starting"),
            Self::Up => write!(f, "up"),
        }
    }
}

/// A peer as the running interface sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePeer {
    /// Base64 public key.
    pub public_key: String,
    /// Allowed IPs in CIDR form, sorted.
    pub allowed_ips: Vec<String>,
    /// Base64 preshared key.
    pub preshared_key: Option<String>,
    /// `host:port` the interface sends to.
    pub endpoint: Option<String>,
    /// Keepalive interval in seconds; `None` when off.
    pub persistent_keepalive: Option<u16>,
}

impl RuntimePeer {
    /// Create a runtime peer; allowed IPs are normalized to CIDR and sorted.
    pub fn new<'a>(
        public_key: impl Into<String>,
        allowed_ips: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut allowed_ips: Vec<String> = allowed_ips.into_iter().map(to_cidr).collect();
        allowed_ips.sort();
        allowed_ips.dedup();
        Self {
            public_key: public_key.into(),
            allowed_ips,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive: None,
        }
    }

    /// The runtime state a document peer should have. `None` without a
    /// public key.
    pub fn from_record(record: &PeerRecord) -> Option<Self> {
        let mut peer = Self::new(record.public_key()?, record.allowed_ips());
        peer.preshared_key = record.preshared_key().map(str::to_string);
        peer.endpoint = record.endpoint().map(str::to_string);
        peer.persistent_keepalive = record.persistent_keepalive();
        Some(peer)
    }

    /// Set the preshared key.
    pub fn preshared_key(mut self, key: impl Into<String>) -> Self {
        self.preshared_key = Some(key.into());
        self
    }

    /// Set the endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the keepalive interval; 0 turns it off.
    pub fn persistent_keepalive(mut self, secs: u16) -> Self {
        self.persistent_keepalive = (secs > 0).then_some(secs);
        self
    }
}

/// Add a host prefix to bare addresses.
fn to_cidr(entry: &str) -> String {
    let entry = entry.trim();
    if entry.contains('/') {
        entry.to_string()
    } else if entry.contains(':') {
        format!("{}/128", entry)
    } else {
        format!("{}/32", entry)
    }
}

/// Host primitives for driving a WireGuard interface.
#[allow(async_fn_in_trait)]
pub trait InterfaceControl {
    /// Check whether the interface currently exists.
    async fn is_up(&self, interface: &str) -> Result<bool>;

    /// Bring the interface up from a document on disk.
    async fn activate(&self, document: &Path) -> Result<()>;

    /// Tear the interface down, running the document's down hooks.
    async fn deactivate(&self, document: &Path) -> Result<()>;

    /// Read the runtime peer table.
    async fn runtime_peers(&self, interface: &str) -> Result<Vec<RuntimePeer>>;

    /// Whether single-peer updates are available.
    fn supports_incremental(&self) -> bool;

    /// Add a peer or replace its settings without touching other peers.
    async fn set_peer(&self, interface: &str, peer: &RuntimePeer) -> Result<()>;

    /// Remove a peer without touching other peers.
    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<()>;

    /// Check that a document would be accepted, without touching any
    /// interface.
    async fn preflight(&self, document: &Path) -> Result<()>;
}

/// Interface control through `wg-quick` and `wg`.
#[derive(Debug, Clone, Copy)]
pub struct WgQuick {
    runner: CommandRunner,
}

impl WgQuick {
    /// Create a controller using the given runner.
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::MalformedDocument(format!("path is not valid UTF-8: {}", path.display()))
    })
}

impl InterfaceControl for WgQuick {
    async fn is_up(&self, interface: &str) -> Result<bool> {
        let out = self.runner.run_checked("wg", &["show", "interfaces"], None).await?;
        Ok(out.split_whitespace().any(|name| name == interface))
    }

    async fn activate(&self, document: &Path) -> Result<()> {
        self.runner
            .run_checked("wg-quick", &["up", path_arg(document)?], None)
            .await
            .map(drop)
    }

    async fn deactivate(&self, document: &Path) -> Result<()> {
        self.runner
            .run_checked("wg-quick", &["down", path_arg(document)?], None)
            .await
            .map(drop)
    }

    async fn runtime_peers(&self, interface: &str) -> Result<Vec<RuntimePeer>> {
        let out = self
            .runner
            .run_checked("wg", &["show", interface, "dump"], None)
            .await?;
        Ok(parse_dump(&out))
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn set_peer(&self, interface: &str, peer: &RuntimePeer) -> Result<()> {
        debug!(
            interface,
            peer = %peer.public_key,
            allowed = %peer.allowed_ips.join(","),
            "setting peer"
        );
        let (args, stdin) = set_peer_args(interface, peer);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner
            .run_checked("wg", &args, stdin.as_deref())
            .await
            .map(drop)
    }

    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<()> {
        debug!(interface, peer = %public_key, "removing peer");
        self.runner
            .run_checked("wg", &["set", interface, "peer", public_key, "remove"], None)
            .await
            .map(drop)
    }

    async fn preflight(&self, document: &Path) -> Result<()> {
        self.runner
            .run_checked("wg-quick", &["strip", path_arg(document)?], None)
            .await
            .map(drop)
    }
}

/// Arguments for `wg` that make the interface's view of `peer` match it
/// exactly, plus the text to feed on stdin.
///
/// Every setting is spelled out so a value removed from the document is
/// cleared on the interface too. The preshared key goes through stdin to
/// keep it out of the process table. An endpoint is only ever set: the
/// interface learns endpoints from traffic and `wg` cannot unset one.
pub fn set_peer_args(interface: &str, peer: &RuntimePeer) -> (Vec<String>, Option<String>) {
    let mut args: Vec<String> = vec![
        "set".into(),
        interface.into(),
        "peer".into(),
        peer.public_key.clone(),
        "allowed-ips".into(),
        peer.allowed_ips.join(","),
        "persistent-keepalive".into(),
        peer.persistent_keepalive.map_or_else(|| "off".into(), |secs| secs.to_string()),
    ];
    if let Some(ref endpoint) = peer.endpoint {
        args.push("endpoint".into());
        args.push(endpoint.clone());
    }
    args.push("preshared-key".into());
    let stdin = match peer.preshared_key {
        Some(ref key) => {
            args.push("/dev/stdin".into());
            Some(format!("{}\n", key))
        }
        None => {
            args.push("/dev/null".into());
            None
        }
    };
    (args, stdin)
}

fn present(field: &str) -> Option<&str> {
    (field != "(none)").then_some(field)
}

/// Parse `wg show <iface> dump` output.
///
/// The first line describes the interface and is skipped. Each peer line
/// has eight tab-separated fields: public key, preshared key, endpoint,
/// comma-separated allowed IPs, latest handshake, rx bytes, tx bytes and
/// keepalive. Absent values read `(none)`, a disabled keepalive `off`.
pub fn parse_dump(out: &str) -> Vec<RuntimePeer> {
    out.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            let [key, psk, endpoint, ips, _, _, _, keepalive] = fields.as_slice() else {
                return None;
            };
            let ips = ips.split(',').filter_map(|ip| present(ip.trim()));
            let mut peer = RuntimePeer::new(*key, ips);
            peer.preshared_key = present(psk).map(str::to_string);
            peer.endpoint = present(endpoint).map(str::to_string);
            peer.persistent_keepalive = keepalive.parse::<u16>().ok().filter(|secs| *secs > 0);
            Some(peer)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dump() {
        let out = "\
cHJpdmF0ZQ==\tcHVibGlj\t51820\toff
YWxpY2U=\t(none)\t198.51.100.7:41000\t10.0.0.2/32\t1700000000\t1024\t2048\toff
Ym9i\tcHNr\t(none)\t10.0.0.4/32,10.0.0.3/32\t0\t0\t0\t25
Y2Fyb2w=\t(none)\t(none)\t(none)\t0\t0\t0\toff
";
        let peers = parse_dump(out);
        assert_eq!(peers.len(), 3);
        assert_eq!(
            peers[0],
            RuntimePeer::new("YWxpY2U=", ["10.0.0.2/32"]).endpoint("198.51.100.7:41000")
        );
        assert_eq!(peers[1].allowed_ips, vec!["10.0.0.3/32", "10.0.0.4/32"]);
        assert_eq!(peers[1].preshared_key.as_deref(), Some("cHNr"));
        assert_eq!(peers[1].persistent_keepalive, Some(25));
        assert!(peers[2].allowed_ips.is_empty());
        assert!(peers[2].endpoint.is_none());
    }

    #[test]
    fn test_set_peer_args() {
        let peer = RuntimePeer::new("Ym9i", ["10.0.0.3/32", "10.0.0.4/32"])
            .preshared_key("cHNr")
            .persistent_keepalive(25)
            .endpoint("198.51.100.7:51820");
        let (args, stdin) = set_peer_args("wg0", &peer);
        assert_eq!(
            args.join(" "),
            "set wg0 peer Ym9i allowed-ips 10.0.0.3/32,10.0.0.4/32 persistent-keepalive 25 \
             endpoint 198.51.100.7:51820 preshared-key /dev/stdin"
        );
        assert_eq!(stdin.as_deref(), Some("cHNr\n"));
        assert!(!args.iter().any(|a| a.contains("cHNr")));

        let (args, stdin) = set_peer_args("wg0", &RuntimePeer::new("Ym9i", ["10.0.0.3/32"]));
        assert_eq!(
            args.join(" "),
            "set wg0 peer Ym9i allowed-ips 10.0.0.3/32 persistent-keepalive off preshared-key /dev/null"
        );
        assert!(stdin.is_none());
    }

    #[test]
    fn test_from_record_reads_peer_settings() {
        let text = "[Peer]\nPublicKey = Ym9i\nAllowedIPs = 10.0.0.3/32\nPresharedKey = cHNr\nPersistentKeepalive = 25\nEndpoint = vpn.example.net:51820\n";
        let doc = crate::document::parse(text).document;
        let record = doc.peers().next().unwrap();
        let peer = RuntimePeer::from_record(record).unwrap();
        assert_eq!(peer.preshared_key.as_deref(), Some("cHNr"));
        assert_eq!(peer.persistent_keepalive, Some(25));
        assert_eq!(peer.endpoint.as_deref(), Some("vpn.example.net:51820"));

        let keyless = crate::document::parse("[Peer]\nAllowedIPs = 10.0.0.9/32\n").document;
        assert!(RuntimePeer::from_record(keyless.peers().next().unwrap()).is_none());
    }

    #[test]
    fn test_runtime_peer_normalizes_entries() {
        let peer = RuntimePeer::new("k", ["10.0.0.2", " fd00::2 ", "10.0.0.2/32"]);
        assert_eq!(peer.allowed_ips, vec!["10.0.0.2/32", "fd00::2/128"]);
    }

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Up.to_string(), "up");
        assert_eq!(LinkState::default(), LinkState::Down);
    }
}
