//! In-memory model of a WireGuard configuration document.
//!
//! A document is a preamble of free text followed by sections, each opened
//! by a structural marker (`[Interface]` or `[Peer]`) and running up to the
//! next marker or end of text. Every section keeps the exact lines it was
//! parsed from, so untouched sections serialize byte-for-byte identically.
//! The typed views ([`InterfaceRecord`], [`PeerRecord`]) are derived from
//! those lines when the section is built.
//!
//! ```text
//! [Interface]            <- InterfaceRecord
//! Address = 10.0.0.1/24
//! ListenPort = 51820
//! PrivateKey = ...
//!
//! [Peer]                 <- PeerRecord "alice"
//! # alice
//! PublicKey = ...
//! AllowedIPs = 10.0.0.2/32
//! ```

pub mod codec;
mod normalize;

pub use codec::{Parsed, parse, serialize};
pub use normalize::{NormalizeReport, normalize};

use std::net::Ipv4Addr;

use crate::allocator::Subnet;

/// Section marker text for the server identity.
pub const INTERFACE_MARKER: &str = "[Interface]";
/// Section marker text for a peer.
pub const PEER_MARKER: &str = "[Peer]";

/// Kind of a structural section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// `[Interface]`
    Interface,
    /// `[Peer]`
    Peer,
}

impl SectionKind {
    /// Marker line for this kind.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Interface => INTERFACE_MARKER,
            Self::Peer => PEER_MARKER,
        }
    }
}

/// One `Key = Value` line inside a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Key as written (case preserved).
    pub key: String,
    /// Value with surrounding whitespace and trailing comment removed.
    pub value: String,
}

impl Directive {
    /// Create a directive.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Check the key, ignoring ASCII case like wg-quick does.
    pub fn is(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }

    /// Render as a config line.
    pub fn to_line(&self) -> String {
        format!("{} = {}", self.key, self.value)
    }
}

fn first_value<'a>(directives: &'a [Directive], key: &str) -> Option<&'a str> {
    directives
        .iter()
        .find(|d| d.is(key))
        .map(|d| d.value.as_str())
}

/// The server's own identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    lines: Vec<String>,
    directives: Vec<Directive>,
}

/// Values for a freshly created [`InterfaceRecord`].
#[derive(Debug, Clone)]
pub struct InterfaceSpec {
    /// Server address with prefix, e.g. `10.0.0.1/24`.
    pub address: String,
    /// UDP listen port.
    pub listen_port: u16,
    /// Base64 private key.
    pub private_key: String,
    /// Commands run after the interface comes up.
    pub post_up: Option<String>,
    /// Commands run after the interface goes down.
    pub post_down: Option<String>,
}

impl InterfaceRecord {
    pub(crate) fn from_parts(lines: Vec<String>, directives: Vec<Directive>) -> Self {
        Self { lines, directives }
    }

    /// Build the initial interface section.
    pub fn new(spec: &InterfaceSpec) -> Self {
        let mut directives = vec![
            Directive::new("Address", &spec.address),
            Directive::new("SaveConfig", "false"),
        ];
        if let Some(ref cmd) = spec.post_up {
            directives.push(Directive::new("PostUp", cmd));
        }
        if let Some(ref cmd) = spec.post_down {
            directives.push(Directive::new("PostDown", cmd));
        }
        directives.push(Directive::new("ListenPort", spec.listen_port.to_string()));
        directives.push(Directive::new("PrivateKey", &spec.private_key));

        let mut lines = vec![INTERFACE_MARKER.to_string()];
        lines.extend(directives.iter().map(Directive::to_line));
        Self { lines, directives }
    }

    /// Raw lines, marker first.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All directives in order.
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// First value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        first_value(&self.directives, key)
    }

    /// `Address` value, e.g. `10.0.0.1/24`.
    pub fn address(&self) -> Option<&str> {
        self.get("Address")
    }

    /// `ListenPort` value, if present and numeric.
    pub fn listen_port(&self) -> Option<u16> {
        self.get("ListenPort").and_then(|p| p.parse().ok())
    }

    /// `PrivateKey` value.
    pub fn private_key(&self) -> Option<&str> {
        self.get("PrivateKey")
    }

    /// Lifecycle hooks (`PreUp`, `PostUp`, `PreDown`, `PostDown`) in order.
    pub fn hooks(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(|d| {
            ["PreUp", "PostUp", "PreDown", "PostDown"]
                .iter()
                .any(|k| d.is(k))
        })
    }
}

/// One overlay member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    lines: Vec<String>,
    name: Option<String>,
    directives: Vec<Directive>,
}

impl PeerRecord {
    pub(crate) fn from_parts(
        lines: Vec<String>,
        name: Option<String>,
        directives: Vec<Directive>,
    ) -> Self {
        Self {
            lines,
            name,
            directives,
        }
    }

    /// Build a peer section with a name comment and a single host address.
    pub fn new(name: &str, public_key: &str, address: Ipv4Addr) -> Self {
        let directives = vec![
            Directive::new("PublicKey", public_key),
            Directive::new("AllowedIPs", format!("{}/32", address)),
        ];
        let mut lines = vec![PEER_MARKER.to_string(), format!("# {}", name)];
        lines.extend(directives.iter().map(Directive::to_line));
        Self {
            lines,
            name: Some(name.to_string()),
            directives,
        }
    }

    /// Raw lines, marker first.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Name from the comment right after the marker.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// All directives in order.
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// First value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        first_value(&self.directives, key)
    }

    /// `PublicKey` value.
    pub fn public_key(&self) -> Option<&str> {
        self.get("PublicKey")
    }

    /// Every `AllowedIPs` entry, across repeated lines.
    pub fn allowed_ips(&self) -> Vec<&str> {
        self.directives
            .iter()
            .filter(|d| d.is("AllowedIPs"))
            .flat_map(|d| d.value.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// `PresharedKey` value.
    pub fn preshared_key(&self) -> Option<&str> {
        self.get("PresharedKey")
    }

    /// `Endpoint` value.
    pub fn endpoint(&self) -> Option<&str> {
        self.get("Endpoint")
    }

    /// `PersistentKeepalive` in seconds. `off`, 0 and unparsable values
    /// read as disabled.
    pub fn persistent_keepalive(&self) -> Option<u16> {
        self.get("PersistentKeepalive")
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|secs| *secs > 0)
    }

    /// Directives other than `PublicKey` and `AllowedIPs`.
    pub fn extra_directives(&self) -> impl Iterator<Item = &Directive> {
        self.directives
            .iter()
            .filter(|d| !d.is("PublicKey") && !d.is("AllowedIPs"))
    }

    /// First IPv4 host address of this peer inside `subnet`.
    pub fn address_in(&self, subnet: &Subnet) -> Option<Ipv4Addr> {
        self.allowed_ips()
            .into_iter()
            .filter_map(|entry| subnet.host_of(entry))
            .next()
    }
}

/// A structural section of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// The server identity.
    Interface(InterfaceRecord),
    /// A peer.
    Peer(PeerRecord),
}

impl Section {
    /// Raw lines, marker first.
    pub fn lines(&self) -> &[String] {
        match self {
            Self::Interface(i) => i.lines(),
            Self::Peer(p) => p.lines(),
        }
    }

    /// Section kind.
    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Interface(_) => SectionKind::Interface,
            Self::Peer(_) => SectionKind::Peer,
        }
    }

    fn lines_mut(&mut self) -> &mut Vec<String> {
        match self {
            Self::Interface(i) => &mut i.lines,
            Self::Peer(p) => &mut p.lines,
        }
    }
}

/// A parsed configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

impl ConfigDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document holding only a server identity.
    pub fn with_interface(interface: InterfaceRecord) -> Self {
        Self {
            preamble: Vec::new(),
            sections: vec![Section::Interface(interface)],
        }
    }

    pub(crate) fn from_parts(preamble: Vec<String>, sections: Vec<Section>) -> Self {
        Self { preamble, sections }
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<Section>) {
        (self.preamble, self.sections)
    }

    /// Lines before the first marker.
    pub fn preamble(&self) -> &[String] {
        &self.preamble
    }

    /// All sections in document order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The server identity, if present.
    pub fn interface(&self) -> Option<&InterfaceRecord> {
        self.sections.iter().find_map(|s| match s {
            Section::Interface(i) => Some(i),
            Section::Peer(_) => None,
        })
    }

    /// Peers in document order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.sections.iter().filter_map(|s| match s {
            Section::Peer(p) => Some(p),
            Section::Interface(_) => None,
        })
    }

    /// Number of peers.
    pub fn peer_count(&self) -> usize {
        self.peers().count()
    }

    /// Look up a peer by name.
    pub fn peer(&self, name: &str) -> Option<&PeerRecord> {
        self.peers().find(|p| p.name() == Some(name))
    }

    /// Look up a peer by public key.
    pub fn peer_by_key(&self, public_key: &str) -> Option<&PeerRecord> {
        self.peers().find(|p| p.public_key() == Some(public_key))
    }

    /// Names of named peers in document order.
    pub fn peer_names(&self) -> Vec<&str> {
        self.peers().filter_map(PeerRecord::name).collect()
    }

    /// Total line count.
    pub fn line_count(&self) -> usize {
        self.preamble.len() + self.sections.iter().map(|s| s.lines().len()).sum::<usize>()
    }

    /// Append a peer after every existing section.
    ///
    /// A blank separator line is added to the end of the previous section
    /// when it does not already end with one.
    pub(crate) fn push_peer(&mut self, peer: PeerRecord) {
        let tail = match self.sections.last_mut() {
            Some(section) => Some(section.lines_mut()),
            None if !self.preamble.is_empty() => Some(&mut self.preamble),
            None => None,
        };
        if let Some(lines) = tail
            && lines.last().is_some_and(|l| !l.trim().is_empty())
        {
            lines.push(String::new());
        }
        self.sections.push(Section::Peer(peer));
    }

    /// Put a server identity in front of every other section.
    ///
    /// Only valid on a document without one.
    pub(crate) fn insert_interface(&mut self, mut interface: InterfaceRecord) {
        if !self.sections.is_empty()
            && interface.lines.last().is_some_and(|l| !l.trim().is_empty())
        {
            interface.lines.push(String::new());
        }
        self.sections.insert(0, Section::Interface(interface));
    }

    /// Remove the section holding the named peer, returning it.
    pub(crate) fn take_peer(&mut self, name: &str) -> Option<PeerRecord> {
        let index = self
            .sections
            .iter()
            .position(|s| matches!(s, Section::Peer(p) if p.name() == Some(name)))?;
        match self.sections.remove(index) {
            Section::Peer(peer) => Some(peer),
            Section::Interface(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> InterfaceSpec {
        InterfaceSpec {
            address: "10.0.0.1/24".into(),
            listen_port: 51820,
            private_key: "cHJpdmF0ZQ==".into(),
            post_up: Some("echo up".into()),
            post_down: None,
        }
    }

    #[test]
    fn test_interface_record_new() {
        let iface = InterfaceRecord::new(&spec());
        assert_eq!(iface.lines()[0], "[Interface]");
        assert_eq!(iface.address(), Some("10.0.0.1/24"));
        assert_eq!(iface.listen_port(), Some(51820));
        assert_eq!(iface.private_key(), Some("cHJpdmF0ZQ=="));
        assert_eq!(iface.hooks().count(), 1);
        assert_eq!(iface.get("saveconfig"), Some("false"));
    }

    #[test]
    fn test_peer_record_new() {
        let peer = PeerRecord::new("alice", "a2V5", Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            peer.lines(),
            &["[Peer]", "# alice", "PublicKey = a2V5", "AllowedIPs = 10.0.0.2/32"]
        );
        assert_eq!(peer.name(), Some("alice"));
        assert_eq!(peer.allowed_ips(), vec!["10.0.0.2/32"]);
        assert_eq!(peer.extra_directives().count(), 0);
    }

    #[test]
    fn test_peer_keepalive_values() {
        let doc = parse(
            "[Peer]\nPublicKey = YQ==\nPersistentKeepalive = off\n\
             [Peer]\nPublicKey = Yg==\nPersistentKeepalive = 0\n\
             [Peer]\nPublicKey = Yw==\npersistentkeepalive = 25\n",
        )
        .document;
        let values: Vec<_> = doc.peers().map(PeerRecord::persistent_keepalive).collect();
        assert_eq!(values, vec![None, None, Some(25)]);
    }

    #[test]
    fn test_push_peer_adds_separator_once() {
        let mut doc = ConfigDocument::with_interface(InterfaceRecord::new(&spec()));
        let before = doc.interface().unwrap().lines().len();

        doc.push_peer(PeerRecord::new("a", "k1", Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(doc.interface().unwrap().lines().len(), before + 1);
        assert_eq!(doc.interface().unwrap().lines().last().unwrap(), "");

        doc.push_peer(PeerRecord::new("b", "k2", Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(doc.peer_names(), vec!["a", "b"]);
        assert_eq!(doc.peer("a").unwrap().lines().last().unwrap(), "");
    }

    #[test]
    fn test_insert_interface_before_peers() {
        let mut doc = ConfigDocument::new();
        doc.push_peer(PeerRecord::new("a", "k1", Ipv4Addr::new(10, 0, 0, 2)));
        doc.insert_interface(InterfaceRecord::new(&spec()));

        assert_eq!(doc.sections()[0].kind(), SectionKind::Interface);
        assert_eq!(doc.interface().unwrap().lines().last().unwrap(), "");
        assert_eq!(doc.peer_names(), vec!["a"]);
    }

    #[test]
    fn test_take_peer() {
        let mut doc = ConfigDocument::new();
        doc.push_peer(PeerRecord::new("a", "k1", Ipv4Addr::new(10, 0, 0, 2)));
        doc.push_peer(PeerRecord::new("b", "k2", Ipv4Addr::new(10, 0, 0, 3)));

        let taken = doc.take_peer("a").unwrap();
        assert_eq!(taken.public_key(), Some("k1"));
        assert!(doc.take_peer("a").is_none());
        assert_eq!(doc.peer_names(), vec!["b"]);
        assert_eq!(doc.peer_by_key("k2").unwrap().name(), Some("b"));
    }
}
