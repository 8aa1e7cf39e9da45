//! Address allocation from the overlay subnet.
//!
//! Nothing is persisted: the claimed set is rebuilt from the document on
//! every request, so there is no table that can drift from the file.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::document::ConfigDocument;
use crate::error::{Error, Result};

/// An IPv4 subnet in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Create a subnet. Host bits of `addr` are cleared.
    ///
    /// Prefixes longer than /30 leave no room for a server and a peer.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 30 {
            return Err(Error::InvalidSubnet(format!(
                "prefix /{} leaves no peer addresses",
                prefix
            )));
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix));
        Ok(Self { network, prefix })
    }

    /// Network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// The interface's own address: the first host.
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + 1)
    }

    /// First address handed to peers: the second host.
    pub fn first_peer_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + 2)
    }

    /// Last usable host (one below broadcast).
    pub fn last_host(&self) -> Ipv4Addr {
        Ipv4Addr::from((u32::from(self.network) | !mask(self.prefix)) - 1)
    }

    /// Check if an address lies inside the subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix) == u32::from(self.network)
    }

    /// Interface address line value, e.g. `10.0.0.1/24`.
    pub fn server_cidr(&self) -> String {
        format!("{}/{}", self.server_address(), self.prefix)
    }

    /// Host address of an `AllowedIPs`-style entry, if it names a single
    /// host (`/32` or no prefix) inside this subnet.
    pub fn host_of(&self, entry: &str) -> Option<Ipv4Addr> {
        let (addr, prefix) = parse_entry(entry)?;
        (prefix == 32 && self.contains(addr)).then_some(addr)
    }

    /// Hosts of this subnet covered by an entry. Entries wider than the
    /// subnet (such as `0.0.0.0/0`) are routes, not claims, and cover nothing.
    fn claimed_by(&self, entry: &str) -> Option<(u32, u32)> {
        let (addr, prefix) = parse_entry(entry)?;
        if prefix < self.prefix || !self.contains(addr) {
            return None;
        }
        let start = u32::from(addr) & mask(prefix);
        let end = start | !mask(prefix);
        Some((start, end))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidSubnet(format!("{} is not in CIDR notation", s)))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| Error::InvalidSubnet(format!("invalid IPv4 address '{}'", addr)))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| Error::InvalidSubnet(format!("invalid prefix length '{}'", prefix)))?;
        Self::new(addr, prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn parse_entry(entry: &str) -> Option<(Ipv4Addr, u8)> {
    let entry = entry.trim();
    let (addr, prefix) = match entry.split_once('/') {
        Some((addr, prefix)) => (addr, prefix.trim().parse().ok()?),
        None => (entry, 32),
    };
    let addr: Ipv4Addr = addr.trim().parse().ok()?;
    (prefix <= 32).then_some((addr, prefix))
}

/// Addresses of the subnet currently claimed by the document.
///
/// Includes every host covered by a peer's `AllowedIPs` and the interface's
/// own address.
pub fn claimed(doc: &ConfigDocument, subnet: &Subnet) -> BTreeSet<Ipv4Addr> {
    let mut ranges: Vec<(u32, u32)> = doc
        .peers()
        .flat_map(|p| p.allowed_ips())
        .filter_map(|entry| subnet.claimed_by(entry))
        .collect();
    if let Some(addr) = doc.interface().and_then(|i| i.address()) {
        for entry in addr.split(',') {
            if let Some((ip, _)) = parse_entry(entry)
                && subnet.contains(ip)
            {
                ranges.push((u32::from(ip), u32::from(ip)));
            }
        }
    }

    let mut set = BTreeSet::new();
    for (start, end) in ranges {
        for host in start..=end {
            set.insert(Ipv4Addr::from(host));
        }
    }
    set
}

/// Lowest unclaimed peer address in the subnet.
///
/// Scans from the subnet's second host up to the last usable host.
pub fn next_free(doc: &ConfigDocument, subnet: &Subnet) -> Result<Ipv4Addr> {
    let taken = claimed(doc, subnet);
    let first = u32::from(subnet.first_peer_address());
    let last = u32::from(subnet.last_host());

    (first..=last)
        .map(Ipv4Addr::from)
        .find(|candidate| !taken.contains(candidate))
        .ok_or_else(|| Error::exhausted(subnet.network(), subnet.prefix()))
}
