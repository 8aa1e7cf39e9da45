//! Structured edits of a [`ConfigDocument`].
//!
//! Every operation takes the current document by reference and returns a
//! complete new one, or an error with the input untouched. Callers persist
//! the result only on success.

use std::net::Ipv4Addr;

use tracing::debug;

use crate::allocator::{Subnet, next_free};
use crate::document::{ConfigDocument, PeerRecord};
use crate::error::{Error, Result};

pub use crate::document::{NormalizeReport, normalize};

/// Check that `name` can be stored as a peer name comment and used as a
/// client export file stem.
pub fn validate_peer_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name.trim() != name {
        Some("leading or trailing whitespace")
    } else if name.contains(['\n', '\r']) {
        Some("contains a line break")
    } else if name.starts_with('#') {
        Some("starts with '#'")
    } else if name.starts_with('[') {
        Some("starts with '['")
    } else if name.contains(['/', '\\']) || name == "." || name == ".." {
        Some("not usable as a file name")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidPeerName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Result of [`add_peer`].
#[derive(Debug, Clone)]
pub struct Added {
    /// Document with the new peer appended.
    pub document: ConfigDocument,
    /// Address assigned to the peer.
    pub address: Ipv4Addr,
}

/// Result of [`remove_peer`].
#[derive(Debug, Clone)]
pub struct Removed {
    /// Document without the peer's block.
    pub document: ConfigDocument,
    /// The removed block.
    pub peer: PeerRecord,
}

/// Fail with [`Error::DuplicateName`] if `name` is taken.
pub fn check_name_free(doc: &ConfigDocument, name: &str) -> Result<()> {
    if doc.peer(name).is_some() {
        return Err(Error::DuplicateName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Append a new peer with the next free address.
pub fn add_peer(
    doc: &ConfigDocument,
    subnet: &Subnet,
    name: &str,
    public_key: &str,
) -> Result<Added> {
    validate_peer_name(name)?;
    check_name_free(doc, name)?;
    if let Some(owner) = doc.peer_by_key(public_key) {
        return Err(Error::DuplicatePublicKey {
            owner: owner.name().unwrap_or("(unnamed)").to_string(),
        });
    }
    let address = next_free(doc, subnet)?;

    let mut document = doc.clone();
    document.push_peer(PeerRecord::new(name, public_key, address));
    debug!(name, %address, "peer appended");
    Ok(Added { document, address })
}

/// Remove the named peer's whole block.
pub fn remove_peer(doc: &ConfigDocument, name: &str) -> Result<Removed> {
    let mut document = doc.clone();
    let peer = document.take_peer(name).ok_or_else(|| Error::PeerNotFound {
        name: name.to_string(),
    })?;
    debug!(name, lines = peer.lines().len(), "peer block removed");
    Ok(Removed { document, peer })
}
