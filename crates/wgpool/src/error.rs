//! Error types for peer store and interface operations.

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Result type for wgpool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while mutating the peer store or driving the
/// interface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from file or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Settings file could not be decoded.
    #[error("settings error: {0}")]
    Settings(#[from] serde_yaml::Error),

    /// A peer with this name already exists.
    #[error("peer name already in use: {name}")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// A peer with this public key already exists.
    #[error("public key already in use by peer {owner}")]
    DuplicatePublicKey {
        /// Name of the peer that already holds the key.
        owner: String,
    },

    /// No peer with this name exists.
    #[error("peer not found: {name}")]
    PeerNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// Every host address in the subnet is claimed.
    #[error("no free address left in {subnet}")]
    AddressSpaceExhausted {
        /// The subnet that was scanned.
        subnet: String,
    },

    /// The document is structurally unusable.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The document has no `[Interface]` section.
    #[error("no server identity in {path}; run init first")]
    MissingIdentity {
        /// Path of the document that was read.
        path: String,
    },

    /// Peer name cannot be stored in the document.
    #[error("invalid peer name {name:?}: {reason}")]
    InvalidPeerName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A key is not 32 bytes of base64.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Subnet text is not a usable IPv4 CIDR.
    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),

    /// Key generation tool is missing or unusable.
    #[error("key generation unavailable: {0}")]
    KeygenUnavailable(String),

    /// Interface activation failed; the interface was left down.
    #[error("failed to start {interface}: {diagnostic}")]
    StartupFailed {
        /// Interface name.
        interface: String,
        /// Diagnostic output from the activation attempt.
        diagnostic: String,
    },

    /// The interface lock is held by another process.
    #[error("interface {interface} is busy (lock held at {lock_path})")]
    Busy {
        /// Interface name.
        interface: String,
        /// Lock file path.
        lock_path: String,
    },

    /// A best-effort network query failed. Never surfaced past the lookup.
    #[error("network query failed: {0}")]
    NetworkQueryFailed(String),

    /// An external command exited unsuccessfully.
    #[error("{command} failed: {detail}")]
    CommandFailed {
        /// Command line that was run.
        command: String,
        /// Trimmed stderr, or exit status when stderr was empty.
        detail: String,
    },

    /// An external command exceeded its time budget and was killed.
    #[error("{command} timed out after {timeout:?}")]
    CommandTimeout {
        /// Command line that was run.
        command: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The document was persisted but the live interface was not updated.
    #[error("document saved but {interface} not reconciled: {source}")]
    ReconcilePending {
        /// Interface name.
        interface: String,
        /// Why reconciliation failed.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an address exhaustion error for a subnet.
    pub fn exhausted(network: Ipv4Addr, prefix: u8) -> Self {
        Self::AddressSpaceExhausted {
            subnet: format!("{}/{}", network, prefix),
        }
    }

    /// Wrap a reconciliation failure that happened after persisting.
    pub fn reconcile_pending(interface: impl Into<String>, source: Error) -> Self {
        Self::ReconcilePending {
            interface: interface.into(),
            source: Box::new(source),
        }
    }

    /// Check if this is lock contention. Callers may retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::PeerNotFound { .. } | Self::MissingIdentity { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this is a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. } | Self::DuplicatePublicKey { .. }
        )
    }

    /// Check if the document was persisted despite the error.
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::ReconcilePending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::PeerNotFound {
            name: "bob".into(),
        };
        assert_eq!(err.to_string(), "peer not found: bob");

        let err = Error::exhausted(Ipv4Addr::new(10, 0, 0, 0), 24);
        assert_eq!(err.to_string(), "no free address left in 10.0.0.0/24");

        let err = Error::DuplicatePublicKey {
            owner: "alice".into(),
        };
        assert_eq!(err.to_string(), "public key already in use by peer alice");
    }

    #[test]
    fn test_predicates() {
        assert!(
            Error::Busy {
                interface: "wg0".into(),
                lock_path: "/tmp/.wg0.lock".into()
            }
            .is_busy()
        );
        assert!(Error::DuplicateName { name: "a".into() }.is_conflict());
        assert!(Error::PeerNotFound { name: "a".into() }.is_not_found());
        assert!(Error::from(io::Error::from(io::ErrorKind::NotFound)).is_not_found());
        assert!(!Error::MalformedDocument("x".into()).is_not_found());
    }

    #[test]
    fn test_reconcile_pending_keeps_cause() {
        let cause = Error::StartupFailed {
            interface: "wg0".into(),
            diagnostic: "RTNETLINK answers: Operation not permitted".into(),
        };
        let err = Error::reconcile_pending("wg0", cause);
        assert!(err.is_persisted());
        let msg = err.to_string();
        assert!(msg.contains("document saved"));
        assert!(msg.contains("Operation not permitted"));
    }
}
