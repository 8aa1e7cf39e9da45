//! In-memory capability fakes for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::control::{InterfaceControl, RuntimePeer};
use crate::discovery::NetworkDiscovery;
use crate::document::parse;
use crate::error::{Error, Result};
use crate::keys::{KeyGenerator, KeyPair, NativeKeys, WgKey};

/// Observable state of a [`FakeControl`].
#[derive(Debug, Default)]
pub struct FakeInterface {
    pub up: bool,
    pub peers: Vec<RuntimePeer>,
    pub calls: Vec<String>,
    /// Documents passed to `preflight`.
    pub preflighted: Vec<PathBuf>,
    /// Activation fails with this diagnostic.
    pub fail_activate: Option<String>,
    /// A failed activation still leaves the link present.
    pub failed_activate_leaves_up: bool,
    /// `set_peer` fails.
    pub fail_set_peer: bool,
    /// Single-peer updates are unavailable.
    pub no_incremental: bool,
}

/// Interface control backed by shared memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeControl {
    inner: Arc<Mutex<FakeInterface>>,
}

impl FakeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeInterface> {
        self.inner.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl InterfaceControl for FakeControl {
    async fn is_up(&self, _interface: &str) -> Result<bool> {
        Ok(self.state().up)
    }

    async fn activate(&self, document: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push("activate".into());
        if let Some(diagnostic) = state.fail_activate.clone() {
            state.up = state.failed_activate_leaves_up;
            return Err(Error::CommandFailed {
                command: "wg-quick up".into(),
                detail: diagnostic,
            });
        }
        let text = std::fs::read_to_string(document)?;
        let doc = parse(&text).document;
        state.peers = doc
            .peers()
            .filter_map(RuntimePeer::from_record)
            .collect();
        state.up = true;
        Ok(())
    }

    async fn deactivate(&self, _document: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push("deactivate".into());
        state.up = false;
        state.peers.clear();
        Ok(())
    }

    async fn runtime_peers(&self, _interface: &str) -> Result<Vec<RuntimePeer>> {
        Ok(self.state().peers.clone())
    }

    fn supports_incremental(&self) -> bool {
        !self.state().no_incremental
    }

    async fn set_peer(&self, _interface: &str, peer: &RuntimePeer) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("set {}", peer.public_key));
        if state.fail_set_peer {
            return Err(Error::CommandFailed {
                command: "wg set".into(),
                detail: "Operation not permitted".into(),
            });
        }
        state.peers.retain(|p| p.public_key != peer.public_key);
        state.peers.push(peer.clone());
        Ok(())
    }

    async fn remove_peer(&self, _interface: &str, public_key: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("remove {}", public_key));
        state.peers.retain(|p| p.public_key != public_key);
        Ok(())
    }

    async fn preflight(&self, document: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push("preflight".into());
        state.preflighted.push(document.to_path_buf());
        std::fs::metadata(document)?;
        Ok(())
    }
}

/// In-process keys that count generations and can be switched off.
#[derive(Debug, Clone, Default)]
pub struct FakeKeys {
    generated: Arc<AtomicUsize>,
    unavailable: bool,
}

impl FakeKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

impl KeyGenerator for FakeKeys {
    async fn generate_keypair(&self) -> Result<KeyPair> {
        if self.unavailable {
            return Err(Error::KeygenUnavailable("wg not found in PATH".into()));
        }
        self.generated.fetch_add(1, Ordering::SeqCst);
        NativeKeys.generate_keypair().await
    }

    async fn derive_public_key(&self, private: &WgKey) -> Result<WgKey> {
        if self.unavailable {
            return Err(Error::KeygenUnavailable("wg not found in PATH".into()));
        }
        Ok(NativeKeys::public_key(private))
    }
}

/// Fixed lookup answers.
#[derive(Debug, Clone)]
pub struct FakeDiscovery {
    pub endpoint: String,
    pub outbound: String,
}

impl Default for FakeDiscovery {
    fn default() -> Self {
        Self {
            endpoint: "203.0.113.10".into(),
            outbound: "ens3".into(),
        }
    }
}

impl NetworkDiscovery for FakeDiscovery {
    async fn discover_public_endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn detect_outbound_path(&self) -> String {
        self.outbound.clone()
    }
}
