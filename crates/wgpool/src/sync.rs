//! Keeping the live interface in line with the document.
//!
//! [`SyncEngine`] owns the interface lifecycle (`Down -> Starting -> Up`)
//! and reconciliation. Reconciliation compares the document's peers with
//! the runtime peer table and applies the difference either peer by peer or
//! by reloading the whole interface, per [`ReconcileStrategy`].
//!
//! Every method that touches the host reads from the document on disk, so
//! callers persist before reconciling.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::allocator::Subnet;
use crate::control::{InterfaceControl, LinkState, RuntimePeer};
use crate::discovery::NetworkDiscovery;
use crate::document::{ConfigDocument, InterfaceRecord, InterfaceSpec};
use crate::error::{Error, Result};
use crate::keys::{KeyGenerator, KeyPair, WgKey};
use crate::settings::{ReconcileStrategy, Settings};
use crate::store::{Store, write_atomic};

/// Difference between document peers and runtime peers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerDiff {
    /// Peers present in the document only.
    pub to_add: Vec<RuntimePeer>,
    /// Public keys present on the interface only.
    pub to_remove: Vec<String>,
    /// Peers whose settings differ; holds the document's version.
    pub to_update: Vec<RuntimePeer>,
}

impl PeerDiff {
    /// Check if no changes are needed.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len() + self.to_update.len()
    }

    /// Get a human-readable summary of the changes.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for peer in &self.to_add {
            lines.push(format!(
                "+ peer {} ({})",
                peer.public_key,
                peer.allowed_ips.join(",")
            ));
        }
        for key in &self.to_remove {
            lines.push(format!("- peer {}", key));
        }
        for peer in &self.to_update {
            lines.push(format!(
                "~ peer {} ({})",
                peer.public_key,
                peer.allowed_ips.join(",")
            ));
        }
        if lines.is_empty() {
            "No changes".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Compute what must change on the interface to match `doc`.
///
/// Peers without a public key are skipped; they cannot exist at runtime.
/// Allowed IPs, preshared key and keepalive must match exactly. An endpoint
/// only counts when the document sets one, since the interface learns
/// endpoints of roaming clients on its own.
pub fn compute_diff(doc: &ConfigDocument, runtime: &[RuntimePeer]) -> PeerDiff {
    let current: HashMap<&str, &RuntimePeer> = runtime
        .iter()
        .map(|p| (p.public_key.as_str(), p))
        .collect();

    let mut diff = PeerDiff::default();
    let mut wanted = Vec::new();
    for record in doc.peers() {
        let Some(desired) = RuntimePeer::from_record(record) else {
            continue;
        };
        wanted.push(desired.public_key.clone());
        match current.get(desired.public_key.as_str()) {
            None => diff.to_add.push(desired),
            Some(live) if differs(&desired, live) => diff.to_update.push(desired),
            Some(_) => {}
        }
    }
    diff.to_remove = runtime
        .iter()
        .filter(|p| !wanted.contains(&p.public_key))
        .map(|p| p.public_key.clone())
        .collect();
    diff
}

fn differs(desired: &RuntimePeer, live: &RuntimePeer) -> bool {
    desired.allowed_ips != live.allowed_ips
        || desired.preshared_key != live.preshared_key
        || desired.persistent_keepalive != live.persistent_keepalive
        || desired
            .endpoint
            .as_deref()
            .is_some_and(|endpoint| !endpoint_matches(endpoint, live.endpoint.as_deref()))
}

/// A hostname endpoint is resolved when set and reads back as an address,
/// so it matches any live endpoint.
fn endpoint_matches(desired: &str, live: Option<&str>) -> bool {
    let Some(live) = live else {
        return false;
    };
    match desired.parse::<SocketAddr>() {
        Ok(addr) => live.parse::<SocketAddr>().is_ok_and(|l| l == addr),
        Err(_) => true,
    }
}

/// How a reconcile pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The interface already matched the document.
    Nothing,
    /// The interface is down; the document applies at next activation.
    InterfaceDown,
    /// Changed peers were pushed individually.
    Incremental,
    /// The interface was torn down and reactivated.
    FullReload,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => write!(f, "already in sync"),
            Self::InterfaceDown => write!(f, "interface down"),
            Self::Incremental => write!(f, "incremental update"),
            Self::FullReload => write!(f, "full reload"),
        }
    }
}

/// Result of [`SyncEngine::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    /// Number of peer changes applied.
    pub changes: usize,
    /// Why an incremental pass fell back to a full reload.
    pub fallback: Option<String>,
}

impl ReconcileReport {
    fn new(outcome: ReconcileOutcome, changes: usize) -> Self {
        Self {
            outcome,
            changes,
            fallback: None,
        }
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.outcome)?;
        if self.changes > 0 {
            write!(f, " ({} change(s))", self.changes)?;
        }
        if let Some(ref reason) = self.fallback {
            write!(f, " after fallback: {}", reason)?;
        }
        Ok(())
    }
}

/// Result of [`SyncEngine::ensure_server_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// A server identity was written.
    Created {
        public_key: WgKey,
        /// Existing key files were used instead of generating new ones.
        reused_keys: bool,
    },
    /// The document already had one.
    AlreadyPresent,
}

/// Drives one interface.
#[derive(Debug)]
pub struct SyncEngine<C> {
    settings: Settings,
    store: Store,
    control: C,
    state: LinkState,
}

impl<C: InterfaceControl> SyncEngine<C> {
    /// Create an engine. The state starts `Down` until the host is queried.
    pub fn new(settings: Settings, store: Store, control: C) -> Self {
        Self {
            settings,
            store,
            control,
            state: LinkState::Down,
        }
    }

    /// Last observed lifecycle state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// The interface control in use.
    pub fn control(&self) -> &C {
        &self.control
    }

    fn interface(&self) -> &str {
        &self.settings.interface
    }

    /// Make sure the document has a server identity.
    ///
    /// Existing key files are reused; new ones are only written when none
    /// exist. Peers already in the document are kept.
    pub async fn ensure_server_identity<K, D>(
        &mut self,
        keys: &K,
        discovery: &D,
        subnet: &Subnet,
    ) -> Result<IdentityOutcome>
    where
        K: KeyGenerator,
        D: NetworkDiscovery,
    {
        let existing = self.store.load()?;
        if let Some(ref parsed) = existing
            && parsed.document.interface().is_some()
        {
            debug!(interface = self.interface(), "server identity already present");
            return Ok(IdentityOutcome::AlreadyPresent);
        }

        let (pair, reused_keys) = match self.store.read_server_keys()? {
            Some(stored) => {
                let public = match stored.public {
                    Some(public) => public,
                    None => {
                        let public = keys.derive_public_key(&stored.private).await?;
                        self.store.write_server_public_key(&public)?;
                        public
                    }
                };
                let pair = KeyPair {
                    private: stored.private,
                    public,
                };
                (pair, true)
            }
            None => {
                let pair = keys.generate_keypair().await?;
                self.store.write_server_keys(&pair)?;
                (pair, false)
            }
        };

        let outbound = discovery.detect_outbound_path().await;
        let render = |t: &String| self.settings.render_hook(t, &outbound);
        let record = InterfaceRecord::new(&InterfaceSpec {
            address: subnet.server_cidr(),
            listen_port: self.settings.listen_port,
            private_key: pair.private.to_base64(),
            post_up: self.settings.post_up.as_ref().map(render),
            post_down: self.settings.post_down.as_ref().map(render),
        });

        let mut document = existing.map(|p| p.document).unwrap_or_default();
        document.insert_interface(record);
        self.store.save(&document)?;

        info!(
            interface = self.interface(),
            address = %subnet.server_cidr(),
            %outbound,
            reused_keys,
            "server identity created"
        );
        Ok(IdentityOutcome::Created {
            public_key: pair.public,
            reused_keys,
        })
    }

    /// Load the document, saving it back if parsing had to drop blocks.
    pub fn load_healed(&self) -> Result<ConfigDocument> {
        let parsed = self.store.load()?.ok_or_else(|| self.missing_identity())?;
        if !parsed.report.is_empty() {
            warn!(
                interface = self.interface(),
                repairs = %parsed.report,
                "rewriting repaired document"
            );
            self.store.save(&parsed.document)?;
        }
        Ok(parsed.document)
    }

    fn missing_identity(&self) -> Error {
        Error::MissingIdentity {
            path: self.store.document_path().display().to_string(),
        }
    }

    /// Check that the document can be activated.
    pub fn validate(&self, doc: &ConfigDocument) -> Result<()> {
        let iface = doc.interface().ok_or_else(|| self.missing_identity())?;
        if iface.private_key().is_none() {
            return Err(Error::MalformedDocument(
                "[Interface] has no PrivateKey".into(),
            ));
        }
        if iface.address().is_none() {
            return Err(Error::MalformedDocument("[Interface] has no Address".into()));
        }
        for (index, peer) in doc.peers().enumerate() {
            let label = peer
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index + 1));
            if peer.public_key().is_none() {
                return Err(Error::MalformedDocument(format!(
                    "peer {} has no PublicKey",
                    label
                )));
            }
            if peer.allowed_ips().is_empty() {
                return Err(Error::MalformedDocument(format!(
                    "peer {} has no AllowedIPs",
                    label
                )));
            }
        }
        Ok(())
    }

    fn startup_failed(&self, cause: Error) -> Error {
        Error::StartupFailed {
            interface: self.interface().to_string(),
            diagnostic: cause.to_string(),
        }
    }

    /// Undo a failed activation and turn its cause into `StartupFailed`.
    async fn abort_startup(&mut self, cause: Error) -> Error {
        if self.control.is_up(&self.settings.interface).await.unwrap_or(false) {
            warn!(interface = self.interface(), "activation failed with link present, tearing down");
            if let Err(e) = self.control.deactivate(self.store.document_path()).await {
                warn!(interface = self.interface(), error = %e, "teardown after failed activation failed");
            }
        }
        self.state = LinkState::Down;
        self.startup_failed(cause)
    }

    /// Run the activation dry run on a scratch copy of `doc`.
    async fn preflight(&self, doc: &ConfigDocument) -> Result<()> {
        // Private (0700) directory with an unpredictable name.
        let dir = tempfile::Builder::new()
            .prefix("wgpool-preflight-")
            .tempdir()?;
        let scratch = dir.path().join(format!("{}.conf", self.interface()));
        write_atomic(&scratch, &crate::document::serialize(doc))?;
        let result = self.control.preflight(&scratch).await;
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            debug!(path = %path.display(), error = %e, "failed to remove preflight copy");
        }
        result
    }

    /// Activate the interface from the document on disk.
    ///
    /// A no-op when the interface is already up.
    pub async fn bring_up(&mut self) -> Result<()> {
        let up = match self.control.is_up(&self.settings.interface).await {
            Ok(up) => up,
            Err(e) => return Err(self.startup_failed(e)),
        };
        if up {
            debug!(interface = self.interface(), "already up");
            self.state = LinkState::Up;
            return Ok(());
        }

        let doc = self.load_healed()?;
        self.validate(&doc)?;
        if self.settings.preflight
            && let Err(e) = self.preflight(&doc).await
        {
            self.state = LinkState::Down;
            return Err(self.startup_failed(e));
        }

        self.state = LinkState::Starting;
        info!(interface = self.interface(), peers = doc.peer_count(), "starting interface");
        if let Err(e) = self.control.activate(self.store.document_path()).await {
            return Err(self.abort_startup(e).await);
        }
        self.state = LinkState::Up;
        info!(interface = self.interface(), "interface up");
        Ok(())
    }

    /// Deactivate the interface. A no-op when it is already down.
    pub async fn bring_down(&mut self) -> Result<()> {
        if !self.control.is_up(&self.settings.interface).await? {
            debug!(interface = self.interface(), "already down");
            self.state = LinkState::Down;
            return Ok(());
        }
        self.control.deactivate(self.store.document_path()).await?;
        self.state = LinkState::Down;
        info!(interface = self.interface(), "interface down");
        Ok(())
    }

    /// Apply `doc` to the running interface. `doc` must already be on disk.
    pub async fn reconcile(&mut self, doc: &ConfigDocument) -> Result<ReconcileReport> {
        let interface = self.settings.interface.clone();
        if !self.control.is_up(&interface).await? {
            debug!(%interface, "interface down, nothing to reconcile");
            self.state = LinkState::Down;
            return Ok(ReconcileReport::new(ReconcileOutcome::InterfaceDown, 0));
        }
        self.state = LinkState::Up;

        let runtime = self.control.runtime_peers(&interface).await?;
        let diff = compute_diff(doc, &runtime);
        if diff.is_empty() {
            return Ok(ReconcileReport::new(ReconcileOutcome::Nothing, 0));
        }
        debug!(%interface, changes = diff.change_count(), "peer diff:\n{}", diff.summary());

        let fallback = match self.settings.strategy {
            ReconcileStrategy::FullReload => None,
            ReconcileStrategy::Incremental if !self.control.supports_incremental() => {
                Some("incremental updates not supported".to_string())
            }
            ReconcileStrategy::Incremental => match self.apply_incremental(&diff).await {
                Ok(()) => {
                    info!(%interface, changes = diff.change_count(), "peers updated in place");
                    return Ok(ReconcileReport::new(
                        ReconcileOutcome::Incremental,
                        diff.change_count(),
                    ));
                }
                Err(e) => Some(e.to_string()),
            },
        };
        if let Some(ref reason) = fallback {
            warn!(%interface, %reason, "falling back to full reload");
        }

        self.full_reload().await?;
        Ok(ReconcileReport {
            outcome: ReconcileOutcome::FullReload,
            changes: diff.change_count(),
            fallback,
        })
    }

    async fn apply_incremental(&self, diff: &PeerDiff) -> Result<()> {
        let interface = self.interface();
        for key in &diff.to_remove {
            self.control.remove_peer(interface, key).await?;
        }
        for peer in diff.to_add.iter().chain(&diff.to_update) {
            self.control.set_peer(interface, peer).await?;
        }
        Ok(())
    }

    async fn full_reload(&mut self) -> Result<()> {
        info!(interface = self.interface(), "reloading interface");
        if let Err(e) = self.control.deactivate(self.store.document_path()).await {
            warn!(interface = self.interface(), error = %e, "deactivate before reload failed");
        }
        self.state = LinkState::Starting;
        if let Err(e) = self.control.activate(self.store.document_path()).await {
            return Err(self.abort_startup(e).await);
        }
        self.state = LinkState::Up;
        Ok(())
    }
}
