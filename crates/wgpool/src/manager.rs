//! High-level operations on one managed interface.
//!
//! [`Manager`] is what the CLI drives. Each mutating operation takes the
//! interface lock, loads the document, applies a structured edit, persists
//! it together with any side files and finally reconciles the live
//! interface. A failure before persisting leaves nothing behind; a failure
//! while reconciling is returned as [`Error::ReconcilePending`] and can be
//! retried with [`Manager::resync`].
//!
//! # Example
//!
//! ```ignore
//! use wgpool::{Manager, Settings};
//!
//! let mut manager = Manager::system(Settings::new().interface("wg0"))?;
//! manager.init().await?;
//! let added = manager.add_peer("alice").await?;
//! println!("{}", added.export);
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::Subnet;
use crate::client::ClientConfig;
use crate::command::CommandRunner;
use crate::control::{InterfaceControl, LinkState, WgQuick};
use crate::discovery::{NetworkDiscovery, SystemDiscovery};
use crate::document::{ConfigDocument, NormalizeReport, PeerRecord, normalize};
use crate::error::{Error, Result};
use crate::keys::{KeyGenerator, WgKey, WgTool};
use crate::lock::InterfaceLock;
use crate::mutation;
use crate::settings::Settings;
use crate::store::Store;
use crate::sync::{IdentityOutcome, ReconcileReport, SyncEngine};

/// One row of [`Manager::list_peers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    /// Name from the peer's comment, if any.
    pub name: Option<String>,
    /// Host address inside the managed subnet.
    pub address: Option<Ipv4Addr>,
    pub public_key: Option<String>,
    pub allowed_ips: Vec<String>,
}

impl PeerSummary {
    fn new(peer: &PeerRecord, subnet: &Subnet) -> Self {
        Self {
            name: peer.name().map(str::to_string),
            address: peer.address_in(subnet),
            public_key: peer.public_key().map(str::to_string),
            allowed_ips: peer.allowed_ips().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Result of [`Manager::show_peer`].
#[derive(Debug, Clone, Serialize)]
pub struct PeerDetails {
    #[serde(flatten)]
    pub summary: PeerSummary,
    /// Where the client export lives.
    pub export_path: PathBuf,
    /// Client export text, if the file exists.
    pub export: Option<String>,
}

/// Result of [`Manager::add_peer`].
#[derive(Debug, Clone)]
pub struct AddedPeer {
    pub name: String,
    pub address: Ipv4Addr,
    pub public_key: WgKey,
    pub export_path: PathBuf,
    /// Client export text.
    pub export: String,
    pub reconcile: ReconcileReport,
}

/// Result of [`Manager::remove_peer`].
#[derive(Debug, Clone)]
pub struct RemovedPeer {
    pub name: String,
    pub public_key: Option<String>,
    /// Whether a client export was deleted.
    pub export_removed: bool,
    pub reconcile: ReconcileReport,
}

/// Peer store and interface manager.
#[derive(Debug)]
pub struct Manager<K, D, C> {
    settings: Settings,
    subnet: Subnet,
    keys: K,
    discovery: D,
    store: Store,
    sync: SyncEngine<C>,
}

impl Manager<WgTool, SystemDiscovery, WgQuick> {
    /// Create a manager that drives the host through `wg` and `wg-quick`.
    pub fn system(settings: Settings) -> Result<Self> {
        let runner = CommandRunner::new(settings.command_timeout());
        let discovery = SystemDiscovery::new(&settings);
        Self::new(settings, WgTool::new(runner), discovery, WgQuick::new(runner))
    }
}

impl<K, D, C> Manager<K, D, C>
where
    K: KeyGenerator,
    D: NetworkDiscovery,
    C: InterfaceControl,
{
    /// Create a manager from explicit capabilities.
    pub fn new(settings: Settings, keys: K, discovery: D, control: C) -> Result<Self> {
        let subnet = settings.parsed_subnet()?;
        let store = Store::new(&settings);
        let sync = SyncEngine::new(settings.clone(), store.clone(), control);
        Ok(Self {
            settings,
            subnet,
            keys,
            discovery,
            store,
            sync,
        })
    }

    /// Settings in use.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Last observed interface state.
    pub fn state(&self) -> LinkState {
        self.sync.state()
    }

    /// The sync engine.
    pub fn sync(&self) -> &SyncEngine<C> {
        &self.sync
    }

    fn lock(&self) -> Result<InterfaceLock> {
        InterfaceLock::try_acquire(&self.settings.lock_path(), &self.settings.interface)
    }

    fn missing_identity(&self) -> Error {
        Error::MissingIdentity {
            path: self.store.document_path().display().to_string(),
        }
    }

    /// Load the document for reading only.
    fn read_document(&self) -> Result<ConfigDocument> {
        let parsed = self.store.load()?.ok_or_else(|| self.missing_identity())?;
        if parsed.document.interface().is_none() {
            return Err(self.missing_identity());
        }
        Ok(parsed.document)
    }

    /// Load the document for editing. Blocks dropped while parsing are
    /// persisted right away.
    fn edit_document(&self) -> Result<ConfigDocument> {
        let doc = self.sync.load_healed()?;
        if doc.interface().is_none() {
            return Err(self.missing_identity());
        }
        Ok(doc)
    }

    async fn reconcile_persisted(&mut self, doc: &ConfigDocument) -> Result<ReconcileReport> {
        self.sync
            .reconcile(doc)
            .await
            .map_err(|e| Error::reconcile_pending(self.settings.interface.clone(), e))
    }

    async fn server_public_key(&self, doc: &ConfigDocument) -> Result<WgKey> {
        if let Some(stored) = self.store.read_server_keys()? {
            return match stored.public {
                Some(public) => Ok(public),
                None => self.keys.derive_public_key(&stored.private).await,
            };
        }
        let private: WgKey = doc
            .interface()
            .and_then(|i| i.private_key())
            .ok_or_else(|| self.missing_identity())?
            .parse()?;
        self.keys.derive_public_key(&private).await
    }

    /// Create the server identity if the document lacks one.
    pub async fn init(&mut self) -> Result<IdentityOutcome> {
        let _lock = self.lock()?;
        self.sync
            .ensure_server_identity(&self.keys, &self.discovery, &self.subnet)
            .await
    }

    /// Add a peer with a fresh keypair and the next free address.
    pub async fn add_peer(&mut self, name: &str) -> Result<AddedPeer> {
        mutation::validate_peer_name(name)?;
        let _lock = self.lock()?;
        let doc = self.edit_document()?;
        mutation::check_name_free(&doc, name)?;

        let pair = self.keys.generate_keypair().await?;
        let added = mutation::add_peer(&doc, &self.subnet, name, &pair.public.to_base64())?;
        let server_key = self.server_public_key(&added.document).await?;
        let endpoint = self.discovery.discover_public_endpoint().await;

        let export = ClientConfig::new(
            &self.settings,
            pair.private,
            added.address,
            server_key,
            endpoint,
        )
        .render();
        let export_path = self.store.write_client_export(name, &export)?;
        if let Err(e) = self.store.save(&added.document) {
            if let Err(cleanup) = self.store.remove_client_export(name) {
                warn!(name, error = %cleanup, "failed to roll back client export");
            }
            return Err(e);
        }
        info!(name, address = %added.address, "peer added");

        let reconcile = self.reconcile_persisted(&added.document).await?;
        Ok(AddedPeer {
            name: name.to_string(),
            address: added.address,
            public_key: pair.public,
            export_path,
            export,
            reconcile,
        })
    }

    /// Remove a peer and its client export.
    pub async fn remove_peer(&mut self, name: &str) -> Result<RemovedPeer> {
        let _lock = self.lock()?;
        let doc = self.edit_document()?;
        let removed = mutation::remove_peer(&doc, name)?;
        self.store.save(&removed.document)?;
        info!(name, "peer removed");

        let export_removed = match self.store.remove_client_export(name) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(name, error = %e, "failed to delete client export");
                false
            }
        };
        if !export_removed {
            debug!(name, "no client export deleted");
        }

        let reconcile = self.reconcile_persisted(&removed.document).await?;
        Ok(RemovedPeer {
            name: name.to_string(),
            public_key: removed.peer.public_key().map(str::to_string),
            export_removed,
            reconcile,
        })
    }

    /// Peers in document order.
    pub fn list_peers(&self) -> Result<Vec<PeerSummary>> {
        let doc = self.read_document()?;
        Ok(doc
            .peers()
            .map(|p| PeerSummary::new(p, &self.subnet))
            .collect())
    }

    /// One peer with its client export.
    pub fn show_peer(&self, name: &str) -> Result<PeerDetails> {
        let doc = self.read_document()?;
        let peer = doc.peer(name).ok_or_else(|| Error::PeerNotFound {
            name: name.to_string(),
        })?;
        let export = match self.store.read_client_export(name) {
            Err(Error::InvalidPeerName { .. }) => None,
            other => other?,
        };
        Ok(PeerDetails {
            summary: PeerSummary::new(peer, &self.subnet),
            export_path: self.store.client_export_path(name),
            export,
        })
    }

    /// Activate the interface.
    pub async fn bring_up(&mut self) -> Result<()> {
        let _lock = self.lock()?;
        self.sync.bring_up().await
    }

    /// Deactivate the interface.
    pub async fn bring_down(&mut self) -> Result<()> {
        let _lock = self.lock()?;
        self.sync.bring_down().await
    }

    /// Reconcile the live interface with the document on disk.
    pub async fn resync(&mut self) -> Result<ReconcileReport> {
        let _lock = self.lock()?;
        let doc = self.edit_document()?;
        self.sync.reconcile(&doc).await
    }

    /// Normalize the document in place.
    pub fn normalize(&mut self) -> Result<NormalizeReport> {
        let _lock = self.lock()?;
        let parsed = self.store.load()?.ok_or_else(|| self.missing_identity())?;
        let (document, report) = normalize(&parsed.document);
        let report = parsed.report.merge(report);
        if report.is_empty() {
            debug!(interface = %self.settings.interface, "document already normalized");
        } else {
            self.store.save(&document)?;
            info!(interface = %self.settings.interface, changes = %report, "document normalized");
        }
        Ok(report)
    }
}
