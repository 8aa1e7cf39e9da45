//! WireGuard peer configuration store and interface synchronization.
//!
//! This crate keeps a WireGuard configuration document as the single source
//! of truth for a small overlay network and keeps one live interface in line
//! with it. It provides:
//!
//! - A lossless document model and text codec (`document`)
//! - Lowest-free host address allocation (`allocator`)
//! - Transactional peer edits (`mutation`)
//! - Interface lifecycle and peer reconciliation (`sync`)
//! - A high-level [`Manager`] tying these to on-disk files and a per-interface lock
//!
//! Host access goes through three capabilities, [`KeyGenerator`],
//! [`NetworkDiscovery`] and [`InterfaceControl`], with implementations backed by
//! `wg`, `wg-quick`, `curl` and `ip`.
//!
//! # Example
//!
//! ```ignore
//! use wgpool::{Manager, Settings};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> wgpool::Result<()> {
//!     let mut manager = Manager::system(Settings::new())?;
//!     manager.init().await?;
//!
//!     let added = manager.add_peer("laptop").await?;
//!     println!("{} -> {}", added.name, added.address);
//!
//!     for peer in manager.list_peers()? {
//!         println!("{:?} {:?}", peer.name, peer.address);
//!     }
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod client;
pub mod command;
pub mod control;
pub mod discovery;
pub mod document;
pub mod error;
pub mod keys;
pub mod lock;
pub mod manager;
pub mod mutation;
pub mod settings;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use allocator::Subnet;
pub use control::{InterfaceControl, LinkState, RuntimePeer, WgQuick};
pub use discovery::{NetworkDiscovery, SystemDiscovery};
pub use document::{ConfigDocument, NormalizeReport};
pub use error::{Error, Result};
pub use keys::{KeyGenerator, KeyPair, NativeKeys, WgKey, WgTool};
pub use manager::{AddedPeer, Manager, PeerDetails, PeerSummary, RemovedPeer};
pub use settings::{ReconcileStrategy, Settings};
pub use sync::{IdentityOutcome, PeerDiff, ReconcileOutcome, ReconcileReport, SyncEngine};
