//! Runtime settings.
//!
//! Every component receives a [`Settings`] at construction; nothing reads
//! process-global state. Settings can be built in code or loaded from YAML:
//!
//! ```yaml
//! interface: wg0
//! config_dir: /etc/wireguard
//! subnet: 10.0.0.0/24
//! listen_port: 51820
//! strategy: incremental
//! ```
//!
//! Fields missing from the file keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocator::Subnet;
use crate::error::Result;

/// How the sync engine applies document changes to a running interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileStrategy {
    /// Push only changed peers; other sessions are untouched.
    #[default]
    Incremental,
    /// Tear the interface down and bring it back up from the document.
    FullReload,
}

/// Settings shared by every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Interface name, also the document's file stem.
    pub interface: String,
    /// Directory holding the document and server key files.
    pub config_dir: PathBuf,
    /// Directory for per-peer client exports. Defaults to `<config_dir>/clients`.
    pub clients_dir: Option<PathBuf>,
    /// Subnet peers are allocated from, in CIDR notation.
    pub subnet: String,
    /// UDP port the server listens on.
    pub listen_port: u16,
    /// DNS server written into client exports.
    pub dns: String,
    /// Keepalive interval written into client exports.
    pub persistent_keepalive: u16,
    /// AllowedIPs written into client exports.
    pub client_allowed_ips: String,
    /// Endpoint host used in client exports when discovery fails.
    pub endpoint_placeholder: String,
    /// URL returning the public address as plain text.
    pub endpoint_url: String,
    /// Outbound interface used in NAT hooks when detection fails.
    pub default_outbound: String,
    /// PostUp hook template. `{outbound}` and `{interface}` are substituted.
    pub post_up: Option<String>,
    /// PostDown hook template. `{outbound}` and `{interface}` are substituted.
    pub post_down: Option<String>,
    /// Budget for local commands (`wg`, `wg-quick`, `ip`).
    pub command_timeout_secs: u64,
    /// Budget for network-bound queries.
    pub network_timeout_secs: u64,
    /// Reconcile policy.
    pub strategy: ReconcileStrategy,
    /// Run a parse-only dry run on a scratch copy before activation.
    pub preflight: bool,
}

const DEFAULT_POST_UP: &str = "iptables -t nat -A POSTROUTING -o {outbound} -j MASQUERADE; \
iptables -A FORWARD -i {interface} -o {interface} -j ACCEPT";
const DEFAULT_POST_DOWN: &str = "iptables -t nat -D POSTROUTING -o {outbound} -j MASQUERADE; \
iptables -D FORWARD -i {interface} -o {interface} -j ACCEPT";

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: "wg0".to_string(),
            config_dir: PathBuf::from("/etc/wireguard"),
            clients_dir: None,
            subnet: "10.0.0.0/24".to_string(),
            listen_port: 51820,
            dns: "1.1.1.1".to_string(),
            persistent_keepalive: 25,
            client_allowed_ips: "0.0.0.0/0".to_string(),
            endpoint_placeholder: "YOUR_PUBLIC_IP".to_string(),
            endpoint_url: "https://checkip.amazonaws.com".to_string(),
            default_outbound: "eth0".to_string(),
            post_up: Some(DEFAULT_POST_UP.to_string()),
            post_down: Some(DEFAULT_POST_DOWN.to_string()),
            command_timeout_secs: 10,
            network_timeout_secs: 5,
            strategy: ReconcileStrategy::Incremental,
            preflight: false,
        }
    }
}

impl Settings {
    /// Create settings with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Load settings from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Set the interface name.
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.interface = name.into();
        self
    }

    /// Set the configuration directory.
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Set the client export directory.
    pub fn clients_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clients_dir = Some(dir.into());
        self
    }

    /// Set the allocation subnet.
    pub fn subnet(mut self, cidr: impl Into<String>) -> Self {
        self.subnet = cidr.into();
        self
    }

    /// Set the listen port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Set the reconcile policy.
    pub fn strategy(mut self, strategy: ReconcileStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable the activation dry run.
    pub fn preflight(mut self, enabled: bool) -> Self {
        self.preflight = enabled;
        self
    }

    /// Path of the configuration document.
    pub fn document_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }

    /// Path of the server private key file.
    pub fn private_key_path(&self) -> PathBuf {
        self.config_dir.join("server_private.key")
    }

    /// Path of the server public key file.
    pub fn public_key_path(&self) -> PathBuf {
        self.config_dir.join("server_public.key")
    }

    /// Path of the per-interface lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.config_dir.join(format!(".{}.lock", self.interface))
    }

    /// Directory holding client exports.
    pub fn clients_dir_path(&self) -> PathBuf {
        self.clients_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("clients"))
    }

    /// Parse the configured subnet.
    pub fn parsed_subnet(&self) -> Result<Subnet> {
        self.subnet.parse()
    }

    /// Local command budget.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Network query budget.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// Render a hook template for this interface.
    pub fn render_hook(&self, template: &str, outbound: &str) -> String {
        template
            .replace("{outbound}", outbound)
            .replace("{interface}", &self.interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.interface, "wg0");
        assert_eq!(
            settings.document_path(),
            PathBuf::from("/etc/wireguard/wg0.conf")
        );
        assert_eq!(
            settings.clients_dir_path(),
            PathBuf::from("/etc/wireguard/clients")
        );
        assert_eq!(settings.strategy, ReconcileStrategy::Incremental);
        assert_eq!(settings.command_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_partial_override() {
        let settings = Settings::from_yaml_str(
            "interface: wg1\nsubnet: 10.8.0.0/24\nstrategy: full-reload\n",
        )
        .unwrap();
        assert_eq!(settings.interface, "wg1");
        assert_eq!(settings.subnet, "10.8.0.0/24");
        assert_eq!(settings.strategy, ReconcileStrategy::FullReload);
        assert_eq!(settings.listen_port, 51820);
        assert_eq!(settings.lock_path(), PathBuf::from("/etc/wireguard/.wg1.lock"));
    }

    #[test]
    fn test_yaml_empty_is_default() {
        let settings = Settings::from_yaml_str("  \n").unwrap();
        assert_eq!(settings.dns, "1.1.1.1");
    }

    #[test]
    fn test_yaml_rejects_unknown_strategy() {
        assert!(Settings::from_yaml_str("strategy: sometimes\n").is_err());
    }

    #[test]
    fn test_render_hook() {
        let settings = Settings::new().interface("wg7");
        let hook = settings.render_hook(settings.post_up.as_deref().unwrap(), "ens3");
        assert!(hook.contains("-o ens3 -j MASQUERADE"));
        assert!(hook.contains("-i wg7 -o wg7"));
    }

    #[test]
    fn test_builder() {
        let settings = Settings::new()
            .config_dir("/tmp/wg")
            .clients_dir("/tmp/out")
            .listen_port(4500)
            .preflight(true);
        assert_eq!(settings.private_key_path(), PathBuf::from("/tmp/wg/server_private.key"));
        assert_eq!(settings.clients_dir_path(), PathBuf::from("/tmp/out"));
        assert_eq!(settings.listen_port, 4500);
        assert!(settings.preflight);
    }
}
