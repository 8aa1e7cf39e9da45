//! On-disk persistence.
//!
//! All writes go to a temporary file in the target's directory which is
//! synced and renamed into place, so a concurrent reader sees either the old
//! or the new file and a crash never leaves half a document behind.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::document::{ConfigDocument, Parsed, parse, serialize};
use crate::error::{Error, Result};
use crate::keys::{KeyPair, WgKey};
use crate::mutation::validate_peer_name;
use crate::settings::Settings;

/// Mode for every file the store creates; they all hold key material.
const SECRET_MODE: u32 = 0o600;

/// Write a file atomically: temp file in the same directory, fsync, rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = dir.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let result = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(SECRET_MODE)
            .open(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Server key material found on disk.
#[derive(Debug, Clone)]
pub struct StoredKeys {
    /// Private key.
    pub private: WgKey,
    /// Public key, if its file exists.
    pub public: Option<WgKey>,
}

/// Files owned by one managed interface.
#[derive(Debug, Clone)]
pub struct Store {
    document: PathBuf,
    private_key: PathBuf,
    public_key: PathBuf,
    clients_dir: PathBuf,
}

impl Store {
    /// Create a store for the paths in `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            document: settings.document_path(),
            private_key: settings.private_key_path(),
            public_key: settings.public_key_path(),
            clients_dir: settings.clients_dir_path(),
        }
    }

    /// Path of the configuration document.
    pub fn document_path(&self) -> &Path {
        &self.document
    }

    /// Read and parse the document; `None` if the file does not exist.
    pub fn load(&self) -> Result<Option<Parsed>> {
        let Some(text) = read_optional(&self.document)? else {
            return Ok(None);
        };
        let parsed = parse(&text);
        if !parsed.report.is_empty() {
            warn!(
                path = %self.document.display(),
                repairs = %parsed.report,
                "document needed repair while loading"
            );
        }
        Ok(Some(parsed))
    }

    /// Persist the document atomically.
    pub fn save(&self, doc: &ConfigDocument) -> Result<()> {
        write_atomic(&self.document, &serialize(doc))
    }

    /// Read the server key files.
    pub fn read_server_keys(&self) -> Result<Option<StoredKeys>> {
        let Some(private) = read_optional(&self.private_key)? else {
            return Ok(None);
        };
        let private: WgKey = private.parse().map_err(|e| {
            Error::MalformedDocument(format!("{}: {}", self.private_key.display(), e))
        })?;
        let public = match read_optional(&self.public_key)? {
            Some(text) => Some(text.parse().map_err(|e| {
                Error::MalformedDocument(format!("{}: {}", self.public_key.display(), e))
            })?),
            None => None,
        };
        Ok(Some(StoredKeys { private, public }))
    }

    /// Write both server key files.
    pub fn write_server_keys(&self, pair: &KeyPair) -> Result<()> {
        write_atomic(&self.private_key, &format!("{}\n", pair.private))?;
        write_atomic(&self.public_key, &format!("{}\n", pair.public))
    }

    /// Write only the server public key file.
    pub fn write_server_public_key(&self, public: &WgKey) -> Result<()> {
        write_atomic(&self.public_key, &format!("{}\n", public))
    }

    /// Path of one peer's client export.
    pub fn client_export_path(&self, name: &str) -> PathBuf {
        self.clients_dir.join(format!("{}.conf", name))
    }

    /// Export path for a name that is safe to use as a file name. Names in a
    /// hand-edited document are not validated on load.
    fn checked_export_path(&self, name: &str) -> Result<PathBuf> {
        validate_peer_name(name)?;
        Ok(self.client_export_path(name))
    }

    /// Write a peer's client export.
    pub fn write_client_export(&self, name: &str, text: &str) -> Result<PathBuf> {
        let path = self.checked_export_path(name)?;
        write_atomic(&path, text)?;
        Ok(path)
    }

    /// Read a peer's client export, if present.
    pub fn read_client_export(&self, name: &str) -> Result<Option<String>> {
        read_optional(&self.checked_export_path(name)?)
    }

    /// Delete a peer's client export. Returns whether a file was removed.
    pub fn remove_client_export(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.checked_export_path(name)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::NativeKeys;
    use std::os::unix::fs::PermissionsExt;

    fn store(dir: &Path) -> Store {
        Store::new(&Settings::new().config_dir(dir))
    }

    #[test]
    fn test_write_atomic_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg0.conf");

        write_atomic(&path, "first\n").unwrap();
        write_atomic(&path, "second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let text = "[Interface]\nAddress = 10.0.0.1/24\n\n[Peer]\n# a\nPublicKey = YQ==\nAllowedIPs = 10.0.0.2/32\n";
        let doc = parse(text).document;
        store.save(&doc).unwrap();
        assert_eq!(fs::read_to_string(store.document_path()).unwrap(), text);
        assert_eq!(store.load().unwrap().unwrap().document, doc);
    }

    #[test]
    fn test_server_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.read_server_keys().unwrap().is_none());

        let private = NativeKeys::private_key();
        let pair = KeyPair {
            private,
            public: NativeKeys::public_key(&private),
        };
        store.write_server_keys(&pair).unwrap();

        let keys = store.read_server_keys().unwrap().unwrap();
        assert_eq!(keys.private, pair.private);
        assert_eq!(keys.public, Some(pair.public));
    }

    #[test]
    fn test_garbage_key_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server_private.key"), "garbage").unwrap();
        let err = store(dir.path()).read_server_keys().unwrap_err();
        assert!(matches!(err, Error::MalformedDocument(_)));
    }

    #[test]
    fn test_client_exports() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = store.write_client_export("alice", "[Interface]\n").unwrap();
        assert_eq!(path, dir.path().join("clients/alice.conf"));
        assert_eq!(
            store.read_client_export("alice").unwrap().as_deref(),
            Some("[Interface]\n")
        );
        assert!(store.remove_client_export("alice").unwrap());
        assert!(!store.remove_client_export("alice").unwrap());
        assert!(store.read_client_export("alice").unwrap().is_none());
    }

    #[test]
    fn test_client_exports_reject_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let victim = dir.path().join("victim.conf");
        fs::write(&victim, "keep\n").unwrap();

        for name in ["../victim", "..", "a/b"] {
            assert!(matches!(
                store.remove_client_export(name),
                Err(Error::InvalidPeerName { .. })
            ));
            assert!(store.read_client_export(name).is_err());
            assert!(store.write_client_export(name, "x").is_err());
        }
        assert_eq!(fs::read_to_string(&victim).unwrap(), "keep\n");
    }
}
