//! Per-interface advisory lock.
//!
//! Mutating the document and reconciling the interface are both
//! read-modify-write sequences, so one lock per interface name serializes
//! them across processes. Acquisition never blocks: a held lock is
//! [`Error::Busy`].

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// A held interface lock. Released on drop.
#[derive(Debug)]
pub struct InterfaceLock {
    // The flock lives as long as this descriptor.
    _file: File,
    path: PathBuf,
}

impl InterfaceLock {
    /// Try to take the lock for `interface` at `path`.
    pub fn try_acquire(path: &Path, interface: &str) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)?;

        // SAFETY: flock only reads the descriptor, which `file` keeps open.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(Error::Busy {
                    interface: interface.to_string(),
                    lock_path: path.display().to_string(),
                });
            }
            return Err(err.into());
        }

        debug!(interface, path = %path.display(), "lock acquired");
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".wg0.lock");

        let held = InterfaceLock::try_acquire(&path, "wg0").unwrap();
        assert_eq!(held.path(), path.as_path());

        let err = InterfaceLock::try_acquire(&path, "wg0").unwrap_err();
        assert!(err.is_busy());
        assert!(err.to_string().contains("wg0"));
    }

    #[test]
    fn test_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".wg0.lock");

        drop(InterfaceLock::try_acquire(&path, "wg0").unwrap());
        assert!(InterfaceLock::try_acquire(&path, "wg0").is_ok());
    }

    #[test]
    fn test_locks_are_per_interface() {
        let dir = tempfile::tempdir().unwrap();
        let _a = InterfaceLock::try_acquire(&dir.path().join(".wg0.lock"), "wg0").unwrap();
        assert!(InterfaceLock::try_acquire(&dir.path().join(".wg1.lock"), "wg1").is_ok());
    }
}
