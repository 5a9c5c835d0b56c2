//! Cross-process exclusive lock for the store file.
//!
//! The lock is an OS advisory lock held on a sibling `<store>.lock` file for
//! as long as the guard lives. The kernel drops it when the handle closes,
//! including when the holding process dies, so an abandoned lock never
//! outlives its owner. The lock file itself is left in place.

use super::store::StoreError;
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Held exclusive lock on a store. Released when dropped.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    _file: File,
}

impl StoreLock {
    /// Lock file path for a given store path.
    pub fn path_for(store_path: &Path) -> PathBuf {
        let mut name = store_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| ".env".into());
        name.push(".lock");
        store_path.with_file_name(name)
    }

    /// Acquire the lock, retrying until `timeout` elapses.
    pub fn acquire(store_path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let path = Self::path_for(store_path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        let started = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), "Store lock acquired");
                    return Ok(Self { path, _file: file });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout {
                            path,
                            waited: timeout,
                        });
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(source) => return Err(StoreError::Io { path, source }),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Store lock released");
    }
}
