// src/checkpoint.rs
//! Durable `source -> position` map backed by a single JSON file.
//!
//! One physical file holds one key per source, so any number of sources can
//! share a store while staying independently resumable. Writes go through an
//! exclusive lock owned by the handle; the file is rewritten atomically
//! (temp file + rename) on every [`CheckpointStore::flush`] and again when the
//! handle is closed or dropped.
//!
//! There is no cross-process coordination: two processes pointed at the same
//! file will overwrite each other's progress.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// File name used when the store is opened from a checkpoint directory.
pub const DEFAULT_STORE_FILE: &str = "checkpoints.json";

#[derive(Debug, Default)]
struct StoreState {
    entries: BTreeMap<String, String>,
    dirty: bool,
    closed: bool,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    inner: Mutex<StoreState>,
}

impl CheckpointStore {
    /// Open the store at `path`, creating the file (and its directory) on first use.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| unavailable(&path, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| unavailable(&path, e))?;

        let mut buf = String::new();
        file.read_to_string(&mut buf)
            .map_err(|e| unavailable(&path, e))?;

        let entries: BTreeMap<String, String> = if buf.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&buf).map_err(|e| unavailable(&path, e))?
        };

        debug!(path = %path.display(), entries = entries.len(), "checkpoint store opened");

        Ok(Self {
            path,
            inner: Mutex::new(StoreState {
                entries,
                ..Default::default()
            }),
        })
    }

    /// Open `checkpoints.json` inside the host-supplied checkpoint directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(dir.as_ref().join(DEFAULT_STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored marker for `source`, or `default` when none has been recorded.
    pub fn get(&self, source: &str, default: &str) -> String {
        self.lock()
            .entries
            .get(source)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Upsert the marker for `source`. Durable no later than [`close`](Self::close).
    pub fn set(&self, source: &str, position: &str) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(IngestError::StoreClosed(self.path.clone()));
        }
        state.entries.insert(source.to_string(), position.to_string());
        state.dirty = true;
        Ok(())
    }

    /// Write pending changes to disk and keep the handle open.
    ///
    /// A no-op when nothing changed since the last flush, or after
    /// [`close`](Self::close) already persisted everything.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        self.flush_locked(&mut state)
    }

    /// Flush pending writes and release the handle. Safe to call repeatedly.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut StoreState) -> Result<()> {
        if !state.dirty {
            return Ok(());
        }
        self.persist(&state.entries)?;
        state.dirty = false;
        debug!(path = %self.path.display(), entries = state.entries.len(), "checkpoint store flushed");
        Ok(())
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let write_err = |source: std::io::Error| IngestError::StoreWrite {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).map_err(write_err)?;
        f.write_all(&json).map_err(write_err)?;
        f.sync_all().map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CheckpointStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "checkpoint store flush on drop failed");
        }
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> IngestError {
    IngestError::StoreUnavailable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::in_dir(dir.path()).unwrap();
        assert_eq!(store.get("traffic", "2016-01-01"), "2016-01-01");
    }

    #[test]
    fn set_survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CheckpointStore::in_dir(dir.path()).unwrap();
            store.set("traffic", "2016-01-03T00:00:00.000").unwrap();
            store.set("permits", "2017-05-01T12:00:00.000").unwrap();
            store.close().unwrap();
        }
        let store = CheckpointStore::in_dir(dir.path()).unwrap();
        assert_eq!(store.get("traffic", "x"), "2016-01-03T00:00:00.000");
        assert_eq!(store.get("permits", "x"), "2017-05-01T12:00:00.000");
    }

    #[test]
    fn drop_flushes_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::in_dir(dir.path()).unwrap();
        store.set("traffic", "2016-01-02").unwrap();
        drop(store);

        let reopened = CheckpointStore::in_dir(dir.path()).unwrap();
        assert_eq!(reopened.get("traffic", "x"), "2016-01-02");
    }

    #[test]
    fn close_is_idempotent_and_blocks_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::in_dir(dir.path()).unwrap();
        store.set("a", "1").unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.set("a", "2"),
            Err(IngestError::StoreClosed(_))
        ));
        assert_eq!(store.get("a", "0"), "1");
    }

    #[test]
    fn flush_is_visible_on_disk_while_handle_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::in_dir(dir.path()).unwrap();
        store.set("traffic", "2016-01-03T00:00:00.000").unwrap();
        store.flush().unwrap();

        let other = CheckpointStore::in_dir(dir.path()).unwrap();
        assert_eq!(other.get("traffic", "x"), "2016-01-03T00:00:00.000");

        // still writable after a flush
        store.set("traffic", "2016-01-04T00:00:00.000").unwrap();
        store.flush().unwrap();
        drop(other);
        let again = CheckpointStore::in_dir(dir.path()).unwrap();
        assert_eq!(again.get("traffic", "x"), "2016-01-04T00:00:00.000");
    }

    #[test]
    fn corrupt_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STORE_FILE);
        fs::write(&path, "{not json").unwrap();
        let err = CheckpointStore::open(&path).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, IngestError::StoreUnavailable { .. }));
    }

    #[test]
    fn directory_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = CheckpointStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, IngestError::StoreUnavailable { .. }));
    }

    #[test]
    fn empty_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_STORE_FILE);
        let store = CheckpointStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.get("any", "d"), "d");
    }
}
