//! Rotating per-collection snapshot set used for corruption recovery.
//!
//! Layout: `<data_dir>/backups/<collection>/<collection>-<unix_millis>-<seq>.json`.
//! Names are zero-padded so lexical order is chronological order.

use super::model::CollectionId;
use super::LedgerError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const BACKUP_DIR: &str = "backups";

pub(crate) fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct BackupSet {
    dir: PathBuf,
    retention: usize,
    seq: AtomicU64,
}

impl BackupSet {
    pub fn new(data_dir: &Path, retention: usize) -> Self {
        Self {
            dir: data_dir.join(BACKUP_DIR),
            retention,
            seq: AtomicU64::new(0),
        }
    }

    fn collection_dir(&self, id: CollectionId) -> PathBuf {
        self.dir.join(id.name())
    }

    /// Store `bytes` as the newest snapshot of `id`, then prune old ones.
    pub fn write(&self, id: CollectionId, bytes: &[u8]) -> Result<PathBuf, LedgerError> {
        let dir = self.collection_dir(id);
        fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let path = dir.join(format!(
            "{}-{:015}-{:06}.json",
            id.name(),
            unix_millis(),
            seq
        ));
        fs::write(&path, bytes).map_err(|e| LedgerError::io(&path, e))?;

        self.prune(id)?;
        Ok(path)
    }

    /// Snapshot paths for `id`, newest first.
    pub fn list_newest_first(&self, id: CollectionId) -> Vec<PathBuf> {
        let dir = self.collection_dir(id);
        let prefix = format!("{}-", id.name());
        let mut paths: Vec<PathBuf> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        paths.sort();
        paths.reverse();
        paths
    }

    fn prune(&self, id: CollectionId) -> Result<(), LedgerError> {
        for stale in self.list_newest_first(id).into_iter().skip(self.retention) {
            fs::remove_file(&stale).map_err(|e| LedgerError::io(&stale, e))?;
        }
        Ok(())
    }
}
