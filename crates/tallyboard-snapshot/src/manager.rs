//! Saving, pruning, and restoring snapshot artifacts.
//!
//! A save writes the whole document to a hidden temporary file, syncs
//! it, and renames it into place. A crash at any point leaves either the
//! complete new artifact or no new artifact, and never touches older
//! ones. After each successful save, only the newest `retention`
//! artifacts are kept.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tallyboard_core::{EventStore, SharedStore};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::artifact::{DocumentRef, FORMAT_VERSION, SnapshotDocument, SnapshotId, SnapshotInfo};
use crate::error::SnapshotError;

/// Owns one snapshot directory.
#[derive(Debug)]
pub struct SnapshotManager {
    dir: PathBuf,
    retention: usize,
    last_id: Mutex<Option<SnapshotId>>,
}

impl SnapshotManager {
    /// A manager for `dir` keeping at most `retention` artifacts.
    ///
    /// The directory is created on first save. A retention of zero is
    /// treated as one so the artifact just written always survives.
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
            last_id: Mutex::new(None),
        }
    }

    /// The snapshot directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize `store` to a new artifact, then enforce retention.
    ///
    /// Pass a point-in-time copy (see [`SharedStore::snapshot`]) so the
    /// write does not hold up mutations.
    pub async fn save(&self, store: &EventStore) -> Result<SnapshotId, SnapshotError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SnapshotError::io("create", &self.dir, e))?;

        let newest_on_disk = self.list_ids().await?.last().copied();
        let id = self.next_id(newest_on_disk);

        let body = serde_json::to_vec_pretty(&DocumentRef {
            format_version: FORMAT_VERSION,
            saved_at: id.saved_at(),
            store,
        })?;

        let temp_path = self.dir.join(id.temp_file_name());
        let final_path = self.dir.join(id.file_name());
        if let Err(e) = write_synced(&temp_path, &body).await {
            remove_quietly(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            remove_quietly(&temp_path).await;
            return Err(SnapshotError::io("rename", &final_path, e));
        }

        info!(
            snapshot = %id,
            bytes = body.len(),
            consumptions = store.consumptions().len(),
            "Snapshot saved"
        );

        match self.prune().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Pruned old snapshots"),
            Err(e) => warn!(error = %e, "Snapshot retention pass failed"),
        }

        Ok(id)
    }

    /// Delete the oldest artifacts beyond the retention limit.
    ///
    /// Returns how many were removed.
    pub async fn prune(&self) -> Result<usize, SnapshotError> {
        let ids = self.list_ids().await?;
        let excess = ids.len().saturating_sub(self.retention);
        let mut removed = 0_usize;
        for id in ids.iter().take(excess) {
            let path = self.dir.join(id.file_name());
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = removed.saturating_add(1),
                // A concurrent prune got there first.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(SnapshotError::io("remove", path, e)),
            }
        }
        Ok(removed)
    }

    /// Remove temporary files left behind by interrupted saves.
    pub async fn remove_stale_temp_files(&self) -> Result<usize, SnapshotError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SnapshotError::io("read", &self.dir, e)),
        };
        let mut removed = 0_usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SnapshotError::io("read", &self.dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(".tmp") {
                remove_quietly(&entry.path()).await;
                removed = removed.saturating_add(1);
            }
        }
        if removed > 0 {
            warn!(removed, dir = %self.dir.display(), "Removed interrupted snapshot writes");
        }
        Ok(removed)
    }

    /// All artifacts, newest first.
    pub async fn list(&self) -> Result<Vec<SnapshotInfo>, SnapshotError> {
        let mut infos = Vec::new();
        for id in self.list_ids().await?.into_iter().rev() {
            let path = self.dir.join(id.file_name());
            match tokio::fs::metadata(&path).await {
                Ok(meta) => infos.push(SnapshotInfo {
                    id,
                    saved_at: id.saved_at(),
                    size_bytes: meta.len(),
                }),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(SnapshotError::io("stat", path, e)),
            }
        }
        Ok(infos)
    }

    /// Raw artifact bytes, for download.
    pub async fn read_raw(&self, id: SnapshotId) -> Result<Vec<u8>, SnapshotError> {
        let path = self.dir.join(id.file_name());
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SnapshotError::NotFound(id.to_string())
            } else {
                SnapshotError::io("read", path, e)
            }
        })
    }

    /// Decode one artifact.
    pub async fn load(&self, id: SnapshotId) -> Result<EventStore, SnapshotError> {
        let bytes = self.read_raw(id).await?;
        Ok(SnapshotDocument::from_slice(&bytes)?.store)
    }

    /// Decode the newest artifact that parses, skipping broken ones.
    ///
    /// Returns `None` when the directory is missing, empty, or holds no
    /// valid artifact.
    pub async fn load_latest(&self) -> Option<(SnapshotId, EventStore)> {
        let ids = match self.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Cannot list snapshots, starting empty");
                return None;
            }
        };
        for id in ids.into_iter().rev() {
            match self.load(id).await {
                Ok(store) => return Some((id, store)),
                Err(e) => warn!(snapshot = %id, error = %e, "Skipping unreadable snapshot"),
            }
        }
        None
    }

    /// Replace `target` wholesale with the newest valid artifact.
    ///
    /// Meant for process startup. Returns `false`, leaving `target`
    /// untouched, when nothing could be restored.
    pub async fn restore(&self, target: &SharedStore) -> bool {
        match self.load_latest().await {
            Some((id, store)) => {
                let consumptions = store.consumptions().len();
                let participants = store.participants().len();
                target.replace(store, |_| ()).await;
                info!(snapshot = %id, consumptions, participants, "Restored snapshot");
                true
            }
            None => {
                info!(dir = %self.dir.display(), "No snapshot to restore, starting empty");
                false
            }
        }
    }

    /// Finished artifact IDs, oldest first.
    async fn list_ids(&self) -> Result<Vec<SnapshotId>, SnapshotError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::io("read", &self.dir, e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SnapshotError::io("read", &self.dir, e))?
        {
            if let Some(id) = SnapshotId::from_file_name(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// A fresh ID strictly newer than anything this manager wrote or found
    /// on disk, even when saves land in the same microsecond.
    fn next_id(&self, newest_on_disk: Option<SnapshotId>) -> SnapshotId {
        let mut last = self.last_id.lock().unwrap_or_else(PoisonError::into_inner);
        let floor = last
            .iter()
            .chain(newest_on_disk.iter())
            .map(|id| id.micros().saturating_add(1))
            .max()
            .unwrap_or(i64::MIN);
        let id = SnapshotId::from_micros(Utc::now().timestamp_micros().max(floor));
        *last = Some(id);
        id
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> Result<(), SnapshotError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| SnapshotError::io("create", path, e))?;
    file.write_all(body)
        .await
        .map_err(|e| SnapshotError::io("write", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| SnapshotError::io("sync", path, e))?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove temporary snapshot file");
    }
}
