//! Durable run store: one JSON document per run in a directory
//!
//! Writes go to a temporary file that is renamed over the document, so a crash
//! mid-write leaves either the old or the new version. A single writer lock
//! serializes read-modify-write cycles within the process.

use super::patch::patch_run_document;
use super::{PatchOp, RunStore, StoreError};
use crate::run::Run;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct FileRunStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRunStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(path = %root.display(), "opened file run store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !run_id.is_empty()
            && !run_id.starts_with('.')
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid {
            return Err(StoreError::NotFound(run_id.to_string()));
        }
        Ok(self.root.join(format!("{run_id}.json")))
    }

    async fn load(&self, path: &Path) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomically(&self, path: &Path, document: &Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let path = self.document_path(&run.id)?;
        let document = serde_json::to_value(run)?;

        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(run.id.clone()));
        }
        self.write_atomically(&path, &document).await
    }

    async fn read(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let Ok(path) = self.document_path(run_id) else {
            return Ok(None);
        };
        match self.load(&path).await? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    async fn patch_fields(&self, run_id: &str, ops: &[PatchOp]) -> Result<Run, StoreError> {
        let path = self.document_path(run_id)?;

        let _guard = self.write_lock.lock().await;
        let current = self
            .load(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

        let (patched, run) = patch_run_document(&current, ops)?;
        self.write_atomically(&path, &patched).await?;
        Ok(run)
    }

    async fn list_unfinished(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(document) = self.load(&path).await? else {
                continue;
            };
            match serde_json::from_value::<Run>(document) {
                Ok(run) if !run.status.is_terminal() => ids.push(run.id),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable run document"),
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::DEFAULT_RUN_TTL_SECS;
    use chrono::Utc;

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();

        assert!(store.read("../etc/passwd").await.unwrap().is_none());
        let run = Run::new("../escape", "idea text here", None, DEFAULT_RUN_TTL_SECS, Utc::now());
        assert!(store.create(&run).await.is_err());
    }

    #[tokio::test]
    async fn test_document_written_as_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        let run = Run::new("run_file", "idea text here", None, DEFAULT_RUN_TTL_SECS, Utc::now());
        store.create(&run).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("run_file.json")).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "INIT");
        assert!(!dir.path().join("run_file.json.tmp").exists());
    }
}
