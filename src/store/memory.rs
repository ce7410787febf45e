//! In-process run store

use super::patch::patch_run_document;
use super::{PatchOp, RunStore, StoreError};
use crate::run::Run;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps run documents in a map. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryRunStore {
    documents: RwLock<HashMap<String, Value>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let document = serde_json::to_value(run)?;
        let mut documents = self.documents.write().await;
        if documents.contains_key(&run.id) {
            return Err(StoreError::AlreadyExists(run.id.clone()));
        }
        documents.insert(run.id.clone(), document);
        Ok(())
    }

    async fn read(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let documents = self.documents.read().await;
        documents
            .get(run_id)
            .map(|doc| serde_json::from_value(doc.clone()))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn patch_fields(&self, run_id: &str, ops: &[PatchOp]) -> Result<Run, StoreError> {
        let mut documents = self.documents.write().await;
        let current = documents
            .get(run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

        let (patched, run) = patch_run_document(current, ops)?;
        documents.insert(run_id.to_string(), patched);
        Ok(run)
    }

    async fn list_unfinished(&self) -> Result<Vec<String>, StoreError> {
        let documents = self.documents.read().await;
        let mut ids = Vec::new();
        for (id, doc) in documents.iter() {
            let run: Run = serde_json::from_value(doc.clone())?;
            if !run.status.is_terminal() {
                ids.push(id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{RunStatus, DEFAULT_RUN_TTL_SECS};
    use chrono::Utc;
    use serde_json::json;

    fn sample_run(id: &str) -> Run {
        Run::new(id, "a shared calendar for dog walkers", None, DEFAULT_RUN_TTL_SECS, Utc::now())
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let store = InMemoryRunStore::new();
        store.create(&sample_run("run_a")).await.unwrap();

        let run = store.read("run_a").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Init);
        assert!(store.read("run_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = InMemoryRunStore::new();
        store.create(&sample_run("run_a")).await.unwrap();

        let result = store.create(&sample_run("run_a")).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_patch_is_all_or_nothing() {
        let store = InMemoryRunStore::new();
        store.create(&sample_run("run_a")).await.unwrap();

        let result = store
            .patch_fields(
                "run_a",
                &[
                    PatchOp::replace("/status", json!("AGENTS_RUNNING")),
                    PatchOp::replace("/status", json!("NOT_A_STATUS")),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidPatch(_))));

        let run = store.read("run_a").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Init);
    }

    #[tokio::test]
    async fn test_patch_unknown_run() {
        let store = InMemoryRunStore::new();
        let result = store
            .patch_fields("run_x", &[PatchOp::replace("/status", json!("FAILED"))])
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_unfinished_skips_terminal_runs() {
        let store = InMemoryRunStore::new();
        store.create(&sample_run("run_a")).await.unwrap();
        store.create(&sample_run("run_b")).await.unwrap();
        store
            .patch_fields(
                "run_b",
                &[
                    PatchOp::replace("/status", json!("FAILED")),
                    PatchOp::replace("/error_message", json!("boom")),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.list_unfinished().await.unwrap(), vec!["run_a"]);
        assert_eq!(store.len().await, 2);
    }
}
