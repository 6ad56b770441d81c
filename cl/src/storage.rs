//! Filesystem-backed storage and preview collaborators
//!
//! Thin implementations of the orchestrator's consumed interfaces for CLI
//! use: app history as a JSON file, preview as stdout.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::orchestrator::{AppStorage, NewApp, PreviewSurface, StorageError, StoredApp};

/// Maximum number of history entries kept on disk
const HISTORY_CAP: usize = 50;

/// App history persisted as a single JSON file, newest first
pub struct FsAppStorage {
    path: PathBuf,
    // File-level read-modify-write must not interleave
    lock: Mutex<()>,
}

impl FsAppStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Default history location under the platform data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatloom")
            .join("history.json")
    }

    fn read_history(path: &Path) -> Result<Vec<StoredApp>, StorageError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_history(path: &Path, history: &[StoredApp]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(history)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<StoredApp>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let history = Self::read_history(&self.path)?;
        Ok(history.into_iter().find(|app| app.id == id))
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut history = Self::read_history(&self.path)?;
        let before = history.len();
        history.retain(|app| app.id != id);
        let removed = history.len() != before;
        if removed {
            Self::write_history(&self.path, &history)?;
        }
        Ok(removed)
    }
}

fn poisoned() -> StorageError {
    StorageError::Other("history lock poisoned".to_string())
}

#[async_trait]
impl AppStorage for FsAppStorage {
    async fn save_current(&self, app: NewApp) -> Result<StoredApp, StorageError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut history = Self::read_history(&self.path)?;

        let stored = StoredApp {
            id: Uuid::now_v7().to_string(),
            description: app.description,
            html: app.html,
            created_at: Utc::now(),
        };
        debug!(id = %stored.id, "save_current: storing app");

        history.retain(|existing| existing.id != stored.id);
        history.insert(0, stored.clone());
        history.truncate(HISTORY_CAP);

        Self::write_history(&self.path, &history)?;
        Ok(stored)
    }

    async fn list_history(&self) -> Result<Vec<StoredApp>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        Self::read_history(&self.path)
    }
}

/// Preview surface that prints the artifact to stdout
#[derive(Debug, Default)]
pub struct StdoutPreview;

#[async_trait]
impl PreviewSurface for StdoutPreview {
    async fn set_preview_html(&self, html: Option<String>) -> Result<(), StorageError> {
        match html {
            Some(html) => println!("{html}"),
            None => debug!("set_preview_html: preview cleared"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, FsAppStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsAppStorage::new(dir.path().join("history.json"));
        (dir, storage)
    }

    fn app(description: &str) -> NewApp {
        NewApp {
            description: description.to_string(),
            html: format!("<html>{description}</html>"),
        }
    }

    #[tokio::test]
    async fn test_save_and_list_newest_first() {
        let (_dir, storage) = storage();
        storage.save_current(app("first")).await.unwrap();
        storage.save_current(app("second")).await.unwrap();

        let history = storage.list_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].description, "second");
        assert_eq!(history[1].description, "first");
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let storage = FsAppStorage::new(&path);
        let stored = storage.save_current(app("persisted")).await.unwrap();
        drop(storage);

        let reopened = FsAppStorage::new(&path);
        let history = reopened.list_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, stored.id);
    }

    #[tokio::test]
    async fn test_history_capped() {
        let (_dir, storage) = storage();
        for i in 0..HISTORY_CAP + 5 {
            storage.save_current(app(&format!("app-{i}"))).await.unwrap();
        }

        let history = storage.list_history().await.unwrap();
        assert_eq!(history.len(), HISTORY_CAP);
        // Oldest entries were evicted
        assert_eq!(history[0].description, format!("app-{}", HISTORY_CAP + 4));
        assert_eq!(history.last().unwrap().description, "app-5");
    }

    #[tokio::test]
    async fn test_get_and_delete_by_id() {
        let (_dir, storage) = storage();
        let stored = storage.save_current(app("target")).await.unwrap();

        let found = storage.get_by_id(&stored.id).unwrap().unwrap();
        assert_eq!(found.description, "target");
        assert!(storage.get_by_id("missing").unwrap().is_none());

        assert!(storage.delete_by_id(&stored.id).unwrap());
        assert!(!storage.delete_by_id(&stored.id).unwrap());
        assert!(storage.list_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_history_on_fresh_path() {
        let (_dir, storage) = storage();
        assert!(storage.list_history().await.unwrap().is_empty());
    }
}
