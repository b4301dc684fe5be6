use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use fs2::FileExt;
use tokio::io::AsyncWriteExt;

use super::session::WorkflowSession;
use crate::error::{AppError, Result};

/// Every session, keyed by id.
pub type SessionMap = BTreeMap<String, WorkflowSession>;

/// Held for the duration of one read-modify-write cycle.
pub type StoreGuard = Box<dyn Send>;

/// Persistence backend for the session registry.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Take the store's exclusive write lock. A lock held elsewhere is
    /// reported as `RegistryConflict` so the caller can back off and retry.
    async fn acquire(&self) -> Result<StoreGuard>;

    async fn load(&self) -> Result<SessionMap>;

    async fn save(&self, sessions: &SessionMap) -> Result<()>;
}

/// Registry kept in a single pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry.json".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn acquire(&self) -> Result<StoreGuard> {
        let lock_path = self.lock_path.clone();

        tokio::task::spawn_blocking(move || -> Result<StoreGuard> {
            if let Some(parent) = lock_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;

            match file.try_lock_exclusive() {
                Ok(()) => Ok(Box::new(file)),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    Err(AppError::RegistryConflict(format!(
                        "{} is locked by another writer",
                        lock_path.display()
                    )))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|e| AppError::Registry(format!("registry lock task panicked: {e}")))?
    }

    async fn load(&self) -> Result<SessionMap> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SessionMap::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(SessionMap::new());
        }

        serde_json::from_str(&text).map_err(|e| {
            AppError::Registry(format!(
                "registry file {} is corrupt: {e}",
                self.path.display()
            ))
        })
    }

    async fn save(&self, sessions: &SessionMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(sessions)?;
        let temp_path = self.temp_path();
        write_synced(&temp_path, json.as_bytes()).await.map_err(|e| {
            AppError::Registry(format!(
                "failed to write {}: {e}",
                temp_path.display()
            ))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            AppError::Registry(format!(
                "failed to rename {} -> {}: {e}",
                temp_path.display(),
                self.path.display()
            ))
        })?;

        Ok(())
    }
}

/// Write `bytes` and flush them to disk, so a rename over the live file
/// never exposes an empty or partial registry.
async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// In-process registry backend.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<SessionMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn acquire(&self) -> Result<StoreGuard> {
        Ok(Box::new(()))
    }

    async fn load(&self) -> Result<SessionMap> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    async fn save(&self, sessions: &SessionMap) -> Result<()> {
        *self.sessions.lock().unwrap_or_else(|p| p.into_inner()) = sessions.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> WorkflowSession {
        WorkflowSession::new(id, "/repo", "main", "task", 2, format!("/ws/{id}"))
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("registry.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_writes_object_keyed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("registry.json"));

        let mut sessions = SessionMap::new();
        sessions.insert("wf-a".to_string(), session("wf-a"));
        store.save(&sessions).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["wf-a"]["session_id"], "wf-a");
        assert!(text.contains('\n'), "registry should be pretty-printed");
        assert!(!dir.path().join(".registry.json.tmp").exists());

        assert_eq!(store.load().await.unwrap(), sessions);
    }

    #[tokio::test]
    async fn test_save_replaces_larger_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("registry.json"));

        let mut sessions = SessionMap::new();
        for id in ["wf-a", "wf-b", "wf-c"] {
            sessions.insert(id.to_string(), session(id));
        }
        store.save(&sessions).await.unwrap();

        // A stale temp file from an interrupted save must not leak through.
        std::fs::write(dir.path().join(".registry.json.tmp"), "x".repeat(10_000)).unwrap();

        sessions.remove("wf-b");
        sessions.remove("wf-c");
        store.save(&sessions).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 1);
        assert_eq!(store.load().await.unwrap(), sessions);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_registry_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AppError::Registry(_)));
        // The file is left alone for a human to inspect.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_held_lock_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("registry.json"));

        let guard = store.acquire().await.unwrap();
        match store.acquire().await {
            Err(e) => assert!(e.is_transient(), "unexpected error: {e}"),
            Ok(_) => panic!("second acquire succeeded while the lock was held"),
        }

        drop(guard);
        assert!(store.acquire().await.is_ok());
    }
}
