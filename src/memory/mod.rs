//! Persistence for the console's memory map.
//!
//! Writes walk a chain of stores: the primary memory service, an optional
//! fallback service, then a local JSON cache file. The first store that
//! accepts the write wins. Reads use the same order.
//!
//! Saves through one [`MemoryPersistence`] run one at a time. The console hands
//! maps to a [`MemoryWriter`], which keeps only the newest pending map so a
//! slow store never writes an older map over a newer one.
//!
//! The memory service speaks two endpoints:
//!
//! - `GET /memory` returns `{"memory": {...}}`
//! - `POST /memory` with `{"memory": {...}}` returns `{"success": bool}`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, watch};

/// Key/value facts remembered about the user.
pub type MemoryMap = BTreeMap<String, Value>;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Memory service returned status {0}")]
    Status(u16),

    #[error("Memory service rejected the write")]
    Rejected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No memory store configured")]
    NoStore,
}

pub type MemoryResult<T> = Result<T, MemoryError>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryDocument {
    #[serde(default)]
    memory: MemoryMap,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    success: bool,
}

/// A place the memory map can be loaded from and saved to.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Human readable location, used in logs.
    fn describe(&self) -> String;

    async fn load(&self) -> MemoryResult<MemoryMap>;

    async fn save(&self, memory: &MemoryMap) -> MemoryResult<()>;
}

/// Remote memory service.
pub struct HttpMemoryStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMemoryStore {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/memory", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl MemoryStore for HttpMemoryStore {
    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    async fn load(&self) -> MemoryResult<MemoryMap> {
        let response = self.client.get(&self.endpoint).send().await?;
        if !response.status().is_success() {
            return Err(MemoryError::Status(response.status().as_u16()));
        }
        let document: MemoryDocument = response.json().await?;
        Ok(document.memory)
    }

    async fn save(&self, memory: &MemoryMap) -> MemoryResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "memory": memory }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MemoryError::Status(response.status().as_u16()));
        }
        let body: SaveResponse = response.json().await?;
        if body.success {
            Ok(())
        } else {
            Err(MemoryError::Rejected)
        }
    }
}

/// Local JSON cache file, written atomically through a temp file.
pub struct FileMemoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Sibling temp file, unique per write.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "memory.json".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> MemoryResult<MemoryMap> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let document: MemoryDocument = serde_json::from_slice(&bytes)?;
                Ok(document.memory)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, memory: &MemoryMap) -> MemoryResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(&serde_json::json!({ "memory": memory }))?;
        let _guard = self.write_lock.lock().await;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Ordered chain of stores.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    stores: Vec<Arc<dyn MemoryStore>>,
    /// Shared by clones so saves never interleave across the chain
    save_lock: Arc<Mutex<()>>,
}

impl MemoryPersistence {
    pub fn new(stores: Vec<Arc<dyn MemoryStore>>) -> Self {
        Self {
            stores,
            save_lock: Arc::default(),
        }
    }

    /// Primary service, optional fallback service, then the cache file.
    pub fn from_urls(
        primary_url: Option<&str>,
        fallback_url: Option<&str>,
        cache_path: Option<&Path>,
        timeout: Duration,
    ) -> MemoryResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let mut stores: Vec<Arc<dyn MemoryStore>> = Vec::new();
        for url in [primary_url, fallback_url].into_iter().flatten() {
            stores.push(Arc::new(HttpMemoryStore::new(client.clone(), url)));
        }
        if let Some(path) = cache_path {
            stores.push(Arc::new(FileMemoryStore::new(path)));
        }
        Ok(Self::new(stores))
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Save to the first store that accepts the write.
    ///
    /// Returns the description of that store, or the last error.
    pub async fn save(&self, memory: &MemoryMap) -> MemoryResult<String> {
        let _guard = self.save_lock.lock().await;
        let mut last_error = MemoryError::NoStore;
        for store in &self.stores {
            match store.save(memory).await {
                Ok(()) => {
                    tracing::debug!(store = %store.describe(), "Memory saved");
                    return Ok(store.describe());
                }
                Err(e) => {
                    tracing::warn!(store = %store.describe(), "Memory save failed: {}", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Load from the first store that answers.
    pub async fn load(&self) -> MemoryResult<MemoryMap> {
        let mut last_error = MemoryError::NoStore;
        for store in &self.stores {
            match store.load().await {
                Ok(memory) => return Ok(memory),
                Err(e) => {
                    tracing::warn!(store = %store.describe(), "Memory load failed: {}", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Background writer that persists the newest map handed to it.
///
/// Maps submitted while a save is running collapse into the latest one. The
/// task ends when every clone of the writer is dropped.
#[derive(Clone)]
pub struct MemoryWriter {
    pending: Arc<watch::Sender<Option<MemoryMap>>>,
}

impl MemoryWriter {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(persistence: MemoryPersistence) -> Self {
        let (tx, mut rx) = watch::channel(None::<MemoryMap>);

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(memory) = rx.borrow_and_update().clone() else {
                    continue;
                };
                if let Err(e) = persistence.save(&memory).await {
                    tracing::warn!("Memory was not persisted: {}", e);
                }
            }
            tracing::debug!("Memory writer stopped");
        });

        Self {
            pending: Arc::new(tx),
        }
    }

    /// Queue `memory` for saving, replacing any map not yet picked up.
    pub fn submit(&self, memory: MemoryMap) {
        self.pending.send_replace(Some(memory));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileMemoryStore::new(dir.path().join("nested").join("memory.json"));

        assert!(store.load().await.unwrap().is_empty());

        let mut memory = MemoryMap::new();
        memory.insert("user_name".to_string(), json!("Ada"));
        store.save(&memory).await.unwrap();

        assert_eq!(store.load().await.unwrap(), memory);
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileMemoryStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(MemoryError::Serialization(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_file_saves_never_corrupt_the_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        let store = Arc::new(FileMemoryStore::new(&path));

        for round in 0..50 {
            let handles: Vec<_> = (0..4)
                .map(|writer| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        let mut memory = MemoryMap::new();
                        memory.insert("round".to_string(), json!(round));
                        memory.insert("writer".to_string(), json!(writer));
                        store.save(&memory).await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
            let loaded = store.load().await.unwrap();
            assert_eq!(loaded["round"], json!(round));
        }

        // No temp files are left behind.
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    /// Records saved maps, taking longer for the first one.
    struct SlowStore {
        saved: parking_lot::Mutex<Vec<MemoryMap>>,
    }

    #[async_trait]
    impl MemoryStore for SlowStore {
        fn describe(&self) -> String {
            "slow".to_string()
        }

        async fn load(&self) -> MemoryResult<MemoryMap> {
            Ok(MemoryMap::new())
        }

        async fn save(&self, memory: &MemoryMap) -> MemoryResult<()> {
            let first = self.saved.lock().is_empty();
            if first {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.saved.lock().push(memory.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writer_saves_in_order_and_keeps_latest() {
        let store = Arc::new(SlowStore {
            saved: parking_lot::Mutex::new(Vec::new()),
        });
        let writer = MemoryWriter::spawn(MemoryPersistence::new(vec![
            store.clone() as Arc<dyn MemoryStore>
        ]));

        let mut memory = MemoryMap::new();
        for n in 0..5 {
            memory.insert(format!("key_{n}"), json!(n));
            writer.submit(memory.clone());
            tokio::task::yield_now().await;
        }

        for _ in 0..100 {
            if store.saved.lock().last() == Some(&memory) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let saved = store.saved.lock().clone();
        assert_eq!(saved.last(), Some(&memory));
        // Each save carries at least as much as the one before it.
        assert!(saved.windows(2).all(|pair| pair[0].len() < pair[1].len()));
        // Submissions during the slow first save were coalesced.
        assert!(saved.len() < 5);
    }

    #[tokio::test]
    async fn test_empty_chain_reports_no_store() {
        let persistence = MemoryPersistence::default();
        assert!(persistence.is_empty());
        assert!(matches!(
            persistence.save(&MemoryMap::new()).await,
            Err(MemoryError::NoStore)
        ));
    }
}
