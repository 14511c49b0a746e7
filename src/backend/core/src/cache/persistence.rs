//! Durable local records.
//!
//! When `persist_locally` is enabled a [`TieredCache`](super::TieredCache)
//! mirrors every local write into a [`PersistenceStore`] and restores the
//! surviving records when it is built. Records are namespaced as
//! `"<cache name>:<key>"` so several instances can share one store.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Contract for a durable key-value record store.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Load every record whose key starts with `prefix`, keyed by full key.
    async fn load(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Write or overwrite a record.
    async fn put(&self, key: &str, raw: String) -> Result<()>;

    /// Remove a record if present.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every record whose key starts with `prefix`.
    async fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

/// File-backed [`PersistenceStore`].
///
/// All records live in one JSON object file. Every mutation rewrites the file
/// through a temporary sibling and a rename, so a crash leaves either the old
/// or the new file in place.
pub struct FileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file starts empty. An unreadable file is logged and replaced
    /// on the next write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable persistence file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), records = records.len(), "Persistence store opened");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, records: &BTreeMap<String, String>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for FileStore {
    async fn load(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let records = self.records.lock().await;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, raw)| (key.clone(), raw.clone()))
            .collect())
    }

    async fn put(&self, key: &str, raw: String) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(key.to_string(), raw);
        self.flush(&records).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.remove(key).is_some() {
            self.flush(&records).await?;
        }
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|key, _| !key.starts_with(prefix));
        let removed = before - records.len();
        if removed > 0 {
            self.flush(&records).await?;
        }
        Ok(removed)
    }
}
