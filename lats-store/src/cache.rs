//! Offline cache collaborator.
//!
//! The cache holds the last known rows per collection. Rows are stored in
//! normalized form, so reading them back through the record's `normalize`
//! is lossless.

use async_trait::async_trait;
use lats_core::{CacheError, LatsResult, RawRow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

#[async_trait]
pub trait OfflineCache: Send + Sync {
    /// All cached rows for `collection`; empty when nothing is cached.
    async fn get_all(&self, collection: &str) -> LatsResult<Vec<RawRow>>;

    /// Replace the snapshot for `collection`.
    async fn put_all(&self, collection: &str, rows: Vec<RawRow>) -> LatsResult<()>;

    async fn clear(&self, collection: &str) -> LatsResult<()>;
}

/// Process-local cache, mostly for tests.
#[derive(Debug, Default)]
pub struct InMemoryOfflineCache {
    snapshots: RwLock<HashMap<String, Vec<RawRow>>>,
}

impl InMemoryOfflineCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfflineCache for InMemoryOfflineCache {
    async fn get_all(&self, collection: &str) -> LatsResult<Vec<RawRow>> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots.get(collection).cloned().unwrap_or_default())
    }

    async fn put_all(&self, collection: &str, rows: Vec<RawRow>) -> LatsResult<()> {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.insert(collection.to_string(), rows);
        Ok(())
    }

    async fn clear(&self, collection: &str) -> LatsResult<()> {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.remove(collection);
        Ok(())
    }
}

/// One pretty-printed JSON file per collection under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    directory: PathBuf,
}

impl JsonFileCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, collection: &str) -> LatsResult<PathBuf> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(io_error(collection, "collection name is not a valid file name"));
        }
        Ok(self.directory.join(format!("{collection}.json")))
    }
}

#[async_trait]
impl OfflineCache for JsonFileCache {
    async fn get_all(&self, collection: &str) -> LatsResult<Vec<RawRow>> {
        let path = self.path_for(collection)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(collection, e)),
        };
        serde_json::from_str(&contents).map_err(|e| {
            CacheError::Serde {
                collection: collection.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn put_all(&self, collection: &str, rows: Vec<RawRow>) -> LatsResult<()> {
        let path = self.path_for(collection)?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| io_error(collection, e))?;
        let contents = serde_json::to_string_pretty(&rows).map_err(|e| CacheError::Serde {
            collection: collection.to_string(),
            reason: e.to_string(),
        })?;
        let directory = self.directory.clone();
        let name = collection.to_string();
        tokio::task::spawn_blocking(move || persist_snapshot(&directory, &path, &name, contents))
            .await
            .map_err(|e| io_error(collection, e))?
    }

    async fn clear(&self, collection: &str) -> LatsResult<()> {
        let path = self.path_for(collection)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(collection, e)),
        }
    }
}

/// Each write goes through its own temp file in the cache directory, so
/// concurrent snapshots of one collection never share a partial file and
/// readers only ever see a complete one.
fn persist_snapshot(
    directory: &Path,
    path: &Path,
    collection: &str,
    contents: String,
) -> LatsResult<()> {
    let temp = tempfile::NamedTempFile::new_in(directory).map_err(|e| io_error(collection, e))?;
    std::fs::write(temp.path(), contents).map_err(|e| io_error(collection, e))?;
    temp.persist(path).map_err(|e| io_error(collection, e))?;
    Ok(())
}

fn io_error(collection: &str, reason: impl ToString) -> lats_core::LatsError {
    CacheError::Io {
        collection: collection.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn rows(n: usize) -> Vec<RawRow> {
        (0..n)
            .map(|i| match json!({ "id": i, "name": format!("customer {i}") }) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let cache = InMemoryOfflineCache::new();
        assert!(cache.get_all("customers").await.unwrap().is_empty());

        cache.put_all("customers", rows(3)).await.unwrap();
        assert_eq!(cache.get_all("customers").await.unwrap().len(), 3);
        assert!(cache.get_all("devices").await.unwrap().is_empty());

        cache.clear("customers").await.unwrap();
        assert!(cache.get_all("customers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_cache_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("offline"));

        assert!(cache.get_all("customers").await.unwrap().is_empty());
        cache.put_all("customers", rows(2)).await.unwrap();

        let reopened = JsonFileCache::new(dir.path().join("offline"));
        let loaded = reopened.get_all("customers").await.unwrap();
        assert_eq!(loaded, rows(2));

        reopened.clear("customers").await.unwrap();
        reopened.clear("customers").await.unwrap();
        assert!(reopened.get_all("customers").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_snapshots_stay_whole() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(JsonFileCache::new(dir.path()));

        let writers = (1..=8).map(|n| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.put_all("customers", rows(n * 20)).await })
        });
        for writer in futures_util::future::join_all(writers).await {
            writer.unwrap().unwrap();
        }

        // whichever write landed last, the file holds one complete snapshot
        let loaded = cache.get_all("customers").await.unwrap();
        assert_eq!(loaded.len() % 20, 0);
        assert_eq!(loaded, rows(loaded.len()));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("customers.json")]);
    }

    #[tokio::test]
    async fn test_json_file_cache_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path());
        let err = cache.get_all("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, lats_core::LatsError::Cache(CacheError::Io { .. })));
    }

    #[tokio::test]
    async fn test_json_file_cache_corrupt_file_is_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("customers.json"), "{not json").unwrap();
        let cache = JsonFileCache::new(dir.path());
        let err = cache.get_all("customers").await.unwrap_err();
        assert!(matches!(err, lats_core::LatsError::Cache(CacheError::Serde { .. })));
    }
}
