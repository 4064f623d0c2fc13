use redis::AsyncCommands;
use std::{
    collections::HashMap,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::Pin,
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("redis failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stored collection is not valid json: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable key-value storage, one JSON document per named collection.
pub trait PersistentStore: Send + Sync {
    fn load<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn load<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(())
        })
    }
}

/// Writes `<dir>/<key>.json`, replacing files through a rename so readers never see a
/// half-written collection.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl PersistentStore for FileStore {
    fn load<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(self.path_for(key)).await {
                Ok(text) => Ok(Some(text)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(StoreError::Io(err)),
            }
        })
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            let target = self.path_for(key);
            let staging = self.dir.join(format!(".{key}.json.tmp"));
            tokio::fs::write(&staging, value.as_bytes()).await?;
            tokio::fs::rename(&staging, &target).await?;
            debug!(target = "migrator.store", path = %target.display(), "collection_written");
            Ok(())
        })
    }
}

pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn open(url: &str, prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            prefix: prefix.to_string(),
        })
    }

    fn key_for(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.prefix)
        }
    }
}

impl PersistentStore for RedisStore {
    fn load<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let value: Option<String> = conn.get(self.key_for(key)).await?;
            Ok(value)
        })
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = conn.set(self.key_for(key), value).await?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "file" | "json" => Ok(StoreBackend::File),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(format!("unknown store backend {other:?}")),
        }
    }
}

pub fn open_store(
    backend: StoreBackend,
    data_dir: &Path,
    redis_url: Option<&str>,
    redis_prefix: &str,
) -> Result<Arc<dyn PersistentStore>, StoreError> {
    let store: Arc<dyn PersistentStore> = match (backend, redis_url) {
        (StoreBackend::Memory, _) => Arc::new(MemoryStore::new()),
        (StoreBackend::File, _) => Arc::new(FileStore::new(data_dir)),
        (StoreBackend::Redis, Some(url)) => Arc::new(RedisStore::open(url, redis_prefix)?),
        (StoreBackend::Redis, None) => {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "REDIS_URL is required for the redis store",
            )));
        }
    };
    Ok(store)
}
