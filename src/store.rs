use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

/// Flat key-value persistence for client-side state (settings, changelog cache).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
    async fn put(&self, key: &str, value: &serde_json::Value) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

pub async fn load<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> anyhow::Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => {
            let parsed = serde_json::from_value(value).with_context(|| format!("parse key {key}"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn save<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let value = serde_json::to_value(value).with_context(|| format!("serialize key {key}"))?;
    store.put(key, &value).await
}

/// One JSON file per key under `<base_dir>/kv/`.
#[derive(Debug, Clone)]
pub struct LocalFsKvStore {
    base_dir: PathBuf,
}

impl LocalFsKvStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn key_path(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            anyhow::bail!("invalid store key: {key:?}");
        }
        Ok(self.base_dir.join("kv").join(format!("{key}.json")))
    }
}

#[async_trait]
impl KvStore for LocalFsKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let path = self.key_path(key)?;
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
        let path = self.key_path(key)?;
        write_json_atomic(&path, value)
            .await
            .with_context(|| format!("write: {}", path.display()))
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove: {}", path.display())),
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
