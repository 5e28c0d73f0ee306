// Persistence backends behind the content store: in-memory map and one-file-per-key directory.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::debug;

/// Key/value persistence partitioned by name. No cross-key transactions.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Bytes>>;
    async fn put(&self, partition: &str, key: &str, value: Bytes) -> Result<()>;
    async fn delete(&self, partition: &str, key: &str) -> Result<()>;
    async fn clear(&self, partition: &str) -> Result<()>;
}

/// Process-local backend. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryBackend {
    partitions: RwLock<HashMap<String, HashMap<String, Bytes>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw presence check that bypasses expiry handling.
    pub fn contains(&self, partition: &str, key: &str) -> bool {
        self.partitions
            .read()
            .get(partition)
            .map_or(false, |p| p.contains_key(key))
    }

    pub fn len(&self, partition: &str) -> usize {
        self.partitions.read().get(partition).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .and_then(|p| p.get(key))
            .cloned())
    }

    async fn put(&self, partition: &str, key: &str, value: Bytes) -> Result<()> {
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<()> {
        if let Some(p) = self.partitions.write().get_mut(partition) {
            p.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, partition: &str) -> Result<()> {
        self.partitions.write().remove(partition);
        Ok(())
    }
}

/// Directory-backed backend: `<root>/<partition>/<escaped key>.rec`.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.as_os_str().is_empty() {
            return Err(anyhow!("cache root must not be empty"));
        }
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| anyhow!("cannot create cache root {}: {}", root.display(), e))?;
        debug!("fs backend opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(escape_component(partition))
    }

    fn record_path(&self, partition: &str, key: &str) -> PathBuf {
        self.partition_dir(partition)
            .join(format!("{}.rec", escape_component(key)))
    }
}

#[async_trait]
impl StoreBackend for FsBackend {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.record_path(partition, key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow!("read {}/{} failed: {}", partition, key, e)),
        }
    }

    async fn put(&self, partition: &str, key: &str, value: Bytes) -> Result<()> {
        let dir = self.partition_dir(partition);
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.record_path(partition, key);

        // Each write fills its own temp file in the partition, then renames it
        // over the record: readers see a whole record, the last rename wins.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&value)?;
            tmp.persist(&path)
                .map_err(|e| anyhow!("persist {} failed: {}", path.display(), e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("write task for {}/{} failed: {}", partition, key, e))?
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(partition, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!("delete {}/{} failed: {}", partition, key, e)),
        }
    }

    async fn clear(&self, partition: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.partition_dir(partition)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!("clear {} failed: {}", partition, e)),
        }
    }
}

/// Make an arbitrary key safe to use as a single path component.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, b) in raw.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && i > 0);
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}
