use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{SnapshotStore, StoreResult};

const ENTRY_EXTENSION: &str = "json";

/// Stores each key as `<percent-encoded key>.json` inside one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", urlencoding::encode(key), ENTRY_EXTENSION))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        if path.extension()? != ENTRY_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        urlencoding::decode(stem).ok().map(|key| key.into_owned())
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let contents = match tokio::fs::read_to_string(self.entry_path(key)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string(&value)?;
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self) -> StoreResult<Vec<(String, Value)>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let Some(key) = Self::key_from_path(&path) else {
                continue;
            };

            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping unreadable cache entry");
                    continue;
                }
            };

            match serde_json::from_str(&contents) {
                Ok(value) => entries.push((key, value)),
                Err(e) => debug!(key = %key, error = %e, "Skipping unparseable cache entry"),
            }
        }

        Ok(entries)
    }
}
