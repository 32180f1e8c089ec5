use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pubmerge_core::models::{IdKind, MergedRecord, SourceRecord, is_valid_key};

use crate::error::{CollateError, Result};

const RAW: &str = "raw";
const PROCESSED: &str = "processed";
const MERGED: &str = "merged";

/// A verbatim source payload with its tag. Immutable once cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub local_key: String,
    pub source: String,
    pub identifier_kind: IdKind,
    pub fetched_at: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub raw: usize,
    pub processed: usize,
    pub merged: usize,
}

/// Content-addressed, append-only store for per-source responses and merged
/// records, partitioned by source name and data stage:
///
/// ```text
/// <root>/raw/<source>/<key>.json
/// <root>/processed/<source>/<key>.json
/// <root>/processed/merged/<key>.json
/// ```
///
/// There is no TTL: a present processed entry is always reused. Writes go
/// through a temp file and an atomic rename, raw form first, so a reader
/// never observes a normalized record without its raw counterpart.
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True iff a normalized record for (key, source) is already on disk.
    pub async fn has(&self, key: &str, source: &str) -> bool {
        match self.entry_path(PROCESSED, source, key) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Read the normalized record for (key, source). An artifact that does
    /// not parse, or whose embedded local key is not the requested one
    /// (keyspace collision), fails loudly as cache corruption.
    pub async fn get(&self, key: &str, source: &str) -> Result<Option<SourceRecord>> {
        let path = self.entry_path(PROCESSED, source, key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corruption(key, format!("unreadable {}: {e}", path.display()))),
        };

        let record: SourceRecord = serde_json::from_slice(&data)
            .map_err(|e| corruption(key, format!("unparseable {}: {e}", path.display())))?;

        if record.local_key != key {
            return Err(corruption(
                key,
                format!(
                    "cache key collision: {} holds record for {:?}",
                    path.display(),
                    record.local_key
                ),
            ));
        }

        Ok(Some(record))
    }

    /// Persist one fetch: raw payload first, then the normalized record,
    /// each atomically. Overwrites on repeated calls for the same key.
    pub async fn put(
        &self,
        key: &str,
        source: &str,
        raw: &RawResponse,
        record: &SourceRecord,
    ) -> Result<()> {
        if record.local_key != key || raw.local_key != key {
            return Err(corruption(
                key,
                format!(
                    "refusing to cache record tagged {:?} under key {key:?}",
                    record.local_key
                ),
            ));
        }

        let raw_path = self.entry_path(RAW, source, key)?;
        let raw_bytes = serde_json::to_vec_pretty(raw)
            .map_err(|e| corruption(key, format!("raw response not serializable: {e}")))?;
        write_atomic(&raw_path, &raw_bytes)
            .await
            .map_err(|e| corruption(key, format!("writing {}: {e}", raw_path.display())))?;

        let processed_path = self.entry_path(PROCESSED, source, key)?;
        let record_bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| corruption(key, format!("record not serializable: {e}")))?;
        write_atomic(&processed_path, &record_bytes)
            .await
            .map_err(|e| corruption(key, format!("writing {}: {e}", processed_path.display())))?;

        Ok(())
    }

    pub async fn write_merged(&self, record: &MergedRecord) -> Result<()> {
        let path = self.merged_path(&record.local_key)?;
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| {
            corruption(&record.local_key, format!("merged record not serializable: {e}"))
        })?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| corruption(&record.local_key, format!("writing {}: {e}", path.display())))
    }

    pub async fn read_merged(&self, key: &str) -> Result<Option<MergedRecord>> {
        let path = self.merged_path(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corruption(key, format!("unreadable {}: {e}", path.display()))),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| corruption(key, format!("unparseable {}: {e}", path.display())))
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            raw: count_files(&self.root.join(RAW)).await,
            processed: count_files_excluding(&self.root.join(PROCESSED), MERGED).await,
            merged: count_files(&self.root.join(PROCESSED).join(MERGED)).await,
        }
    }

    fn entry_path(&self, stage: &str, source: &str, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            return Err(corruption(key, "local key is not filesystem-safe".to_string()));
        }
        if !is_valid_key(source) || source == MERGED {
            return Err(corruption(key, format!("invalid source name {source:?}")));
        }
        Ok(self.root.join(stage).join(source).join(format!("{key}.json")))
    }

    fn merged_path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            return Err(corruption(key, "local key is not filesystem-safe".to_string()));
        }
        Ok(self
            .root
            .join(PROCESSED)
            .join(MERGED)
            .join(format!("{key}.json")))
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    // Writers never share a key, so the temp name only needs to be unique
    // per destination.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn count_files(dir: &Path) -> usize {
    let mut count = 0;
    let Ok(mut sources) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = sources.next_entry().await {
        let path = entry.path();
        if path.is_dir() {
            count += count_json_entries(&path).await;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            count += 1;
        }
    }
    count
}

async fn count_files_excluding(dir: &Path, excluded: &str) -> usize {
    let mut count = 0;
    let Ok(mut sources) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = sources.next_entry().await {
        let path = entry.path();
        if path.is_dir() && entry.file_name() != excluded {
            count += count_json_entries(&path).await;
        }
    }
    count
}

async fn count_json_entries(dir: &Path) -> usize {
    let mut count = 0;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().extension().is_some_and(|ext| ext == "json") {
            count += 1;
        }
    }
    count
}

fn corruption(key: &str, message: String) -> CollateError {
    CollateError::CacheCorruption {
        local_key: key.to_string(),
        message,
    }
}
