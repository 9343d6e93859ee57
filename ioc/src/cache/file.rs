use super::{CacheMetadata, CacheStore, DEFAULT_TTL};
use crate::error::{Error, Result};

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// A store that keeps one file per key under a directory.
///
/// Keys are hashed with SHA-256 and spread over 256 subdirectories. Each file
/// holds a single line of JSON metadata followed by the raw payload, so the
/// entry and its metadata are replaced together by one atomic rename.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
  dir: PathBuf,
  default_ttl: Duration,
}

impl FileCacheStore {
  /// Opens (creating if needed) a store rooted at `dir`.
  pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
    Self::with_default_ttl(dir, DEFAULT_TTL)
  }

  pub fn with_default_ttl(dir: impl Into<PathBuf>, default_ttl: Duration) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    Ok(Self { dir, default_ttl })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path(&self, key: &str) -> PathBuf {
    let hash = hex::encode(Sha256::digest(key.as_bytes()));
    let (shard, rest) = hash.split_at(2);
    self.dir.join(shard).join(rest)
  }

  fn missing(key: &str) -> Error {
    Error::not_found(format!("cache key '{}' not found", key))
  }

  // Reads and splits an entry. Unreadable or malformed files yield `None`.
  fn read_entry(&self, key: &str) -> Option<(CacheMetadata, Vec<u8>)> {
    let bytes = fs::read(self.path(key)).ok()?;
    let newline = bytes.iter().position(|b| *b == b'\n')?;
    let metadata: CacheMetadata = serde_json::from_slice(&bytes[..newline]).ok()?;
    Some((metadata, bytes[newline + 1..].to_vec()))
  }

  // Loads a live entry, removing it from disk if it is expired or corrupt.
  fn live_entry(&self, key: &str) -> Option<(CacheMetadata, Vec<u8>)> {
    let path = self.path(key);
    if !path.exists() {
      return None;
    }
    match self.read_entry(key) {
      Some((metadata, payload)) if !metadata.is_expired() => Some((metadata, payload)),
      _ => {
        if let Err(e) = self.delete(key) {
          tracing::warn!(key, error = %e, "failed to remove stale cache entry");
        }
        None
      }
    }
  }
}

impl CacheStore for FileCacheStore {
  fn has(&self, key: &str) -> bool {
    self.live_entry(key).is_some()
  }

  fn get(&self, key: &str) -> Result<Vec<u8>> {
    self
      .live_entry(key)
      .map(|(_, payload)| payload)
      .ok_or_else(|| Self::missing(key))
  }

  fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
    let path = self.path(key);
    let parent = path.parent().unwrap_or(&self.dir);
    fs::create_dir_all(parent)?;

    let metadata = CacheMetadata::new(ttl.unwrap_or(self.default_ttl));
    let header = serde_json::to_vec(&metadata).map_err(|e| Error::Serialization(e.to_string()))?;

    // The temporary file lives next to the target so the rename stays on
    // one filesystem.
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(&header)?;
    file.write_all(b"\n")?;
    file.write_all(value)?;
    file.as_file().sync_all()?;
    file.persist(&path).map_err(|e| Error::Io(e.error))?;
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    match fs::remove_file(self.path(key)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  fn clear(&self) -> Result<()> {
    if self.dir.exists() {
      fs::remove_dir_all(&self.dir)?;
    }
    fs::create_dir_all(&self.dir)?;
    Ok(())
  }

  fn metadata(&self, key: &str) -> Result<CacheMetadata> {
    self
      .read_entry(key)
      .map(|(metadata, _)| metadata)
      .ok_or_else(|| Self::missing(key))
  }
}
