use super::{CacheMetadata, CacheStore, DEFAULT_TTL};
use crate::error::{Error, Result};

use dashmap::DashMap;
use std::time::Duration;

struct MemoryEntry {
  payload: Vec<u8>,
  metadata: CacheMetadata,
}

/// A process-local store backed by a concurrent map.
pub struct MemoryCacheStore {
  entries: DashMap<String, MemoryEntry>,
  default_ttl: Duration,
}

impl Default for MemoryCacheStore {
  fn default() -> Self {
    Self::with_default_ttl(DEFAULT_TTL)
  }
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_default_ttl(default_ttl: Duration) -> Self {
    Self {
      entries: DashMap::new(),
      default_ttl,
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn missing(key: &str) -> Error {
    Error::not_found(format!("cache key '{}' not found", key))
  }
}

impl CacheStore for MemoryCacheStore {
  fn has(&self, key: &str) -> bool {
    let expired = match self.entries.get(key) {
      Some(entry) => entry.metadata.is_expired(),
      None => return false,
    };
    if expired {
      self.entries.remove(key);
    }
    !expired
  }

  fn get(&self, key: &str) -> Result<Vec<u8>> {
    if !self.has(key) {
      return Err(Self::missing(key));
    }
    self
      .entries
      .get(key)
      .map(|entry| entry.payload.clone())
      .ok_or_else(|| Self::missing(key))
  }

  fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
    let entry = MemoryEntry {
      payload: value.to_vec(),
      metadata: CacheMetadata::new(ttl.unwrap_or(self.default_ttl)),
    };
    self.entries.insert(key.to_owned(), entry);
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.entries.remove(key);
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self.entries.clear();
    Ok(())
  }

  fn metadata(&self, key: &str) -> Result<CacheMetadata> {
    self
      .entries
      .get(key)
      .map(|entry| entry.metadata.clone())
      .ok_or_else(|| Self::missing(key))
  }
}
