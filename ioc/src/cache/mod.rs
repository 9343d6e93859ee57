//! Key/value stores used to persist the descriptor table across process
//! restarts.
//!
//! A store holds opaque byte payloads with a time-to-live. A `ttl` of zero
//! means the entry never expires; `None` means the store's default TTL.
//! Readers must treat anything they cannot decode as absent.

mod file;
mod memory;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::Result;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The default time-to-live for stores that are not given one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Version stamp written into every entry's metadata by the bundled stores.
pub const METADATA_VERSION: &str = "1.0";

/// Bookkeeping recorded alongside every cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
  pub created_at: DateTime<Utc>,
  /// Time-to-live in seconds; zero never expires.
  pub ttl: u64,
  pub expires_at: Option<DateTime<Utc>>,
  pub version: String,
}

impl CacheMetadata {
  pub fn new(ttl: Duration) -> Self {
    let created_at = Utc::now();
    let expires_at = if ttl.is_zero() {
      None
    } else {
      ChronoDuration::from_std(ttl)
        .ok()
        .and_then(|ttl| created_at.checked_add_signed(ttl))
    };
    Self {
      created_at,
      ttl: ttl.as_secs(),
      expires_at,
      version: METADATA_VERSION.to_owned(),
    }
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|expires_at| now >= expires_at)
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }
}

/// A versioned, TTL-aware key/value store.
///
/// Implementations must make `set` atomic from a reader's point of view: a
/// concurrent `get` sees either the previous entry or the new one, never a
/// partial write.
pub trait CacheStore: Send + Sync {
  /// True if `key` holds a live (unexpired) entry.
  fn has(&self, key: &str) -> bool;

  /// The payload under `key`, or [`Error::NotFound`](crate::Error::NotFound).
  fn get(&self, key: &str) -> Result<Vec<u8>>;

  fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

  fn delete(&self, key: &str) -> Result<()>;

  fn clear(&self) -> Result<()>;

  fn metadata(&self, key: &str) -> Result<CacheMetadata>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_ttl_never_expires() {
    let metadata = CacheMetadata::new(Duration::ZERO);
    assert_eq!(metadata.expires_at, None);
    assert!(!metadata.is_expired_at(Utc::now() + ChronoDuration::days(3650)));
  }

  #[test]
  fn positive_ttl_sets_expiry() {
    let metadata = CacheMetadata::new(Duration::from_secs(60));
    assert_eq!(metadata.ttl, 60);
    let expires_at = metadata.expires_at.unwrap();
    assert_eq!(expires_at - metadata.created_at, ChronoDuration::seconds(60));
    assert!(metadata.is_expired_at(expires_at));
  }
}
