//! Compiling a container's descriptor table into a frozen snapshot.

use crate::container::Container;
use crate::descriptor::ServiceDescriptor;
use crate::error::{Error, Result};
use crate::registry::ServiceRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Format version written into every snapshot.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "services.json";

/// A frozen copy of a descriptor table: every key (ids, implementation types
/// and interfaces), aliases, group and tag indices, and registration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledSnapshot {
  format_version: u32,
  compiled_at: DateTime<Utc>,
  registry: ServiceRegistry,
}

#[derive(Deserialize)]
struct SnapshotHeader {
  format_version: u32,
}

impl CompiledSnapshot {
  /// Captures the container's current table.
  ///
  /// Fails with [`Error::Serialization`] if any service is backed by a
  /// factory closure, since closures cannot be written out.
  pub fn from_container(container: &Container) -> Result<Self> {
    let registry = container.registry();
    if let Some(id) = registry.first_factory() {
      return Err(Error::Serialization(format!(
        "service '{}' is built by a factory closure and cannot be compiled",
        id
      )));
    }
    Ok(Self {
      format_version: SNAPSHOT_FORMAT_VERSION,
      compiled_at: Utc::now(),
      registry,
    })
  }

  /// Decodes a snapshot, rejecting other format versions.
  pub fn from_slice(bytes: &[u8]) -> Result<Self> {
    let header: SnapshotHeader =
      serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
    if header.format_version != SNAPSHOT_FORMAT_VERSION {
      return Err(Error::SnapshotVersion {
        found: header.format_version,
        expected: SNAPSHOT_FORMAT_VERSION,
      });
    }
    serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
  }

  pub fn to_vec(&self) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
  }

  pub fn format_version(&self) -> u32 {
    self.format_version
  }

  pub fn compiled_at(&self) -> DateTime<Utc> {
    self.compiled_at
  }

  pub fn registry(&self) -> &ServiceRegistry {
    &self.registry
  }

  /// Number of registered service ids.
  pub fn len(&self) -> usize {
    self.registry.len()
  }

  pub fn is_empty(&self) -> bool {
    self.registry.is_empty()
  }

  /// Every key in the table, interface and implementation keys included.
  pub fn keys(&self) -> Vec<String> {
    self.registry.keys().map(str::to_owned).collect()
  }

  pub fn descriptor(&self, key: &str) -> Result<Arc<ServiceDescriptor>> {
    self.registry.descriptor(key)
  }
}

/// Writes and reads compiled snapshots in a directory.
#[derive(Debug, Clone)]
pub struct SnapshotCompiler {
  dir: PathBuf,
}

impl SnapshotCompiler {
  /// Uses `dir` as the output directory, creating it if needed.
  pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    Ok(Self { dir })
  }

  /// Path of the snapshot file.
  pub fn path(&self) -> PathBuf {
    self.dir.join(SNAPSHOT_FILE)
  }

  /// Compiles the container's table and writes it, replacing any previous
  /// snapshot in one rename. Returns the snapshot path.
  pub fn compile(&self, container: &Container) -> Result<PathBuf> {
    let snapshot = CompiledSnapshot::from_container(container)?;
    let bytes = snapshot.to_vec()?;
    let path = self.path();

    let mut file = NamedTempFile::new_in(&self.dir)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(&path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!(
      path = %path.display(),
      services = snapshot.len(),
      "compiled service snapshot"
    );
    Ok(path)
  }

  pub fn load(&self) -> Result<CompiledSnapshot> {
    Self::load_from(self.path())
  }

  pub fn load_from(path: impl AsRef<Path>) -> Result<CompiledSnapshot> {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(Error::not_found(format!("no snapshot at {}", path.display())));
      }
      Err(e) => return Err(e.into()),
    };
    CompiledSnapshot::from_slice(&bytes)
  }
}
