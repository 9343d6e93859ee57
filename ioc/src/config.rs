//! Bulk service configuration documents.
//!
//! A document maps service ids to descriptor fields:
//!
//! ```yaml
//! services:
//!   primary.db:
//!     class: app::Database
//!     arguments:
//!       dsn: "postgres://localhost/app"
//!   users:
//!     class: app::UserRepository
//!     alias: repo
//!     arguments:
//!       db: "@primary.db"
//! ```
//!
//! Entries are registered in document order.

use crate::descriptor::{Arguments, ServiceDescriptor};
use crate::error::{Error, Result};

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

fn default_singleton() -> bool {
  true
}

/// The descriptor fields of one configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
  /// Implementation type name. Defaults to the service id.
  #[serde(default)]
  pub class: Option<String>,
  #[serde(default)]
  pub alias: Option<String>,
  #[serde(default)]
  pub implements: Option<String>,
  #[serde(default)]
  pub group: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub priority: i32,
  #[serde(default = "default_singleton")]
  pub singleton: bool,
  #[serde(default)]
  pub arguments: Arguments,
}

impl Default for ServiceEntry {
  fn default() -> Self {
    Self {
      class: None,
      alias: None,
      implements: None,
      group: None,
      tags: Vec::new(),
      priority: 0,
      singleton: true,
      arguments: Arguments::default(),
    }
  }
}

impl ServiceEntry {
  /// Builds the descriptor for `id`, returning the alias alongside it.
  pub fn to_descriptor(&self, id: &str) -> (ServiceDescriptor, Option<String>) {
    let class = self.class.as_deref().unwrap_or(id);
    let mut descriptor = ServiceDescriptor::new(id, class)
      .with_priority(self.priority)
      .singleton(self.singleton)
      .with_arguments(self.arguments.clone());
    if let Some(interface) = &self.implements {
      descriptor = descriptor.implements(interface.as_str());
    }
    if let Some(group) = &self.group {
      descriptor = descriptor.in_group(group.as_str());
    }
    for tag in &self.tags {
      descriptor = descriptor.tagged(tag.as_str());
    }
    (descriptor, self.alias.clone())
  }
}

/// A parsed configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesConfig {
  #[serde(default, deserialize_with = "ordered_services")]
  services: Vec<(String, ServiceEntry)>,
}

impl ServicesConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends an entry. Later entries register after earlier ones.
  pub fn with_service(mut self, id: impl Into<String>, entry: ServiceEntry) -> Self {
    self.services.push((id.into(), entry));
    self
  }

  pub fn from_yaml_str(source: &str) -> Result<Self> {
    serde_yaml::from_str(source).map_err(|e| Error::Configuration(format!("invalid YAML services document: {}", e)))
  }

  pub fn from_json_str(source: &str) -> Result<Self> {
    serde_json::from_str(source).map_err(|e| Error::Configuration(format!("invalid JSON services document: {}", e)))
  }

  /// Reads a document from disk. `.json` files are parsed as JSON, anything
  /// else as YAML.
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)?;
    let is_json = path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
      Self::from_json_str(&source)
    } else {
      Self::from_yaml_str(&source)
    }
  }

  /// Entries in document order.
  pub fn services(&self) -> impl Iterator<Item = (&str, &ServiceEntry)> + '_ {
    self.services.iter().map(|(id, entry)| (id.as_str(), entry))
  }

  pub fn len(&self) -> usize {
    self.services.len()
  }

  pub fn is_empty(&self) -> bool {
    self.services.is_empty()
  }

  /// Descriptors and aliases for every entry, in document order.
  pub fn descriptors(&self) -> Vec<(ServiceDescriptor, Option<String>)> {
    self
      .services
      .iter()
      .map(|(id, entry)| entry.to_descriptor(id))
      .collect()
  }
}

// Keeps map entries in document order; `null` or an empty body yields
// default entry fields.
fn ordered_services<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, ServiceEntry)>, D::Error>
where
  D: Deserializer<'de>,
{
  struct OrderedVisitor;

  impl<'de> Visitor<'de> for OrderedVisitor {
    type Value = Vec<(String, ServiceEntry)>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
      f.write_str("a map of service ids to service definitions")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
      Ok(Vec::new())
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
      Ok(Vec::new())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
      let mut services = Vec::with_capacity(map.size_hint().unwrap_or(0));
      while let Some((id, entry)) = map.next_entry::<String, Option<ServiceEntry>>()? {
        if services.iter().any(|(existing, _): &(String, ServiceEntry)| *existing == id) {
          return Err(de::Error::custom(format!("service '{}' is defined twice", id)));
        }
        services.push((id, entry.unwrap_or_default()));
      }
      Ok(services)
    }
  }

  deserializer.deserialize_any(OrderedVisitor)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_entry_uses_defaults() {
    let config = ServicesConfig::from_yaml_str("services:\n  app.clock:\n").unwrap();
    let (descriptor, alias) = config.descriptors().remove(0);
    assert_eq!(descriptor.id(), "app.clock");
    assert_eq!(descriptor.implementation(), "app.clock");
    assert!(descriptor.is_singleton());
    assert_eq!(alias, None);
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let err = ServicesConfig::from_json_str(r#"{"services": {"a": {"klass": "A"}}}"#).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
  }

  #[test]
  fn repeated_ids_are_rejected() {
    let err = ServicesConfig::from_yaml_str("services:\n  a: {class: A}\n  a: {class: B}\n").unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
  }
}
