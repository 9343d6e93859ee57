//! Service descriptors and their construction arguments.

use crate::container::Container;
use crate::error::Result;
use crate::instance::Instance;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A closure that produces a service instance without parameter binding.
pub type FactoryFn = Arc<dyn Fn(&Container) -> Result<Instance> + Send + Sync>;

/// One construction argument: a literal value or a reference to another
/// service, written `"@service.id"` in configuration documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
  Literal(Value),
  Reference(String),
}

impl Argument {
  pub fn literal(value: impl Into<Value>) -> Self {
    Argument::from_value(value.into())
  }

  pub fn reference(id: impl Into<String>) -> Self {
    Argument::Reference(id.into())
  }

  /// Interprets a raw value, turning `"@id"` strings into references.
  pub fn from_value(value: Value) -> Self {
    match value {
      Value::String(s) if s.starts_with('@') => Argument::Reference(s[1..].to_owned()),
      other => Argument::Literal(other),
    }
  }

  fn to_value(&self) -> Value {
    match self {
      Argument::Literal(value) => value.clone(),
      Argument::Reference(id) => Value::String(format!("@{}", id)),
    }
  }
}

impl fmt::Display for Argument {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Argument::Literal(Value::String(s)) => f.write_str(s),
      Argument::Literal(value) => write!(f, "{}", value),
      Argument::Reference(id) => write!(f, "@{}", id),
    }
  }
}

impl Serialize for Argument {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Argument {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    Value::deserialize(deserializer).map(Argument::from_value)
  }
}

/// Named and positional construction arguments.
///
/// Named entries take precedence over positional ones during binding; a
/// positional entry is consumed by the first parameter that has no named
/// entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
  named: BTreeMap<String, Argument>,
  positional: BTreeMap<usize, Argument>,
}

impl Arguments {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn named(mut self, name: impl Into<String>, argument: Argument) -> Self {
    self.named.insert(name.into(), argument);
    self
  }

  pub fn at(mut self, index: usize, argument: Argument) -> Self {
    self.positional.insert(index, argument);
    self
  }

  /// Appends a positional argument after the highest existing position.
  pub fn push(mut self, argument: Argument) -> Self {
    let next = self.positional.keys().next_back().map_or(0, |last| last + 1);
    self.positional.insert(next, argument);
    self
  }

  pub fn get_named(&self, name: &str) -> Option<&Argument> {
    self.named.get(name)
  }

  pub fn get_positional(&self, index: usize) -> Option<&Argument> {
    self.positional.get(&index)
  }

  pub fn is_empty(&self) -> bool {
    self.named.is_empty() && self.positional.is_empty()
  }

  pub fn len(&self) -> usize {
    self.named.len() + self.positional.len()
  }

  /// Renders every argument for event payloads, positional ones first.
  pub(crate) fn formatted(&self) -> Vec<String> {
    self
      .positional
      .values()
      .chain(self.named.values())
      .map(ToString::to_string)
      .collect()
  }
}

impl Serialize for Arguments {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.len()))?;
    for (index, argument) in &self.positional {
      map.serialize_entry(index, argument)?;
    }
    for (name, argument) in &self.named {
      map.serialize_entry(name, argument)?;
    }
    map.end()
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArgumentKey {
  Index(usize),
  Name(String),
}

struct ArgumentsVisitor;

impl<'de> Visitor<'de> for ArgumentsVisitor {
  type Value = Arguments;

  fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str("a map of argument names or positions, or a list of positional arguments")
  }

  fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Arguments, A::Error> {
    let mut arguments = Arguments::new();
    while let Some((key, argument)) = access.next_entry::<ArgumentKey, Argument>()? {
      match key {
        ArgumentKey::Index(index) => {
          arguments.positional.insert(index, argument);
        }
        // JSON object keys are always strings.
        ArgumentKey::Name(name) => match name.parse::<usize>() {
          Ok(index) => {
            arguments.positional.insert(index, argument);
          }
          Err(_) => {
            arguments.named.insert(name, argument);
          }
        },
      }
    }
    Ok(arguments)
  }

  fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Arguments, A::Error> {
    let mut arguments = Arguments::new();
    let mut index = 0;
    while let Some(argument) = access.next_element::<Argument>()? {
      arguments.positional.insert(index, argument);
      index += 1;
    }
    Ok(arguments)
  }

  fn visit_unit<E: de::Error>(self) -> Result<Arguments, E> {
    Ok(Arguments::new())
  }
}

impl<'de> Deserialize<'de> for Arguments {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    deserializer.deserialize_any(ArgumentsVisitor)
  }
}

fn default_singleton() -> bool {
  true
}

/// Describes how to construct or obtain one named service.
///
/// A descriptor names its implementation type by string; the matching
/// [`Blueprint`](crate::Blueprint) is looked up in the container's
/// [`TypeCatalog`](crate::TypeCatalog) at construction time, so descriptors
/// can be loaded from configuration, a cache or a compiled snapshot.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
  id: String,
  #[serde(rename = "class")]
  implementation: String,
  #[serde(rename = "implements", default)]
  interface: Option<String>,
  #[serde(default)]
  group: Option<String>,
  #[serde(default)]
  tags: Vec<String>,
  #[serde(default)]
  priority: i32,
  #[serde(default = "default_singleton")]
  singleton: bool,
  #[serde(default)]
  arguments: Arguments,
  #[serde(skip)]
  factory: Option<FactoryFn>,
}

impl ServiceDescriptor {
  /// A singleton descriptor with priority 0 and no arguments.
  pub fn new(id: impl Into<String>, implementation: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      implementation: implementation.into(),
      interface: None,
      group: None,
      tags: Vec::new(),
      priority: 0,
      singleton: true,
      arguments: Arguments::new(),
      factory: None,
    }
  }

  pub(crate) fn with_factory(id: impl Into<String>, implementation: impl Into<String>, factory: FactoryFn) -> Self {
    let mut descriptor = Self::new(id, implementation);
    descriptor.factory = Some(factory);
    descriptor
  }

  // --- Builder ---

  pub fn implements(mut self, interface: impl Into<String>) -> Self {
    self.interface = Some(interface.into());
    self
  }

  pub fn in_group(mut self, group: impl Into<String>) -> Self {
    self.group = Some(group.into());
    self
  }

  pub fn tagged(mut self, tag: impl Into<String>) -> Self {
    self.tags.push(tag.into());
    self
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  pub fn singleton(mut self, singleton: bool) -> Self {
    self.singleton = singleton;
    self
  }

  pub fn transient(self) -> Self {
    self.singleton(false)
  }

  pub fn with_argument(mut self, name: impl Into<String>, argument: Argument) -> Self {
    self.arguments = self.arguments.named(name, argument);
    self
  }

  pub fn with_arguments(mut self, arguments: Arguments) -> Self {
    self.arguments = arguments;
    self
  }

  // --- Accessors ---

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn implementation(&self) -> &str {
    &self.implementation
  }

  pub fn interface(&self) -> Option<&str> {
    self.interface.as_deref()
  }

  pub fn group(&self) -> Option<&str> {
    self.group.as_deref()
  }

  pub fn tags(&self) -> &[String] {
    &self.tags
  }

  pub fn has_tag(&self, tag: &str) -> bool {
    self.tags.iter().any(|t| t == tag)
  }

  pub fn priority(&self) -> i32 {
    self.priority
  }

  pub fn is_singleton(&self) -> bool {
    self.singleton
  }

  pub fn arguments(&self) -> &Arguments {
    &self.arguments
  }

  pub fn has_factory(&self) -> bool {
    self.factory.is_some()
  }

  pub(crate) fn factory(&self) -> Option<&FactoryFn> {
    self.factory.as_ref()
  }
}

impl fmt::Debug for ServiceDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServiceDescriptor")
      .field("id", &self.id)
      .field("implementation", &self.implementation)
      .field("interface", &self.interface)
      .field("group", &self.group)
      .field("tags", &self.tags)
      .field("priority", &self.priority)
      .field("singleton", &self.singleton)
      .field("arguments", &self.arguments)
      .field("factory", &self.factory.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn at_prefixed_strings_become_references() {
    assert_eq!(Argument::literal("@primary.db"), Argument::reference("primary.db"));
    assert_eq!(Argument::literal("plain"), Argument::Literal(json!("plain")));
  }

  #[test]
  fn arguments_accept_mixed_keys() {
    let args: Arguments = serde_json::from_value(json!({"0": "@db", "table": "users", "1": 5})).unwrap();
    assert_eq!(args.get_positional(0), Some(&Argument::reference("db")));
    assert_eq!(args.get_positional(1), Some(&Argument::literal(5)));
    assert_eq!(args.get_named("table"), Some(&Argument::literal("users")));
  }

  #[test]
  fn arguments_accept_a_list() {
    let args: Arguments = serde_yaml::from_str("- '@db'\n- 3\n").unwrap();
    assert_eq!(args.get_positional(0), Some(&Argument::reference("db")));
    assert_eq!(args.get_positional(1), Some(&Argument::literal(3)));
  }

  #[test]
  fn descriptor_defaults_from_minimal_document() {
    let descriptor: ServiceDescriptor =
      serde_json::from_value(json!({"id": "mailer", "class": "app::Mailer"})).unwrap();
    assert!(descriptor.is_singleton());
    assert_eq!(descriptor.priority(), 0);
    assert!(descriptor.arguments().is_empty());
    assert!(!descriptor.has_factory());
  }
}
