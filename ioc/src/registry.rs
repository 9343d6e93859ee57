//! The descriptor table and its alias, group, tag and ordering indices.

use crate::descriptor::ServiceDescriptor;
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What to do when a descriptor id is registered a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
  /// Fail with [`Error::DuplicateService`].
  #[default]
  Reject,
  /// Replace the previous descriptor; the last write wins.
  Replace,
}

/// Result of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
  Added,
  Replaced,
}

/// The fact base: every registered descriptor and the indices over them.
///
/// Each descriptor is stored under its id and its implementation type name,
/// and, when it declares an interface, under the interface name as well.
/// Interface and implementation keys are shared: they point at the most
/// recent descriptor that claimed them, unless the key is itself the id of a
/// registered descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRegistry {
  services: BTreeMap<String, Arc<ServiceDescriptor>>,
  #[serde(default)]
  aliases: BTreeMap<String, String>,
  #[serde(default)]
  groups: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  tags: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  order: Vec<String>,
}

fn push_index(index: &mut BTreeMap<String, Vec<String>>, bucket: &str, key: &str) {
  index.entry(bucket.to_owned()).or_default().push(key.to_owned());
}

fn remove_index(index: &mut BTreeMap<String, Vec<String>>, bucket: &str, key: &str) {
  if let Some(keys) = index.get_mut(bucket) {
    if let Some(pos) = keys.iter().position(|k| k == key) {
      keys.remove(pos);
    }
    if keys.is_empty() {
      index.remove(bucket);
    }
  }
}

impl ServiceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts a descriptor and updates every index.
  pub fn register(
    &mut self,
    descriptor: ServiceDescriptor,
    alias: Option<&str>,
    policy: DuplicatePolicy,
  ) -> Result<Registration> {
    validate(&descriptor, alias)?;
    let id = descriptor.id().to_owned();

    let outcome = if self.is_registered(&id) {
      if policy == DuplicatePolicy::Reject {
        return Err(Error::DuplicateService(id));
      }
      self.unlink(&id);
      Registration::Replaced
    } else {
      self.order.push(id.clone());
      Registration::Added
    };

    let descriptor = Arc::new(descriptor);
    self.services.insert(id.clone(), descriptor.clone());
    if descriptor.implementation() != id {
      self.claim(descriptor.implementation(), &descriptor);
    }

    if let Some(group) = descriptor.group() {
      push_index(&mut self.groups, group, &id);
    }
    for tag in descriptor.tags() {
      push_index(&mut self.tags, tag, &id);
    }

    if let Some(interface) = descriptor.interface() {
      self.claim(interface, &descriptor);
      if let Some(group) = descriptor.group() {
        push_index(&mut self.groups, group, interface);
      }
      for tag in descriptor.tags() {
        push_index(&mut self.tags, tag, interface);
      }
    }

    if let Some(alias) = alias {
      self.aliases.insert(alias.to_owned(), id);
    }

    Ok(outcome)
  }

  // Points a shared key at `descriptor`. A key that is some descriptor's own
  // id stays with that descriptor.
  fn claim(&mut self, key: &str, descriptor: &Arc<ServiceDescriptor>) {
    if !self.is_registered(key) {
      self.services.insert(key.to_owned(), descriptor.clone());
    }
  }

  /// Removes a descriptor, its shared keys, its index entries, its place in
  /// the registration order and the aliases that point at it.
  pub(crate) fn remove(&mut self, id: &str) {
    if !self.is_registered(id) {
      return;
    }
    self.unlink(id);
    self.order.retain(|entry| entry != id);
    self.aliases.retain(|_, target| target != id);
  }

  // Drops every key and index entry contributed by `id`, keeping its slot in
  // the registration order. Shared keys it held fall back to the most recent
  // remaining descriptor that claims them.
  fn unlink(&mut self, id: &str) {
    let Some(old) = self.services.get(id).cloned() else {
      return;
    };
    self.services.retain(|_, descriptor| descriptor.id() != id);

    if let Some(group) = old.group() {
      remove_index(&mut self.groups, group, id);
      if let Some(interface) = old.interface() {
        remove_index(&mut self.groups, group, interface);
      }
    }
    for tag in old.tags() {
      remove_index(&mut self.tags, tag, id);
      if let Some(interface) = old.interface() {
        remove_index(&mut self.tags, tag, interface);
      }
    }

    let latest_claiming = |registry: &Self, claims: &dyn Fn(&ServiceDescriptor) -> bool| {
      registry
        .order
        .iter()
        .rev()
        .filter(|entry| entry.as_str() != id)
        .filter_map(|entry| registry.services.get(entry))
        .find(|descriptor| claims(descriptor))
        .cloned()
    };

    if let Some(interface) = old.interface().filter(|i| !self.services.contains_key(*i)) {
      if let Some(next) = latest_claiming(self, &|d| d.interface() == Some(interface)) {
        self.services.insert(interface.to_owned(), next);
      }
    }
    let implementation = old.implementation();
    if implementation != id && !self.services.contains_key(implementation) {
      if let Some(next) = latest_claiming(self, &|d| d.implementation() == implementation) {
        self.services.insert(implementation.to_owned(), next);
      }
    }
  }

  /// Empties the table and every index.
  pub fn clear(&mut self) {
    *self = Self::default();
  }

  // --- Queries ---

  /// True if `id` was registered as a descriptor id (not merely as a shared
  /// interface or implementation key).
  pub fn is_registered(&self, id: &str) -> bool {
    self.services.get(id).is_some_and(|d| d.id() == id)
  }

  /// True if `key` is a descriptor key or a known alias.
  pub fn contains(&self, key: &str) -> bool {
    self.services.contains_key(key) || self.aliases.contains_key(key)
  }

  /// Follows the alias table once.
  pub fn canonical<'a>(&'a self, key: &'a str) -> &'a str {
    self.aliases.get(key).map_or(key, String::as_str)
  }

  /// The descriptor stored under `key`, after alias resolution.
  pub fn descriptor(&self, key: &str) -> Result<Arc<ServiceDescriptor>> {
    let canonical = self.canonical(key);
    match self.services.get(canonical) {
      Some(descriptor) => Ok(descriptor.clone()),
      None if self.is_interface_name(canonical) => Err(Error::not_found(format!(
        "no implementation found for interface '{}'",
        canonical
      ))),
      None => Err(Error::not_found(format!("service '{}' not found", canonical))),
    }
  }

  /// True if any registered descriptor declares `key` as its interface.
  pub fn is_interface_name(&self, key: &str) -> bool {
    self.descriptors().any(|d| d.interface() == Some(key))
  }

  /// Candidates for a filtered lookup, in registration order.
  ///
  /// An interface key yields every descriptor declaring that interface; any
  /// other key yields the single descriptor stored under it.
  pub fn candidates(&self, key: &str, group: Option<&str>, tag: Option<&str>) -> Vec<Arc<ServiceDescriptor>> {
    let canonical = self.canonical(key);
    let pool: Vec<Arc<ServiceDescriptor>> = if self.is_interface_name(canonical) {
      self
        .descriptors()
        .filter(|d| d.interface() == Some(canonical))
        .cloned()
        .collect()
    } else {
      self.services.get(canonical).cloned().into_iter().collect()
    };

    pool
      .into_iter()
      .filter(|d| group.map_or(true, |g| d.group() == Some(g)))
      .filter(|d| tag.map_or(true, |t| d.has_tag(t)))
      .collect()
  }

  /// Picks the highest-priority candidate; ties go to the earliest
  /// registered.
  pub fn select(&self, key: &str, group: Option<&str>, tag: Option<&str>) -> Result<Arc<ServiceDescriptor>> {
    let mut selected: Option<Arc<ServiceDescriptor>> = None;
    for candidate in self.candidates(key, group, tag) {
      let better = selected
        .as_ref()
        .map_or(true, |current| candidate.priority() > current.priority());
      if better {
        selected = Some(candidate);
      }
    }
    selected.ok_or_else(|| {
      Error::not_found(format!(
        "no service found for '{}' with group '{}' and tag '{}'",
        key,
        group.unwrap_or("any"),
        tag.unwrap_or("any")
      ))
    })
  }

  /// Current descriptors, one per id, in registration order.
  pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> + '_ {
    self
      .order
      .iter()
      .filter_map(move |id| self.services.get(id).filter(|d| d.id() == id))
  }

  /// Every key in the table: ids, implementation keys and interface keys.
  pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
    self.services.keys().map(String::as_str)
  }

  pub fn group(&self, group: &str) -> &[String] {
    self.groups.get(group).map_or(&[], Vec::as_slice)
  }

  pub fn tag(&self, tag: &str) -> &[String] {
    self.tags.get(tag).map_or(&[], Vec::as_slice)
  }

  pub fn order(&self) -> &[String] {
    &self.order
  }

  pub fn aliases(&self) -> &BTreeMap<String, String> {
    &self.aliases
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// A copy without factory-backed descriptors, which cannot be persisted.
  pub(crate) fn without_factories(&self) -> Self {
    let mut copy = self.clone();
    let factory_ids: Vec<String> = self
      .descriptors()
      .filter(|d| d.has_factory())
      .map(|d| d.id().to_owned())
      .collect();
    for id in factory_ids {
      copy.remove(&id);
    }
    copy
  }

  pub(crate) fn first_factory(&self) -> Option<&str> {
    self.descriptors().find(|d| d.has_factory()).map(|d| d.id())
  }
}

fn validate(descriptor: &ServiceDescriptor, alias: Option<&str>) -> Result<()> {
  if descriptor.id().is_empty() {
    return Err(Error::Configuration("service id must not be empty".to_owned()));
  }
  if descriptor.implementation().is_empty() {
    return Err(Error::Configuration(format!(
      "service '{}' does not name an implementation type",
      descriptor.id()
    )));
  }
  if alias == Some(descriptor.id()) {
    return Err(Error::Configuration(format!(
      "alias '{}' cannot point to itself",
      descriptor.id()
    )));
  }
  Ok(())
}
