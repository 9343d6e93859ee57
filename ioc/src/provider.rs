//! Service providers and their dependency ordering.

use crate::container::Container;
use crate::error::{Error, Result};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// A unit that registers a batch of services and later initializes them.
///
/// Providers run in two phases: every provider's [`register`] runs before any
/// provider's [`boot`], so `boot` may resolve services registered by any
/// provider.
///
/// [`register`]: ServiceProvider::register
/// [`boot`]: ServiceProvider::boot
pub trait ServiceProvider: Send + Sync {
  /// The name other providers use to depend on this one. Defaults to the
  /// full type name.
  fn name(&self) -> &str {
    std::any::type_name::<Self>()
  }

  /// Ordering hint among providers whose dependencies are satisfied. Higher
  /// runs first.
  fn priority(&self) -> i32 {
    0
  }

  /// Names of providers that must run before this one.
  fn dependencies(&self) -> Vec<String> {
    Vec::new()
  }

  fn register(&self, container: &Container) -> Result<()>;

  fn boot(&self, _container: &Container) -> Result<()> {
    Ok(())
  }
}

struct ProviderEntry {
  seq: usize,
  provider: Arc<dyn ServiceProvider>,
  registered: bool,
  booted: bool,
}

/// Providers kept in execution order.
#[derive(Default)]
pub(crate) struct ProviderSet {
  entries: Vec<ProviderEntry>,
  next_seq: usize,
}

impl ProviderSet {
  /// Adds a provider and re-orders the set. On a dependency cycle the set is
  /// left as it was.
  pub(crate) fn add(&mut self, provider: Arc<dyn ServiceProvider>) -> Result<()> {
    self.entries.push(ProviderEntry {
      seq: self.next_seq,
      provider,
      registered: false,
      booted: false,
    });

    let order = match execution_order(&self.entries) {
      Ok(order) => order,
      Err(e) => {
        self.entries.pop();
        return Err(e);
      }
    };
    self.next_seq += 1;

    let mut slots: Vec<Option<ProviderEntry>> = self.entries.drain(..).map(Some).collect();
    self.entries = order.into_iter().filter_map(|i| slots[i].take()).collect();
    Ok(())
  }

  /// Providers that have not run `register` yet, keyed by their sequence
  /// number.
  pub(crate) fn pending_registration(&self) -> Vec<(usize, Arc<dyn ServiceProvider>)> {
    self
      .entries
      .iter()
      .filter(|entry| !entry.registered)
      .map(|entry| (entry.seq, entry.provider.clone()))
      .collect()
  }

  pub(crate) fn pending_boot(&self) -> Vec<(usize, Arc<dyn ServiceProvider>)> {
    self
      .entries
      .iter()
      .filter(|entry| entry.registered && !entry.booted)
      .map(|entry| (entry.seq, entry.provider.clone()))
      .collect()
  }

  pub(crate) fn mark_registered(&mut self, seq: usize) {
    if let Some(entry) = self.entries.iter_mut().find(|entry| entry.seq == seq) {
      entry.registered = true;
    }
  }

  pub(crate) fn mark_booted(&mut self, seq: usize) {
    if let Some(entry) = self.entries.iter_mut().find(|entry| entry.seq == seq) {
      entry.booted = true;
    }
  }

  pub(crate) fn names(&self) -> Vec<String> {
    self
      .entries
      .iter()
      .map(|entry| entry.provider.name().to_owned())
      .collect()
  }
}

// Kahn's algorithm. Among providers whose dependencies have all been placed,
// the highest priority goes next, then the earliest added. Dependencies on
// names no provider carries are ignored.
fn execution_order(entries: &[ProviderEntry]) -> Result<Vec<usize>> {
  let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
  for (index, entry) in entries.iter().enumerate() {
    by_name.entry(entry.provider.name()).or_default().push(index);
  }

  let mut requires: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
  let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
  for (index, entry) in entries.iter().enumerate() {
    for dependency in entry.provider.dependencies() {
      for &target in by_name.get(dependency.as_str()).into_iter().flatten() {
        requires[index].push(target);
        dependents[target].push(index);
      }
    }
  }

  let mut waiting: Vec<usize> = requires.iter().map(Vec::len).collect();
  let mut ready = BinaryHeap::new();
  for (index, entry) in entries.iter().enumerate() {
    if waiting[index] == 0 {
      ready.push((entry.provider.priority(), Reverse(entry.seq), index));
    }
  }

  let mut order = Vec::with_capacity(entries.len());
  while let Some((_, _, index)) = ready.pop() {
    order.push(index);
    for &dependent in &dependents[index] {
      waiting[dependent] -= 1;
      if waiting[dependent] == 0 {
        let entry = &entries[dependent];
        ready.push((entry.provider.priority(), Reverse(entry.seq), dependent));
      }
    }
  }

  if order.len() == entries.len() {
    return Ok(order);
  }
  Err(Error::ProviderCycle {
    chain: cycle_chain(entries, &requires, &waiting),
  })
}

// Walks unplaced providers along their unplaced dependencies until one
// repeats, then reports the loop.
fn cycle_chain(entries: &[ProviderEntry], requires: &[Vec<usize>], waiting: &[usize]) -> String {
  let stuck = |index: usize| waiting[index] > 0;
  let Some(start) = (0..entries.len()).filter(|&i| stuck(i)).min_by_key(|&i| entries[i].seq) else {
    return String::new();
  };

  let mut path = vec![start];
  let mut current = start;
  loop {
    let Some(&next) = requires[current].iter().find(|&&dep| stuck(dep)) else {
      break;
    };
    if let Some(pos) = path.iter().position(|&i| i == next) {
      let mut names: Vec<&str> = path[pos..].iter().map(|&i| entries[i].provider.name()).collect();
      names.push(entries[next].provider.name());
      return names.join(" -> ");
    }
    path.push(next);
    current = next;
  }
  path
    .iter()
    .map(|&i| entries[i].provider.name())
    .collect::<Vec<_>>()
    .join(" -> ")
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Named {
    name: &'static str,
    priority: i32,
    dependencies: &'static [&'static str],
  }

  impl ServiceProvider for Named {
    fn name(&self) -> &str {
      self.name
    }

    fn priority(&self) -> i32 {
      self.priority
    }

    fn dependencies(&self) -> Vec<String> {
      self.dependencies.iter().map(|d| d.to_string()).collect()
    }

    fn register(&self, _container: &Container) -> Result<()> {
      Ok(())
    }
  }

  fn named(name: &'static str, priority: i32, dependencies: &'static [&'static str]) -> Arc<dyn ServiceProvider> {
    Arc::new(Named {
      name,
      priority,
      dependencies,
    })
  }

  #[test]
  fn dependencies_beat_priority() {
    let mut set = ProviderSet::default();
    set.add(named("late", 100, &["early"])).unwrap();
    set.add(named("early", -5, &[])).unwrap();
    set.add(named("other", 50, &[])).unwrap();
    assert_eq!(set.names(), vec!["other", "early", "late"]);
  }

  #[test]
  fn equal_priorities_keep_insertion_order() {
    let mut set = ProviderSet::default();
    for name in ["a", "b", "c"] {
      set.add(named(name, 0, &[])).unwrap();
    }
    assert_eq!(set.names(), vec!["a", "b", "c"]);
  }

  #[test]
  fn cycle_is_rejected_and_set_is_unchanged() {
    let mut set = ProviderSet::default();
    set.add(named("a", 0, &["c"])).unwrap();
    set.add(named("b", 0, &["a"])).unwrap();

    let err = set.add(named("c", 0, &["b"])).unwrap_err();
    match err {
      Error::ProviderCycle { chain } => assert_eq!(chain, "a -> c -> b -> a"),
      other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(set.names(), vec!["a", "b"]);
  }

  #[test]
  fn pending_lists_track_phases() {
    let mut set = ProviderSet::default();
    set.add(named("a", 0, &[])).unwrap();
    let pending = set.pending_registration();
    assert_eq!(pending.len(), 1);
    assert!(set.pending_boot().is_empty());

    set.mark_registered(pending[0].0);
    assert!(set.pending_registration().is_empty());
    assert_eq!(set.pending_boot().len(), 1);

    set.mark_booted(pending[0].0);
    assert!(set.pending_boot().is_empty());
  }
}
