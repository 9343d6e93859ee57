//! Registration and resolution notifications.

use crate::instance::Instance;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Emitted after a descriptor is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistered {
  pub id: String,
  pub class: String,
  pub alias: Option<String>,
  pub group: Option<String>,
  pub tags: Vec<String>,
  pub singleton: bool,
  pub implements: Option<String>,
}

/// Emitted after a service is resolved.
#[derive(Debug, Clone)]
pub struct ServiceResolved {
  pub id: String,
  pub instance: Instance,
  pub from_cache: bool,
  /// The bound constructor arguments, rendered as strings.
  pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ContainerEvent {
  Registered(ServiceRegistered),
  Resolved(ServiceResolved),
}

impl ContainerEvent {
  pub const REGISTERED: &'static str = "service.registered";
  pub const RESOLVED: &'static str = "service.resolved";

  pub fn name(&self) -> &'static str {
    match self {
      ContainerEvent::Registered(_) => Self::REGISTERED,
      ContainerEvent::Resolved(_) => Self::RESOLVED,
    }
  }
}

/// Receives container events synchronously, in the order they occur.
///
/// Sinks run on the thread that registered or resolved the service and must
/// not block for long. `service.registered` events are delivered one at a
/// time, in the order the registrations were applied, even when several
/// threads register concurrently.
pub trait EventSink: Send + Sync {
  fn on_event(&self, event: &ContainerEvent);
}

impl<F> EventSink for F
where
  F: Fn(&ContainerEvent) + Send + Sync,
{
  fn on_event(&self, event: &ContainerEvent) {
    self(event)
  }
}

type Listener = Arc<dyn Fn(&ContainerEvent) + Send + Sync>;

/// Identifies a listener added to an [`EventDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
  id: ListenerId,
  priority: i32,
  listener: Listener,
}

/// An [`EventSink`] that routes events by name to prioritized listeners.
///
/// Listeners with a higher priority run first; equal priorities run in the
/// order they were added.
#[derive(Default)]
pub struct EventDispatcher {
  listeners: RwLock<HashMap<&'static str, Vec<ListenerEntry>>>,
  next_id: AtomicU64,
}

impl EventDispatcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_listener<F>(&self, event_name: &'static str, priority: i32, listener: F) -> ListenerId
  where
    F: Fn(&ContainerEvent) + Send + Sync + 'static,
  {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let mut listeners = self.listeners.write();
    let entries = listeners.entry(event_name).or_default();
    entries.push(ListenerEntry {
      id,
      priority,
      listener: Arc::new(listener),
    });
    // Stable sort keeps insertion order among equal priorities.
    entries.sort_by(|a, b| b.priority.cmp(&a.priority));
    id
  }

  /// Removes a listener. Returns false if it was not registered for the name.
  pub fn remove_listener(&self, event_name: &str, id: ListenerId) -> bool {
    let mut listeners = self.listeners.write();
    let Some(entries) = listeners.get_mut(event_name) else {
      return false;
    };
    let before = entries.len();
    entries.retain(|entry| entry.id != id);
    let removed = entries.len() != before;
    if entries.is_empty() {
      listeners.remove(event_name);
    }
    removed
  }

  pub fn has_listeners(&self, event_name: &str) -> bool {
    self
      .listeners
      .read()
      .get(event_name)
      .is_some_and(|entries| !entries.is_empty())
  }

  pub fn dispatch(&self, event: &ContainerEvent) {
    // Listeners run outside the lock so they may add or remove listeners.
    let listeners: Vec<Listener> = match self.listeners.read().get(event.name()) {
      Some(entries) => entries.iter().map(|entry| entry.listener.clone()).collect(),
      None => return,
    };
    for listener in listeners {
      listener(event);
    }
  }
}

impl EventSink for EventDispatcher {
  fn on_event(&self, event: &ContainerEvent) {
    self.dispatch(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;

  fn registered(id: &str) -> ContainerEvent {
    ContainerEvent::Registered(ServiceRegistered {
      id: id.to_owned(),
      class: id.to_owned(),
      alias: None,
      group: None,
      tags: Vec::new(),
      singleton: true,
      implements: None,
    })
  }

  #[test]
  fn listeners_run_by_descending_priority() {
    let dispatcher = EventDispatcher::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for (label, priority) in [("low", -1), ("high", 10), ("mid", 0), ("mid2", 0)] {
      let seen = seen.clone();
      dispatcher.add_listener(ContainerEvent::REGISTERED, priority, move |_| {
        seen.lock().push(label);
      });
    }

    dispatcher.dispatch(&registered("a"));
    assert_eq!(*seen.lock(), vec!["high", "mid", "mid2", "low"]);
  }

  #[test]
  fn removed_listeners_stop_receiving_events() {
    let dispatcher = EventDispatcher::new();
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    let id = dispatcher.add_listener(ContainerEvent::REGISTERED, 0, move |_| {
      *counter.lock() += 1;
    });

    dispatcher.dispatch(&registered("a"));
    assert!(dispatcher.remove_listener(ContainerEvent::REGISTERED, id));
    assert!(!dispatcher.has_listeners(ContainerEvent::REGISTERED));
    dispatcher.dispatch(&registered("b"));

    assert_eq!(*count.lock(), 1);
  }
}
