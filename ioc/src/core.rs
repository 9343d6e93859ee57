//! Core, non-public bookkeeping for resolution: the per-thread resolution
//! stack, the container identity it is keyed by and the cross-thread table of
//! singletons under construction.

use crate::error::{Error, Result};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

static NEXT_CONTAINER_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
  // Ids currently under construction on this thread, tagged with the token of
  // the container that is building them. Several containers can share a
  // thread, so cycle detection only ever compares entries with equal tokens.
  static RESOLUTION_STACK: RefCell<Vec<(u64, String)>> = RefCell::new(Vec::new());
}

/// Returns a token unique to one container for the life of the process.
pub(crate) fn next_container_token() -> u64 {
  NEXT_CONTAINER_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// An RAII guard that records a service id on the resolution stack.
///
/// Entering an id that is already on the stack for the same container fails
/// with [`Error::CircularDependency`], reporting the full chain in the order
/// the ids were entered. Dropping the guard pops the entry, so the stack is
/// unwound on every exit path, including `?` propagation from nested
/// resolutions.
pub(crate) struct ResolutionGuard {
  owner: u64,
}

impl ResolutionGuard {
  pub(crate) fn enter(owner: u64, id: &str) -> Result<Self> {
    RESOLUTION_STACK.with(|stack| {
      let mut stack = stack.borrow_mut();
      let revisits = stack.iter().any(|(token, entry)| *token == owner && entry == id);
      if revisits {
        let mut chain: Vec<&str> = stack
          .iter()
          .filter(|(token, _)| *token == owner)
          .map(|(_, entry)| entry.as_str())
          .collect();
        chain.push(id);
        return Err(Error::CircularDependency {
          chain: chain.join(" -> "),
        });
      }
      stack.push((owner, id.to_owned()));
      Ok(Self { owner })
    })
  }
}

impl Drop for ResolutionGuard {
  fn drop(&mut self) {
    RESOLUTION_STACK.with(|stack| {
      let mut stack = stack.borrow_mut();
      // Guards nest strictly, so ours is the most recent entry for this owner.
      if let Some(pos) = stack.iter().rposition(|(token, _)| *token == self.owner) {
        stack.remove(pos);
      }
    });
  }
}

/// Snapshot of the ids under construction on this thread for one container.
pub(crate) fn current_stack(owner: u64) -> Vec<String> {
  RESOLUTION_STACK.with(|stack| {
    stack
      .borrow()
      .iter()
      .filter(|(token, _)| *token == owner)
      .map(|(_, entry)| entry.clone())
      .collect()
  })
}

/// Tracks which thread is building which singleton.
///
/// One thread builds a given id at a time and every other thread that wants
/// it waits. Before waiting, a thread follows the waits-for edges starting at
/// the builder; if they lead back to itself the threads are building each
/// other's dependencies and the wait fails with [`Error::CircularDependency`]
/// instead of blocking forever.
#[derive(Default)]
pub(crate) struct BuildTable {
  state: Mutex<BuildState>,
  finished: Condvar,
}

#[derive(Default)]
struct BuildState {
  next_attempt: u64,
  // id -> (builder, attempt)
  building: HashMap<String, (ThreadId, u64)>,
  // thread -> id it is blocked on
  waiting: HashMap<ThreadId, String>,
  // id -> (attempt, chain) of the last attempt that ended in a cycle
  cycles: HashMap<String, (u64, String)>,
}

impl BuildState {
  // Ids along the waits-for path from `from` to `to`, if there is one.
  fn path(&self, mut from: ThreadId, to: ThreadId) -> Option<Vec<String>> {
    let mut path = Vec::new();
    while from != to {
      let id = self.waiting.get(&from)?;
      path.push(id.clone());
      from = self.building.get(id)?.0;
    }
    Some(path)
  }
}

/// Outcome of [`BuildTable::claim`].
pub(crate) enum Claim<'a, T> {
  /// Another thread finished the value while we waited.
  Ready(T),
  /// The caller must build the value, then drop the ticket.
  Build(BuildTicket<'a>),
}

impl BuildTable {
  /// Returns the value in `cell`, or the right to build it.
  ///
  /// `owner` is the container token; the reported chain starts with this
  /// thread's resolution stack for that container.
  pub(crate) fn claim<T: Clone>(&self, owner: u64, id: &str, cell: &OnceCell<T>) -> Result<Claim<'_, T>> {
    let me = thread::current().id();
    let mut state = self.state.lock();
    loop {
      if let Some(value) = cell.get() {
        return Ok(Claim::Ready(value.clone()));
      }

      let Some(&(builder, attempt)) = state.building.get(id) else {
        let attempt = state.next_attempt;
        state.next_attempt += 1;
        state.building.insert(id.to_owned(), (me, attempt));
        return Ok(Claim::Build(BuildTicket {
          table: self,
          id: id.to_owned(),
          attempt,
          cycle: None,
        }));
      };

      if let Some(path) = state.path(builder, me) {
        let mut chain = current_stack(owner);
        chain.extend(path);
        return Err(Error::CircularDependency {
          chain: chain.join(" -> "),
        });
      }

      tracing::trace!(service.id = id, "waiting for singleton built on another thread");
      state.waiting.insert(me, id.to_owned());
      while state.building.get(id).is_some_and(|&(_, current)| current == attempt) {
        self.finished.wait(&mut state);
      }
      state.waiting.remove(&me);

      // The attempt we waited on was part of a cycle that includes us.
      if let Some((failed, chain)) = state.cycles.get(id) {
        if *failed == attempt {
          return Err(Error::CircularDependency { chain: chain.clone() });
        }
      }
    }
  }
}

/// The right to build one singleton. Dropping it wakes every waiter, so the
/// value must be stored in its cell first.
pub(crate) struct BuildTicket<'a> {
  table: &'a BuildTable,
  id: String,
  attempt: u64,
  cycle: Option<String>,
}

impl BuildTicket<'_> {
  /// Notes a cycle error so waiters on this attempt fail with it too.
  pub(crate) fn record<T>(&mut self, result: &Result<T>) {
    if let Err(Error::CircularDependency { chain }) = result {
      self.cycle = Some(chain.clone());
    }
  }
}

impl Drop for BuildTicket<'_> {
  fn drop(&mut self) {
    let mut state = self.table.state.lock();
    if state.building.get(&self.id).is_some_and(|&(_, current)| current == self.attempt) {
      state.building.remove(&self.id);
    }
    match self.cycle.take() {
      Some(chain) => {
        state.cycles.insert(self.id.clone(), (self.attempt, chain));
      }
      None => {
        state.cycles.remove(&self.id);
      }
    }
    drop(state);
    self.table.finished.notify_all();
  }
}
