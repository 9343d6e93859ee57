use fibre_di::{Blueprint, Container, ServiceDescriptor};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

// A simple service that gets a unique ID upon creation.
struct RequestTracker {
  id: usize,
}

static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn main() -> fibre_di::Result<()> {
  let container = Container::new();

  container.define(Blueprint::new("app::RequestTracker", |_| {
    println!("Creating RequestTracker...");
    Ok(RequestTracker {
      id: ID_COUNTER.fetch_add(1, Ordering::SeqCst),
    })
  }));

  // --- Lifecycles ---
  // The singleton is built once; the transient on every resolution.
  container.register(ServiceDescriptor::new("singleton_tracker", "app::RequestTracker"))?;
  container.register(ServiceDescriptor::new("transient_tracker", "app::RequestTracker").transient())?;

  println!("--- Resolving Singletons ---");
  let s1 = container.resolve_as::<RequestTracker>("singleton_tracker")?;
  let s2 = container.resolve_as::<RequestTracker>("singleton_tracker")?;
  println!("Singleton 1 ID: {}, Singleton 2 ID: {}", s1.id, s2.id);
  assert!(Arc::ptr_eq(&s1, &s2), "Singleton instances should be identical");

  println!("--- Resolving Transients ---");
  let t1 = container.resolve_as::<RequestTracker>("transient_tracker")?;
  let t2 = container.resolve_as::<RequestTracker>("transient_tracker")?;
  println!("Transient 1 ID: {}, Transient 2 ID: {}", t1.id, t2.id);
  assert!(!Arc::ptr_eq(&t1, &t2), "Transient instances should be different");

  Ok(())
}
