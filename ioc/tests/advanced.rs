mod common;

use common::*;
use fibre_di::{Arguments, Blueprint, Container, Error, Instance, ServiceDescriptor, ServiceFactory, TypeCatalog};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

// --- Cycles ---

#[test]
fn test_two_node_cycle_reports_the_full_chain() {
  let container = container();
  container.register(node("A", "B")).unwrap();
  container.register(node("B", "A")).unwrap();

  match container.resolve("A").unwrap_err() {
    Error::CircularDependency { chain } => assert_eq!(chain, "A -> B -> A"),
    other => panic!("unexpected error: {other:?}"),
  }
}

#[test]
fn test_self_reference_is_a_cycle() {
  let container = container();
  container.register(node("loop", "loop")).unwrap();

  match container.resolve("loop").unwrap_err() {
    Error::CircularDependency { chain } => assert_eq!(chain, "loop -> loop"),
    other => panic!("unexpected error: {other:?}"),
  }
}

#[test]
fn test_failed_resolution_unwinds_the_stack() {
  let container = container();
  container.register(node("A", "B")).unwrap();
  container.register(node("B", "C")).unwrap();
  container.register(node("C", "missing")).unwrap();

  let err = container.resolve("A").unwrap_err();
  assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
  assert!(container.resolution_stack().is_empty());

  // A leaked entry would turn this into a bogus cycle.
  container.register(database("missing", "x")).unwrap();
  let a = container.resolve_as::<Node>("A").unwrap();
  assert_eq!(a.next.type_name(), NODE);
  assert!(container.resolution_stack().is_empty());
}

#[test]
fn test_stacks_are_per_container() {
  let outer = Arc::new(container());
  let inner = Arc::new(container());
  inner.register(database("shared", "inner")).unwrap();

  // The outer factory resolves an id with the same name in another
  // container while its own "shared" is on the stack.
  let nested = inner.clone();
  outer
    .register_factory("shared", move |_: &Container| {
      Ok(nested.resolve_as::<Database>("shared")?.dsn.clone())
    })
    .unwrap();

  assert_eq!(*outer.resolve_as::<String>("shared").unwrap(), "inner");
}

// --- Concurrency ---

#[test]
fn test_concurrent_first_access_constructs_once() {
  let counter = Arc::new(AtomicUsize::new(0));
  let catalog = catalog();
  define_counted(&catalog, counter.clone());
  let container = Arc::new(Container::builder().catalog(catalog).build());
  container
    .register(ServiceDescriptor::new("counted", COUNTED))
    .unwrap();

  let handles: Vec<_> = (0..16)
    .map(|_| {
      let container = container.clone();
      thread::spawn(move || container.resolve("counted").unwrap())
    })
    .collect();
  let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

  assert_eq!(counter.load(Ordering::SeqCst), 1);
  for instance in &instances[1..] {
    assert!(Instance::ptr_eq(&instances[0], instance));
  }
}

#[test]
fn test_concurrent_registration_and_resolution() {
  let container = Arc::new(container());
  container.register(database("primary.db", "postgres://shared")).unwrap();

  let handles: Vec<_> = (0..8)
    .map(|i| {
      let container = container.clone();
      thread::spawn(move || {
        let id = format!("users.{i}");
        container.register(user_repository(&id, "primary.db")).unwrap();
        container.resolve_as::<UserRepository>(&id).unwrap()
      })
    })
    .collect();

  let db = container.resolve_as::<Database>("primary.db").unwrap();
  for handle in handles {
    let users = handle.join().unwrap();
    assert!(Arc::ptr_eq(&users.db, &db));
  }
  assert_eq!(container.registration_order().len(), 9);
}

struct Left {
  right: Option<Instance>,
}

struct Right {
  left: Option<Instance>,
}

#[test]
fn test_cycle_split_across_threads_fails_instead_of_hanging() {
  // Both constructors meet at the barrier, so each thread is building its
  // own singleton when it asks for the other one.
  let barrier = Arc::new(Barrier::new(2));
  let catalog = TypeCatalog::new();
  let meet = barrier.clone();
  catalog.define(
    Blueprint::new("app::Left", move |_| {
      meet.wait();
      Ok(Left { right: None })
    })
    .inject("right", "svc.b", |left: &mut Left, right| {
      left.right = Some(right);
      Ok(())
    }),
  );
  let meet = barrier.clone();
  catalog.define(
    Blueprint::new("app::Right", move |_| {
      meet.wait();
      Ok(Right { left: None })
    })
    .inject("left", "svc.a", |right: &mut Right, left| {
      right.left = Some(left);
      Ok(())
    }),
  );
  let container = Arc::new(Container::builder().catalog(Arc::new(catalog)).build());
  container.register(ServiceDescriptor::new("svc.a", "app::Left")).unwrap();
  container.register(ServiceDescriptor::new("svc.b", "app::Right")).unwrap();

  let (tx, rx) = mpsc::channel();
  for id in ["svc.a", "svc.b"] {
    let container = container.clone();
    let tx = tx.clone();
    thread::spawn(move || {
      let _ = tx.send(container.resolve(id).map(|_| ()));
    });
  }

  for _ in 0..2 {
    let result = rx
      .recv_timeout(Duration::from_secs(5))
      .expect("resolution blocked on the other thread");
    match result {
      Err(Error::CircularDependency { chain }) => {
        assert!(
          chain == "svc.a -> svc.b -> svc.a" || chain == "svc.b -> svc.a -> svc.b",
          "unexpected chain: {chain}"
        );
      }
      other => panic!("expected a cycle, got {other:?}"),
    }
  }
  assert!(!container.has_instance("svc.a"));
  assert!(!container.has_instance("svc.b"));
}

// --- Group / tag / priority selection ---

fn logger_container() -> Container {
  let container = container();
  container
    .register(
      ServiceDescriptor::new("logger", LOGGER)
        .implements(LOGGER_INTERFACE)
        .in_group("web")
        .tagged("svc")
        .with_priority(50),
    )
    .unwrap();
  container
    .register(
      ServiceDescriptor::new("logger2", LOGGER2)
        .implements(LOGGER_INTERFACE)
        .in_group("web")
        .tagged("svc")
        .with_priority(100),
    )
    .unwrap();
  container
}

#[test]
fn test_highest_priority_wins_within_group_and_tag() {
  let container = logger_container();
  let instance = container
    .resolve_filtered(LOGGER_INTERFACE, Some("web"), Some("svc"))
    .unwrap();
  assert!(instance.is::<Logger2>());
}

#[test]
fn test_priority_ties_go_to_the_earliest_registration() {
  let container = container();
  for (id, class) in [("first", LOGGER), ("second", LOGGER2)] {
    container
      .register(
        ServiceDescriptor::new(id, class)
          .implements(LOGGER_INTERFACE)
          .in_group("jobs")
          .with_priority(-3),
      )
      .unwrap();
  }

  let instance = container
    .resolve_filtered(LOGGER_INTERFACE, Some("jobs"), None)
    .unwrap();
  assert!(instance.is::<Logger>());
}

#[test]
fn test_filter_with_no_match_is_not_found() {
  let container = logger_container();
  let err = container
    .resolve_filtered(LOGGER_INTERFACE, Some("cli"), Some("svc"))
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

#[test]
fn test_lazy_filtered_selects_like_resolve_filtered() {
  let container = logger_container();
  let lazy = container.lazy_filtered(LOGGER_INTERFACE, None, Some("svc"));
  assert!(lazy.get().unwrap().is::<Logger2>());
}

#[test]
fn test_group_and_tag_queries() {
  let container = logger_container();

  assert_eq!(
    container.query_group("web"),
    vec!["logger", LOGGER_INTERFACE, "logger2", LOGGER_INTERFACE]
  );
  assert_eq!(container.query_tag("svc").len(), 4);
  assert!(container.in_group("web", "logger2"));
  assert!(container.has_tag("svc", LOGGER_INTERFACE));
  assert!(!container.in_group("cli", "logger"));
  assert!(container.query_tag("unknown").is_empty());
  assert_eq!(container.registration_order(), vec!["logger", "logger2"]);
}

// --- Pluggable factories ---

struct EnvFactory;

impl ServiceFactory for EnvFactory {
  fn supports(&self, id: &str) -> bool {
    id.starts_with("env.")
  }

  fn create(&self, _container: &Container, id: &str, arguments: &Arguments) -> fibre_di::Result<Instance> {
    let fallback = arguments
      .get_named("default")
      .map(ToString::to_string)
      .unwrap_or_default();
    Ok(Instance::new("String", format!("{}={}", id, fallback)))
  }
}

#[test]
fn test_service_factory_takes_over_supported_ids() {
  let container = Container::builder()
    .catalog(Arc::new(TypeCatalog::new()))
    .build();
  container.add_service_factory(EnvFactory);
  container
    .register(
      ServiceDescriptor::new("env.home", "String")
        .with_argument("default", fibre_di::Argument::literal("/root")),
    )
    .unwrap();

  let value = container.resolve_as::<String>("env.home").unwrap();
  assert_eq!(*value, "env.home=/root");

  // Factory-built values bypass the singleton cache.
  let again = container.resolve_as::<String>("env.home").unwrap();
  assert!(!Arc::ptr_eq(&value, &again));
}
