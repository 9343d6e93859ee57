mod common;

use common::*;
use fibre_di::{
  CompiledSnapshot, Container, Error, ServiceDescriptor, ServiceProvider, ServicesConfig, SnapshotCompiler,
  SNAPSHOT_FORMAT_VERSION,
};
use pretty_assertions::assert_eq;
use std::fs;

fn populated() -> Container {
  let container = container();
  container.register(database("primary.db", "postgres://compiled")).unwrap();
  container
    .register_with_alias(user_repository("users", "primary.db"), "repo")
    .unwrap();
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
fn test_compiled_container_resolves_like_the_live_one() {
  let dir = tempfile::tempdir().unwrap();
  let live = populated();

  let compiler = SnapshotCompiler::new(dir.path().join("compiled")).unwrap();
  let path = compiler.compile(&live).unwrap();
  assert_eq!(path, compiler.path());
  assert!(path.exists());

  let snapshot = compiler.load().unwrap();
  assert_eq!(snapshot.format_version(), SNAPSHOT_FORMAT_VERSION);
  assert_eq!(snapshot.len(), 4);
  assert_eq!(snapshot.keys(), live.keys());

  let frozen = Container::from_snapshot(&snapshot, live.catalog().clone());
  assert!(frozen.is_frozen());
  for key in live.keys() {
    let expected = live.resolve(&key).unwrap();
    let actual = frozen.resolve(&key).unwrap();
    assert_eq!(actual.type_name(), expected.type_name(), "key {key}");
  }

  let users = frozen.resolve_as::<UserRepository>("repo").unwrap();
  assert_eq!(users.db.dsn, "postgres://compiled");
  assert!(frozen
    .resolve_filtered(LOGGER_INTERFACE, Some("web"), Some("svc"))
    .unwrap()
    .is::<Logger2>());
  assert_eq!(frozen.registration_order(), live.registration_order());
}

#[test]
fn test_compiled_container_rejects_mutation() {
  let dir = tempfile::tempdir().unwrap();
  let compiler = SnapshotCompiler::new(dir.path()).unwrap();
  compiler.compile(&populated()).unwrap();
  let frozen = Container::from_snapshot(&compiler.load().unwrap(), catalog());

  struct Noop;
  impl ServiceProvider for Noop {
    fn register(&self, _container: &Container) -> fibre_di::Result<()> {
      Ok(())
    }
  }

  let attempts = [
    frozen.register(database("other.db", "x")),
    frozen.register_with_alias(database("other.db", "x"), "other"),
    frozen.load_configuration(&ServicesConfig::from_yaml_str("services:\n  extra: {class: app::Logger2}\n").unwrap()),
    frozen.register_factory("clock", |_| Ok(0u64)),
    frozen.add_instance("settings", 1u8),
    frozen.add_provider(Noop),
    frozen.clear(),
  ];
  for attempt in attempts {
    assert!(matches!(attempt, Err(Error::ImmutableContainer(_))), "got {attempt:?}");
  }
  assert!(!frozen.contains("other.db"));
  assert!(frozen.contains("primary.db"));
}

#[test]
fn test_factories_cannot_be_compiled() {
  let dir = tempfile::tempdir().unwrap();
  let container = populated();
  container.register_factory("clock", |_| Ok(42u64)).unwrap();

  let err = SnapshotCompiler::new(dir.path()).unwrap().compile(&container).unwrap_err();
  assert!(matches!(err, Error::Serialization(ref msg) if msg.contains("clock")), "got {err:?}");
}

#[test]
fn test_snapshot_round_trips_indices() {
  let live = populated();
  let snapshot = CompiledSnapshot::from_container(&live).unwrap();
  let decoded = CompiledSnapshot::from_slice(&snapshot.to_vec().unwrap()).unwrap();

  let registry = decoded.registry();
  assert_eq!(registry.aliases().get("repo").map(String::as_str), Some("users"));
  assert_eq!(registry.group("web"), live.query_group("web").as_slice());
  assert_eq!(registry.tag("svc"), live.query_tag("svc").as_slice());
  assert_eq!(decoded.descriptor(LOGGER_INTERFACE).unwrap().id(), "logger2");
  assert_eq!(decoded.compiled_at(), snapshot.compiled_at());
}

#[test]
fn test_missing_or_foreign_snapshots_fail_to_load() {
  let dir = tempfile::tempdir().unwrap();
  let compiler = SnapshotCompiler::new(dir.path()).unwrap();
  assert!(matches!(compiler.load(), Err(Error::NotFound(_))));

  fs::write(
    compiler.path(),
    r#"{"format_version": 7, "compiled_at": "2024-01-01T00:00:00Z", "registry": {"services": {}}}"#,
  )
  .unwrap();
  assert!(matches!(
    compiler.load(),
    Err(Error::SnapshotVersion { found: 7, .. })
  ));
}
