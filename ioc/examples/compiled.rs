use fibre_di::cache::{CacheStore, FileCacheStore};
use fibre_di::{Argument, Blueprint, Container, Error, Param, ServiceDescriptor, SnapshotCompiler, TypeCatalog};
use std::sync::Arc;

struct Greeter {
  greeting: String,
}

fn catalog() -> Arc<TypeCatalog> {
  let catalog = TypeCatalog::new();
  catalog.define(
    Blueprint::new("app::Greeter", |args| {
      Ok(Greeter {
        greeting: args.value("greeting")?,
      })
    })
    .param(Param::new("greeting").with_default("Hello")),
  );
  Arc::new(catalog)
}

fn main() -> fibre_di::Result<()> {
  let workdir = std::env::temp_dir().join("fibre_di_compiled_example");
  let catalog = catalog();

  // --- Warm start from the cache store ---
  let store: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(workdir.join("cache"))?);
  let live = Container::builder().catalog(catalog.clone()).cache(store).build();
  if live.loaded_from_cache() {
    println!("Descriptor table restored from cache, skipping registration.");
  } else {
    live.register(
      ServiceDescriptor::new("greeter", "app::Greeter").with_argument("greeting", Argument::literal("Hello, World!")),
    )?;
  }

  // --- Compile and boot a frozen container ---
  let compiler = SnapshotCompiler::new(workdir.join("compiled"))?;
  let path = compiler.compile(&live)?;
  println!("Compiled snapshot written to {}", path.display());

  let frozen = Container::from_snapshot(&compiler.load()?, catalog);
  let greeter = frozen.resolve_as::<Greeter>("greeter")?;
  println!("{}", greeter.greeting);

  match frozen.register(ServiceDescriptor::new("other", "app::Greeter")) {
    Err(Error::ImmutableContainer(operation)) => println!("As expected, cannot {} on a frozen container.", operation),
    other => println!("Unexpected result: {:?}", other),
  }
  Ok(())
}
