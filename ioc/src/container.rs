//! The main `Container` struct and its associated methods.

use crate::blueprint::{Bindings, Blueprint, Param, Service, TypeCatalog};
use crate::cache::CacheStore;
use crate::compiler::CompiledSnapshot;
use crate::config::ServicesConfig;
use crate::core::{current_stack, next_container_token};
use crate::descriptor::{Arguments, FactoryFn, ServiceDescriptor};
use crate::error::{Error, Result};
use crate::event::{ContainerEvent, EventSink, ServiceRegistered};
use crate::instance::Instance;
use crate::lazy::LazyService;
use crate::provider::{ProviderSet, ServiceProvider};
use crate::registry::{DuplicatePolicy, Registration, ServiceRegistry};
use crate::resolver::{DependencyResolver, ServiceFactory};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Cache key under which the whole descriptor table is persisted.
pub const CACHE_KEY: &str = "container_services";
/// Version stamp of the persisted descriptor table.
pub const CACHE_VERSION: &str = "1.0";
/// Time-to-live of the persisted descriptor table.
pub const CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Serialize)]
struct CachedTableRef<'a> {
  version: &'a str,
  services: &'a ServiceRegistry,
}

#[derive(Deserialize)]
struct CachedTable {
  #[serde(default)]
  version: Option<String>,
  services: ServiceRegistry,
}

/// Configures and builds a [`Container`].
#[derive(Default)]
pub struct ContainerBuilder {
  catalog: Option<Arc<TypeCatalog>>,
  cache: Option<Arc<dyn CacheStore>>,
  events: Option<Arc<dyn EventSink>>,
  duplicates: DuplicatePolicy,
}

impl ContainerBuilder {
  /// Shares an existing catalog of blueprints with the container.
  pub fn catalog(mut self, catalog: Arc<TypeCatalog>) -> Self {
    self.catalog = Some(catalog);
    self
  }

  /// Persists the descriptor table to `cache` and restores it on build.
  pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
    self.events = Some(sink);
    self
  }

  pub fn on_duplicate(mut self, policy: DuplicatePolicy) -> Self {
    self.duplicates = policy;
    self
  }

  pub fn build(self) -> Container {
    let mut container = Container::from_parts(self.catalog, self.events, self.duplicates, false);
    if let Some(cache) = self.cache {
      if let Some(registry) = load_cached_registry(cache.as_ref()) {
        *container.registry.get_mut() = registry;
        container.loaded_from_cache = true;
      }
      container.cache = Some(cache);
    }
    container
  }

  /// Builds a frozen container whose descriptor table comes from `snapshot`.
  ///
  /// Any configured cache is ignored; the snapshot is the only source of
  /// descriptors.
  pub fn build_from_snapshot(self, snapshot: &CompiledSnapshot) -> Container {
    let mut container = Container::from_parts(self.catalog, self.events, self.duplicates, true);
    *container.registry.get_mut() = snapshot.registry().clone();
    container
  }
}

// Reads the persisted table. Anything missing, stale or undecodable is
// discarded so the caller starts from an empty registry.
fn load_cached_registry(cache: &dyn CacheStore) -> Option<ServiceRegistry> {
  if !cache.has(CACHE_KEY) {
    return None;
  }
  let discard = |reason: &str| -> Option<ServiceRegistry> {
    tracing::warn!(key = CACHE_KEY, reason, "discarding cached descriptor table");
    if let Err(e) = cache.delete(CACHE_KEY) {
      tracing::warn!(key = CACHE_KEY, error = %e, "failed to delete cached descriptor table");
    }
    None
  };

  let payload = match cache.get(CACHE_KEY) {
    Ok(payload) => payload,
    Err(_) => return None,
  };
  let table: CachedTable = match serde_json::from_slice(&payload) {
    Ok(table) => table,
    Err(_) => return discard("payload could not be decoded"),
  };
  match table.version.as_deref() {
    Some(CACHE_VERSION) => {
      tracing::debug!(services = table.services.len(), "restored descriptor table from cache");
      Some(table.services)
    }
    Some(_) => discard("version mismatch"),
    None => discard("missing version stamp"),
  }
}

/// The dependency-injection container.
///
/// A container owns the service registry, the resolver and its singleton
/// cache, and the service providers. It is thread-safe: registration takes
/// the registry's write lock, while resolution and queries share its read
/// lock. Each singleton is constructed at most once even under concurrent
/// first access.
///
/// There is no global container; create one at the entry point and hand out
/// references (or an `Arc`) to whatever needs it.
pub struct Container {
  token: u64,
  registry: RwLock<ServiceRegistry>,
  resolver: DependencyResolver,
  catalog: Arc<TypeCatalog>,
  providers: Mutex<ProviderSet>,
  events: RwLock<Option<Arc<dyn EventSink>>>,
  announce: ReentrantMutex<()>,
  cache: Option<Arc<dyn CacheStore>>,
  duplicates: DuplicatePolicy,
  frozen: bool,
  loaded_from_cache: bool,
}

impl Default for Container {
  fn default() -> Self {
    Self::builder().build()
  }
}

impl Container {
  /// Creates a new, empty `Container` with its own type catalog.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn builder() -> ContainerBuilder {
    ContainerBuilder::default()
  }

  /// Builds a frozen container from a compiled snapshot.
  pub fn from_snapshot(snapshot: &CompiledSnapshot, catalog: Arc<TypeCatalog>) -> Self {
    Self::builder().catalog(catalog).build_from_snapshot(snapshot)
  }

  fn from_parts(
    catalog: Option<Arc<TypeCatalog>>,
    events: Option<Arc<dyn EventSink>>,
    duplicates: DuplicatePolicy,
    frozen: bool,
  ) -> Self {
    Self {
      token: next_container_token(),
      registry: RwLock::new(ServiceRegistry::new()),
      resolver: DependencyResolver::default(),
      catalog: catalog.unwrap_or_default(),
      providers: Mutex::new(ProviderSet::default()),
      events: RwLock::new(events),
      announce: ReentrantMutex::new(()),
      cache: None,
      duplicates,
      frozen,
      loaded_from_cache: false,
    }
  }

  // --- PRIVATE HELPERS ---

  pub(crate) fn token(&self) -> u64 {
    self.token
  }

  pub(crate) fn emit<F: FnOnce() -> ContainerEvent>(&self, event: F) {
    let sink = self.events.read().clone();
    if let Some(sink) = sink {
      sink.on_event(&event());
    }
  }

  fn ensure_mutable(&self, operation: &'static str) -> Result<()> {
    if self.frozen {
      return Err(Error::ImmutableContainer(operation));
    }
    Ok(())
  }

  // Writes the table while the caller still holds the write lock, so
  // concurrent registrations persist in the order they were applied.
  fn save_to_cache(&self, registry: &ServiceRegistry) -> Result<()> {
    let Some(cache) = &self.cache else {
      return Ok(());
    };
    let persistable = registry.without_factories();
    let payload = serde_json::to_vec(&CachedTableRef {
      version: CACHE_VERSION,
      services: &persistable,
    })
    .map_err(|e| Error::Serialization(e.to_string()))?;
    cache.set(CACHE_KEY, &payload, Some(CACHE_TTL))
  }

  fn register_internal(&self, descriptor: ServiceDescriptor, alias: Option<&str>) -> Result<()> {
    self.ensure_mutable("register services")?;

    let event = ServiceRegistered {
      id: descriptor.id().to_owned(),
      class: descriptor.implementation().to_owned(),
      alias: alias.map(str::to_owned),
      group: descriptor.group().map(str::to_owned),
      tags: descriptor.tags().to_vec(),
      singleton: descriptor.is_singleton(),
      implements: descriptor.interface().map(str::to_owned),
    };

    // Registered events go out in the order the registry applied them. Sinks
    // may register from the callback on the same thread.
    let _announce = self.announce.lock();
    {
      let mut registry = self.registry.write();
      let outcome = if self.cache.is_some() {
        // Stage on a copy so a failed cache write leaves the table untouched.
        let mut staged = registry.clone();
        let outcome = staged.register(descriptor, alias, self.duplicates)?;
        self.save_to_cache(&staged)?;
        *registry = staged;
        outcome
      } else {
        registry.register(descriptor, alias, self.duplicates)?
      };
      if outcome == Registration::Replaced {
        self.resolver.evict(&event.id);
      }
    }

    tracing::debug!(
      service.id = %event.id,
      class = %event.class,
      singleton = event.singleton,
      "registered service"
    );
    self.emit(|| ContainerEvent::Registered(event));
    Ok(())
  }

  // --- PUBLIC API ---

  // --- Registration ---

  /// Registers a descriptor under its id, its implementation type and, if
  /// it declares one, its interface.
  pub fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
    self.register_internal(descriptor, None)
  }

  pub fn register_with_alias(&self, descriptor: ServiceDescriptor, alias: &str) -> Result<()> {
    self.register_internal(descriptor, Some(alias))
  }

  /// Registers a self-describing service type and its blueprint.
  pub fn register_service<S: Service>(&self) -> Result<()> {
    self.ensure_mutable("register services")?;
    self.catalog.define(S::blueprint());
    self.register(S::descriptor())
  }

  /// Registers every entry of a bulk configuration document, in document
  /// order.
  ///
  /// Loading is not transactional: if an entry fails, the entries before it
  /// stay registered.
  pub fn load_configuration(&self, config: &ServicesConfig) -> Result<()> {
    self.ensure_mutable("load configuration")?;
    for (descriptor, alias) in config.descriptors() {
      self.register_internal(descriptor, alias.as_deref())?;
    }
    Ok(())
  }

  /// Registers a transient service built by `factory` without parameter
  /// binding. The factory may resolve other services from the container it
  /// is given.
  pub fn register_factory<T, F>(&self, id: &str, factory: F) -> Result<()>
  where
    T: Any + Send + Sync,
    F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
  {
    self.ensure_mutable("register factories")?;
    let type_name = std::any::type_name::<T>();
    let factory: FactoryFn = Arc::new(move |container: &Container| {
      Ok(Instance::new(type_name, factory(container)?))
    });
    self.register_internal(ServiceDescriptor::with_factory(id, id, factory).transient(), None)
  }

  /// Registers an already-built value as a singleton.
  pub fn add_instance<T: Any + Send + Sync>(&self, id: &str, instance: T) -> Result<()> {
    self.ensure_mutable("add instances")?;
    let type_name = std::any::type_name::<T>();
    let instance = Instance::new(type_name, instance);
    let factory: FactoryFn = Arc::new(move |_: &Container| Ok(instance.clone()));
    self.register_internal(ServiceDescriptor::with_factory(id, type_name, factory), None)
  }

  /// Adds a pluggable factory consulted before constructor binding.
  pub fn add_service_factory<F: ServiceFactory + 'static>(&self, factory: F) {
    self.resolver.add_factory(Arc::new(factory));
  }

  /// Adds a blueprint to the container's type catalog.
  pub fn define(&self, blueprint: Blueprint) {
    self.catalog.define(blueprint);
  }

  pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
    *self.events.write() = Some(sink);
  }

  /// Removes every descriptor, index and cached instance.
  pub fn clear(&self) -> Result<()> {
    self.ensure_mutable("clear the registry")?;
    self.registry.write().clear();
    self.resolver.clear();
    Ok(())
  }

  /// Clears the backing cache store, if any.
  pub fn clear_cache(&self) -> Result<()> {
    match &self.cache {
      Some(cache) => cache.clear(),
      None => Ok(()),
    }
  }

  // --- Providers ---

  /// Adds a provider and re-orders the provider list.
  ///
  /// Fails with [`Error::ProviderCycle`] if the provider's dependencies form a
  /// cycle with providers already added; the list is then left unchanged.
  pub fn add_provider<P: ServiceProvider + 'static>(&self, provider: P) -> Result<()> {
    self.ensure_mutable("add service providers")?;
    self.providers.lock().add(Arc::new(provider))
  }

  /// Runs `register` on every provider that has not registered yet, then
  /// `boot` on every provider that has not booted yet, both in provider
  /// order.
  pub fn run_providers(&self) -> Result<()> {
    let pending = self.providers.lock().pending_registration();
    for (index, provider) in pending {
      tracing::debug!(provider = provider.name(), "registering provider");
      provider.register(self)?;
      self.providers.lock().mark_registered(index);
    }

    let pending = self.providers.lock().pending_boot();
    for (index, provider) in pending {
      tracing::debug!(provider = provider.name(), "booting provider");
      provider.boot(self)?;
      self.providers.lock().mark_booted(index);
    }
    Ok(())
  }

  /// Provider names in execution order.
  pub fn provider_order(&self) -> Vec<String> {
    self.providers.lock().names()
  }

  // --- Resolution ---

  /// Resolves a service by id, alias, implementation type or interface.
  pub fn resolve(&self, id: &str) -> Result<Instance> {
    let descriptor = self.registry.read().descriptor(id)?;
    self.resolver.resolve_descriptor(self, &descriptor)
  }

  /// Resolves the highest-priority service registered under `id` (usually an
  /// interface) whose group and tag match the filter. Ties go to the earliest
  /// registration.
  pub fn resolve_filtered(&self, id: &str, group: Option<&str>, tag: Option<&str>) -> Result<Instance> {
    if group.is_none() && tag.is_none() {
      return self.resolve(id);
    }
    let descriptor = self.registry.read().select(id, group, tag)?;
    self.resolver.resolve_descriptor(self, &descriptor)
  }

  /// Resolves a service and downcasts it to `T`.
  pub fn resolve_as<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>> {
    let instance = self.resolve(id)?;
    instance.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
      id: id.to_owned(),
      expected: std::any::type_name::<T>(),
      actual: instance.type_name().to_owned(),
    })
  }

  /// A handle that resolves `id` on first use.
  pub fn lazy(&self, id: &str) -> LazyService<'_> {
    LazyService::new(self, id, None, None)
  }

  pub fn lazy_filtered(&self, id: &str, group: Option<&str>, tag: Option<&str>) -> LazyService<'_> {
    LazyService::new(self, id, group, tag)
  }

  /// Binds `params` against `arguments` and the container, then calls `f`
  /// with the bound values.
  pub fn call<R, F>(&self, params: &[Param], arguments: &Arguments, f: F) -> Result<R>
  where
    F: FnOnce(&Bindings) -> Result<R>,
  {
    let bindings = self.resolver.bind(self, "<call>", params, arguments)?;
    f(&bindings)
  }

  // --- Queries ---

  /// True if `id` is a registered key or alias.
  pub fn contains(&self, id: &str) -> bool {
    self.registry.read().contains(id)
  }

  pub fn descriptor(&self, id: &str) -> Result<ServiceDescriptor> {
    self.registry.read().descriptor(id).map(|d| (*d).clone())
  }

  /// Keys bucketed under `group`, in insertion order.
  pub fn query_group(&self, group: &str) -> Vec<String> {
    self.registry.read().group(group).to_vec()
  }

  /// Keys bucketed under `tag`, in insertion order.
  pub fn query_tag(&self, tag: &str) -> Vec<String> {
    self.registry.read().tag(tag).to_vec()
  }

  pub fn in_group(&self, group: &str, key: &str) -> bool {
    self.registry.read().group(group).iter().any(|k| k == key)
  }

  pub fn has_tag(&self, tag: &str, key: &str) -> bool {
    self.registry.read().tag(tag).iter().any(|k| k == key)
  }

  pub fn registration_order(&self) -> Vec<String> {
    self.registry.read().order().to_vec()
  }

  /// Every key in the descriptor table, including interface and
  /// implementation keys.
  pub fn keys(&self) -> Vec<String> {
    self.registry.read().keys().map(str::to_owned).collect()
  }

  /// True if a singleton instance for `id` has been constructed.
  pub fn has_instance(&self, id: &str) -> bool {
    self.resolver.is_cached(id)
  }

  /// Ids under construction on the current thread, outermost first.
  pub fn resolution_stack(&self) -> Vec<String> {
    current_stack(self.token)
  }

  pub fn catalog(&self) -> &Arc<TypeCatalog> {
    &self.catalog
  }

  /// A copy of the descriptor table.
  pub fn registry(&self) -> ServiceRegistry {
    self.registry.read().clone()
  }

  pub fn is_frozen(&self) -> bool {
    self.frozen
  }

  /// True if the descriptor table was restored from the cache store at
  /// build time, in which case registration can usually be skipped.
  pub fn loaded_from_cache(&self) -> bool {
    self.loaded_from_cache
  }
}
