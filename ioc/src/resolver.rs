//! Object-graph construction: factories, singleton caching, parameter
//! binding and field injection.

use crate::blueprint::{Bindings, Bound, Param};
use crate::container::Container;
use crate::core::{BuildTable, Claim, ResolutionGuard};
use crate::descriptor::{Argument, Arguments, ServiceDescriptor};
use crate::error::{Error, Result};
use crate::event::{ContainerEvent, ServiceResolved};
use crate::instance::Instance;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;

/// Builds services for descriptors it does not know ahead of time.
///
/// The first registered factory whose `supports` returns true for a
/// descriptor id takes over its construction, bypassing parameter binding and
/// the singleton cache.
pub trait ServiceFactory: Send + Sync {
  fn supports(&self, id: &str) -> bool;

  fn create(&self, container: &Container, id: &str, arguments: &Arguments) -> Result<Instance>;
}

/// Owns the singleton instance cache and the pluggable factories.
#[derive(Default)]
pub(crate) struct DependencyResolver {
  // One cell per singleton id, filled once by the thread holding its ticket.
  instances: DashMap<String, Arc<OnceCell<Instance>>>,
  builds: BuildTable,
  factories: RwLock<Vec<Arc<dyn ServiceFactory>>>,
}

impl DependencyResolver {
  pub(crate) fn add_factory(&self, factory: Arc<dyn ServiceFactory>) {
    self.factories.write().push(factory);
  }

  pub(crate) fn evict(&self, id: &str) {
    self.instances.remove(id);
  }

  pub(crate) fn clear(&self) {
    self.instances.clear();
  }

  pub(crate) fn is_cached(&self, id: &str) -> bool {
    self
      .instances
      .get(id)
      .is_some_and(|cell| cell.get().is_some())
  }

  fn factory_for(&self, id: &str) -> Option<Arc<dyn ServiceFactory>> {
    self
      .factories
      .read()
      .iter()
      .find(|factory| factory.supports(id))
      .cloned()
  }

  fn singleton_cell(&self, id: &str) -> Arc<OnceCell<Instance>> {
    // Clone the cell out so the shard lock is released before construction,
    // which may recurse into this map.
    self.instances.entry(id.to_owned()).or_default().value().clone()
  }

  /// Builds (or fetches) the service described by `descriptor`.
  pub(crate) fn resolve_descriptor(
    &self,
    container: &Container,
    descriptor: &ServiceDescriptor,
  ) -> Result<Instance> {
    let id = descriptor.id();
    let _guard = ResolutionGuard::enter(container.token(), id)?;

    if let Some(factory) = descriptor.factory() {
      tracing::trace!(service.id = id, "invoking factory closure");
      let instance = factory(container)?;
      container.emit_resolved(id, &instance, false, Vec::new());
      return Ok(instance);
    }

    if let Some(factory) = self.factory_for(id) {
      tracing::trace!(service.id = id, "delegating to service factory");
      let instance = factory.create(container, id, descriptor.arguments())?;
      container.emit_resolved(id, &instance, false, Vec::new());
      return Ok(instance);
    }

    if !descriptor.is_singleton() {
      let (instance, dependencies) = self.construct(container, descriptor)?;
      container.emit_resolved(id, &instance, false, dependencies);
      return Ok(instance);
    }

    let cell = self.singleton_cell(id);
    if let Some(instance) = cell.get() {
      tracing::trace!(service.id = id, "singleton cache hit");
      container.emit_resolved(id, instance, true, descriptor.arguments().formatted());
      return Ok(instance.clone());
    }

    match self.builds.claim(container.token(), id, &cell)? {
      Claim::Ready(instance) => {
        // Another thread finished construction while we waited.
        container.emit_resolved(id, &instance, true, descriptor.arguments().formatted());
        Ok(instance)
      }
      Claim::Build(mut ticket) => {
        let built = self.construct(container, descriptor);
        ticket.record(&built);
        let (instance, dependencies) = built?;
        let instance = cell.get_or_init(|| instance).clone();
        drop(ticket);
        container.emit_resolved(id, &instance, false, dependencies);
        Ok(instance)
      }
    }
  }

  // Binds the constructor, builds the value and applies field injections.
  fn construct(
    &self,
    container: &Container,
    descriptor: &ServiceDescriptor,
  ) -> Result<(Instance, Vec<String>)> {
    let blueprint = container.catalog().get(descriptor.implementation()).ok_or_else(|| {
      Error::Configuration(format!(
        "no blueprint defined for type '{}' (service '{}')",
        descriptor.implementation(),
        descriptor.id()
      ))
    })?;

    let bindings = self.bind(container, descriptor.id(), blueprint.params(), descriptor.arguments())?;
    let dependencies = bindings.formatted();
    let mut value = blueprint.instantiate(&bindings)?;

    for field in blueprint.fields() {
      if !container.contains(field.service_type()) {
        tracing::trace!(
          service.id = descriptor.id(),
          field = field.field(),
          "skipping injection of unregistered type"
        );
        continue;
      }
      let service = container.resolve(field.service_type())?;
      field.apply(value.as_mut(), service)?;
    }

    tracing::debug!(
      service.id = descriptor.id(),
      class = descriptor.implementation(),
      "constructed service"
    );
    Ok((Instance::from_boxed(descriptor.implementation(), value), dependencies))
  }

  /// Binds each parameter: a named argument first, then the next positional
  /// argument, then a registered service matching the declared type, then
  /// the parameter default.
  pub(crate) fn bind(
    &self,
    container: &Container,
    owner: &str,
    params: &[Param],
    arguments: &Arguments,
  ) -> Result<Bindings> {
    let mut bindings = Bindings::with_capacity(params.len());
    let mut position = 0;

    for param in params {
      let bound = if let Some(argument) = arguments.get_named(param.name()) {
        self.bind_argument(container, argument)?
      } else if let Some(argument) = arguments.get_positional(position) {
        position += 1;
        self.bind_argument(container, argument)?
      } else if let Some(service_type) = param.service_type().filter(|ty| container.contains(ty)) {
        Bound::Service(container.resolve(service_type)?)
      } else if let Some(default) = param.default_value() {
        Bound::Literal(default.clone())
      } else {
        return Err(Error::UnresolvableParameter {
          service: owner.to_owned(),
          parameter: param.name().to_owned(),
        });
      };
      bindings.push(param.name(), bound);
    }

    Ok(bindings)
  }

  fn bind_argument(&self, container: &Container, argument: &Argument) -> Result<Bound> {
    match argument {
      Argument::Reference(id) => Ok(Bound::Service(container.resolve(id)?)),
      Argument::Literal(value) => Ok(Bound::Literal(value.clone())),
    }
  }
}

impl Container {
  pub(crate) fn emit_resolved(&self, id: &str, instance: &Instance, from_cache: bool, dependencies: Vec<String>) {
    self.emit(|| {
      ContainerEvent::Resolved(ServiceResolved {
        id: id.to_owned(),
        instance: instance.clone(),
        from_cache,
        dependencies,
      })
    });
  }
}
