//! Explicit construction recipes for implementation types.
//!
//! A [`Blueprint`] stands in for constructor and field reflection: it lists
//! the parameters a type needs, how to build the type from the bound values,
//! and which fields receive services after construction. Blueprints live in a
//! [`TypeCatalog`] keyed by the implementation type name used in descriptors.

use crate::descriptor::ServiceDescriptor;
use crate::error::{Error, Result};
use crate::instance::Instance;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

type BuildFn = dyn Fn(&Bindings) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync;
type ApplyFn = dyn Fn(&mut (dyn Any + Send + Sync), Instance) -> Result<()> + Send + Sync;

/// One constructor parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
  name: String,
  service_type: Option<String>,
  default: Option<Value>,
}

impl Param {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      service_type: None,
      default: None,
    }
  }

  /// Declares the service or interface key this parameter is typed as. When
  /// no argument is supplied and the key is registered, the parameter is
  /// resolved from the container.
  pub fn of_type(mut self, service_type: impl Into<String>) -> Self {
    self.service_type = Some(service_type.into());
    self
  }

  pub fn with_default(mut self, default: impl Into<Value>) -> Self {
    self.default = Some(default.into());
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn service_type(&self) -> Option<&str> {
    self.service_type.as_deref()
  }

  pub fn default_value(&self) -> Option<&Value> {
    self.default.as_ref()
  }
}

/// A value bound to a parameter.
#[derive(Debug, Clone)]
pub enum Bound {
  Service(Instance),
  Literal(Value),
}

impl fmt::Display for Bound {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Bound::Service(instance) => f.write_str(instance.type_name()),
      Bound::Literal(Value::String(s)) => f.write_str(s),
      Bound::Literal(value) => write!(f, "{}", value),
    }
  }
}

/// Parameter values bound for one construction, in parameter order.
#[derive(Debug, Default)]
pub struct Bindings {
  values: Vec<(String, Bound)>,
}

impl Bindings {
  pub(crate) fn with_capacity(capacity: usize) -> Self {
    Self {
      values: Vec::with_capacity(capacity),
    }
  }

  pub(crate) fn push(&mut self, name: &str, bound: Bound) {
    self.values.push((name.to_owned(), bound));
  }

  pub fn get(&self, name: &str) -> Option<&Bound> {
    self
      .values
      .iter()
      .find(|(param, _)| param == name)
      .map(|(_, bound)| bound)
  }

  fn require(&self, name: &str) -> Result<&Bound> {
    self.get(name).ok_or_else(|| Error::InvalidArgument {
      parameter: name.to_owned(),
      reason: "no such parameter".to_owned(),
    })
  }

  /// The service bound to `name`.
  pub fn instance(&self, name: &str) -> Result<Instance> {
    match self.require(name)? {
      Bound::Service(instance) => Ok(instance.clone()),
      Bound::Literal(value) => Err(Error::InvalidArgument {
        parameter: name.to_owned(),
        reason: format!("expected a service, found literal {}", value),
      }),
    }
  }

  /// The service bound to `name`, downcast to `T`.
  pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
    let instance = self.instance(name)?;
    instance.downcast::<T>().ok_or_else(|| Error::InvalidArgument {
      parameter: name.to_owned(),
      reason: format!(
        "expected {}, found {}",
        std::any::type_name::<T>(),
        instance.type_name()
      ),
    })
  }

  /// The literal bound to `name`, deserialized into `T`.
  pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
    match self.require(name)? {
      Bound::Literal(value) => {
        serde_json::from_value(value.clone()).map_err(|e| Error::InvalidArgument {
          parameter: name.to_owned(),
          reason: e.to_string(),
        })
      }
      Bound::Service(instance) => Err(Error::InvalidArgument {
        parameter: name.to_owned(),
        reason: format!("expected a literal, found service {}", instance.type_name()),
      }),
    }
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub(crate) fn formatted(&self) -> Vec<String> {
    self.values.iter().map(|(_, bound)| bound.to_string()).collect()
  }
}

pub(crate) struct FieldInjection {
  field: String,
  service_type: String,
  apply: Box<ApplyFn>,
}

impl FieldInjection {
  pub(crate) fn field(&self) -> &str {
    &self.field
  }

  pub(crate) fn service_type(&self) -> &str {
    &self.service_type
  }

  pub(crate) fn apply(&self, target: &mut (dyn Any + Send + Sync), service: Instance) -> Result<()> {
    (self.apply)(target, service)
  }
}

/// How to build one implementation type.
pub struct Blueprint {
  type_name: String,
  params: Vec<Param>,
  fields: Vec<FieldInjection>,
  build: Box<BuildFn>,
}

impl Blueprint {
  /// Creates a blueprint whose build closure receives the bound parameters.
  ///
  /// # Examples
  ///
  /// ```
  /// use fibre_di::{Blueprint, Param};
  ///
  /// struct Mailer { host: String }
  ///
  /// let blueprint = Blueprint::new("app::Mailer", |args| {
  ///   Ok(Mailer { host: args.value("host")? })
  /// })
  /// .param(Param::new("host").with_default("localhost"));
  ///
  /// assert_eq!(blueprint.type_name(), "app::Mailer");
  /// ```
  pub fn new<T, F>(type_name: impl Into<String>, build: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(&Bindings) -> Result<T> + Send + Sync + 'static,
  {
    Self {
      type_name: type_name.into(),
      params: Vec::new(),
      fields: Vec::new(),
      build: Box::new(move |bindings: &Bindings| {
        Ok(Box::new(build(bindings)?) as Box<dyn Any + Send + Sync>)
      }),
    }
  }

  pub fn param(mut self, param: Param) -> Self {
    self.params.push(param);
    self
  }

  /// Marks a field for injection. After construction, if `service_type` is a
  /// registered key, it is resolved and handed to `apply` together with the
  /// freshly built value. Unregistered keys are skipped.
  pub fn inject<T, F>(mut self, field: impl Into<String>, service_type: impl Into<String>, apply: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(&mut T, Instance) -> Result<()> + Send + Sync + 'static,
  {
    let field = field.into();
    let field_name = field.clone();
    self.fields.push(FieldInjection {
      field,
      service_type: service_type.into(),
      apply: Box::new(move |target: &mut (dyn Any + Send + Sync), service: Instance| {
        match target.downcast_mut::<T>() {
          Some(target) => apply(target, service),
          None => Err(Error::Configuration(format!(
            "field '{}' is declared on {}, which this blueprint does not build",
            field_name,
            std::any::type_name::<T>()
          ))),
        }
      }),
    });
    self
  }

  pub fn type_name(&self) -> &str {
    &self.type_name
  }

  pub fn params(&self) -> &[Param] {
    &self.params
  }

  pub(crate) fn fields(&self) -> &[FieldInjection] {
    &self.fields
  }

  pub(crate) fn instantiate(&self, bindings: &Bindings) -> Result<Box<dyn Any + Send + Sync>> {
    (self.build)(bindings)
  }
}

impl fmt::Debug for Blueprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Blueprint")
      .field("type_name", &self.type_name)
      .field("params", &self.params)
      .field(
        "fields",
        &self.fields.iter().map(|f| f.field.as_str()).collect::<Vec<_>>(),
      )
      .finish()
  }
}

/// The set of known implementation types, keyed by type name.
///
/// The catalog is code rather than data: it is never persisted and can be
/// shared between a live container and one rebuilt from a compiled snapshot.
#[derive(Default)]
pub struct TypeCatalog {
  blueprints: DashMap<String, Arc<Blueprint>>,
}

impl TypeCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds or replaces the blueprint for its type name.
  pub fn define(&self, blueprint: Blueprint) {
    self
      .blueprints
      .insert(blueprint.type_name.clone(), Arc::new(blueprint));
  }

  pub fn get(&self, type_name: &str) -> Option<Arc<Blueprint>> {
    self.blueprints.get(type_name).map(|entry| entry.value().clone())
  }

  pub fn contains(&self, type_name: &str) -> bool {
    self.blueprints.contains_key(type_name)
  }

  pub fn len(&self) -> usize {
    self.blueprints.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blueprints.is_empty()
  }
}

/// A type that describes its own registration.
///
/// This is the compile-time counterpart of annotating a class as a service:
/// the descriptor carries the id, interface, group, tags, priority and
/// lifecycle, and the blueprint says how to build it.
pub trait Service: Any + Send + Sync {
  fn descriptor() -> ServiceDescriptor
  where
    Self: Sized;

  fn blueprint() -> Blueprint
  where
    Self: Sized;
}
