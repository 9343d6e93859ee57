use crate::container::Container;
use crate::error::{Error, Result};
use crate::instance::Instance;

use once_cell::sync::OnceCell;
use std::any::Any;
use std::sync::Arc;

/// A handle that resolves its service on first access and keeps it.
///
/// The handle borrows the container; it is useful for breaking up expensive
/// or optional dependencies that most code paths never touch.
pub struct LazyService<'c> {
  container: &'c Container,
  id: String,
  group: Option<String>,
  tag: Option<String>,
  instance: OnceCell<Instance>,
}

impl<'c> LazyService<'c> {
  pub(crate) fn new(container: &'c Container, id: &str, group: Option<&str>, tag: Option<&str>) -> Self {
    Self {
      container,
      id: id.to_owned(),
      group: group.map(str::to_owned),
      tag: tag.map(str::to_owned),
      instance: OnceCell::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Resolves the service, or returns the instance resolved earlier.
  ///
  /// A failed resolution is not remembered; the next call tries again.
  pub fn get(&self) -> Result<&Instance> {
    self.instance.get_or_try_init(|| {
      self
        .container
        .resolve_filtered(&self.id, self.group.as_deref(), self.tag.as_deref())
    })
  }

  pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
    let instance = self.get()?;
    instance.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
      id: self.id.clone(),
      expected: std::any::type_name::<T>(),
      actual: instance.type_name().to_owned(),
    })
  }

  pub fn is_initialized(&self) -> bool {
    self.instance.get().is_some()
  }
}
