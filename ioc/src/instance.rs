use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A resolved service: a shared, type-erased value plus the name of the
/// implementation type it was built from.
#[derive(Clone)]
pub struct Instance {
  value: Arc<dyn Any + Send + Sync>,
  type_name: Arc<str>,
}

impl Instance {
  /// Wraps a freshly built value.
  pub fn new<T: Any + Send + Sync>(type_name: impl Into<Arc<str>>, value: T) -> Self {
    Self {
      value: Arc::new(value),
      type_name: type_name.into(),
    }
  }

  /// Wraps a value that is already shared. Resolving the instance later hands
  /// out clones of this same `Arc`.
  pub fn from_arc<T: Any + Send + Sync>(type_name: impl Into<Arc<str>>, value: Arc<T>) -> Self {
    Self {
      value,
      type_name: type_name.into(),
    }
  }

  pub(crate) fn from_boxed(type_name: &str, value: Box<dyn Any + Send + Sync>) -> Self {
    Self {
      value: Arc::from(value),
      type_name: Arc::from(type_name),
    }
  }

  /// The implementation type name recorded for this instance.
  pub fn type_name(&self) -> &str {
    &self.type_name
  }

  pub fn is<T: Any>(&self) -> bool {
    self.value.is::<T>()
  }

  /// Returns the value as `Arc<T>` if it holds a `T`.
  pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.value.clone().downcast::<T>().ok()
  }

  /// True when both handles point at the same allocation.
  pub fn ptr_eq(a: &Instance, b: &Instance) -> bool {
    Arc::ptr_eq(&a.value, &b.value)
  }
}

impl fmt::Debug for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Instance")
      .field("type_name", &self.type_name)
      .finish_non_exhaustive()
  }
}
