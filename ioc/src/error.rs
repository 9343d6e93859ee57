use thiserror::Error;

/// The error type for every fallible `fibre_di` operation.
#[derive(Debug, Error)]
pub enum Error {
  /// An unknown id, alias or interface, an empty group/tag match, or an
  /// absent cache key.
  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Circular dependency detected: {chain}")]
  CircularDependency { chain: String },

  /// A descriptor or configuration document is missing data needed to
  /// register or build a service.
  #[error("Invalid configuration: {0}")]
  Configuration(String),

  #[error("Cannot resolve parameter '{parameter}' of service '{service}'")]
  UnresolvableParameter { service: String, parameter: String },

  #[error("Cannot {0} on a compiled container")]
  ImmutableContainer(&'static str),

  #[error("Serialization failed: {0}")]
  Serialization(String),

  #[error("Service '{0}' is already registered")]
  DuplicateService(String),

  #[error("Service provider dependency cycle: {chain}")]
  ProviderCycle { chain: String },

  #[error("Argument '{parameter}' is invalid: {reason}")]
  InvalidArgument { parameter: String, reason: String },

  #[error("Service '{id}' is a {actual}, not a {expected}")]
  TypeMismatch {
    id: String,
    expected: &'static str,
    actual: String,
  },

  #[error("Snapshot format version {found} is not supported (expected {expected})")]
  SnapshotVersion { found: u32, expected: u32 },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// A factory or build closure failed with its own error.
  #[error("Service construction failed: {0}")]
  Service(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wraps an arbitrary error raised while constructing a service.
  pub fn service<E>(error: E) -> Self
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    Error::Service(error.into())
  }

  pub(crate) fn not_found(what: impl Into<String>) -> Self {
    Error::NotFound(what.into())
  }
}

/// A specialized `Result` type for `fibre_di` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
