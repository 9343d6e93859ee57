//! # Fibre DI
//!
//! A thread-safe dependency-injection registry and resolver for Rust.
//!
//! Services are described by [`ServiceDescriptor`]s: an id, the
//! implementation type, an optional interface, group, tags, priority,
//! lifecycle and constructor arguments. Implementation types are built from
//! [`Blueprint`]s, explicit construction recipes kept in a [`TypeCatalog`].
//! The [`Container`] resolves services recursively, detects circular
//! dependencies, caches singletons and selects among several implementations
//! of an interface by group, tag and priority.
//!
//! ## Core Concepts
//!
//! - **Container**: an explicit value owned by the application; there is no
//!   global instance.
//! - **Descriptors**: registered directly, from bulk YAML/JSON documents
//!   ([`ServicesConfig`]) or by [`ServiceProvider`]s.
//! - **Snapshots**: a [`SnapshotCompiler`] writes the descriptor table to
//!   disk; a container built from the snapshot is frozen.
//! - **Cache**: a [`CacheStore`](cache::CacheStore) persists the table
//!   between runs so registration can be skipped on a warm start.
//!
//! ## Quick Start
//!
//! ```
//! use fibre_di::{Argument, Blueprint, Container, Param, ServiceDescriptor};
//! use std::sync::Arc;
//!
//! struct Database {
//!   dsn: String,
//! }
//!
//! struct UserRepository {
//!   db: Arc<Database>,
//! }
//!
//! # fn main() -> fibre_di::Result<()> {
//! let container = Container::new();
//!
//! container.define(
//!   Blueprint::new("app::Database", |args| Ok(Database { dsn: args.value("dsn")? }))
//!     .param(Param::new("dsn")),
//! );
//! container.define(
//!   Blueprint::new("app::UserRepository", |args| {
//!     Ok(UserRepository { db: args.service("db")? })
//!   })
//!   .param(Param::new("db").of_type("app::Database")),
//! );
//!
//! container.register(
//!   ServiceDescriptor::new("primary.db", "app::Database")
//!     .with_argument("dsn", Argument::literal("postgres://localhost/app")),
//! )?;
//! container.register(
//!   ServiceDescriptor::new("users", "app::UserRepository")
//!     .with_argument("db", Argument::reference("primary.db")),
//! )?;
//!
//! let users = container.resolve_as::<UserRepository>("users")?;
//! let db = container.resolve_as::<Database>("primary.db")?;
//! assert!(Arc::ptr_eq(&users.db, &db));
//! assert_eq!(db.dsn, "postgres://localhost/app");
//! # Ok(())
//! # }
//! ```

mod blueprint;
pub mod cache;
mod compiler;
mod config;
mod container;
mod core;
mod descriptor;
mod error;
mod event;
mod instance;
mod lazy;
mod provider;
mod registry;
mod resolver;

pub use blueprint::{Bindings, Blueprint, Bound, Param, Service, TypeCatalog};
pub use compiler::{CompiledSnapshot, SnapshotCompiler, SNAPSHOT_FORMAT_VERSION};
pub use config::{ServiceEntry, ServicesConfig};
pub use container::{Container, ContainerBuilder, CACHE_KEY, CACHE_TTL, CACHE_VERSION};
pub use descriptor::{Argument, Arguments, FactoryFn, ServiceDescriptor};
pub use error::{Error, Result};
pub use event::{ContainerEvent, EventDispatcher, EventSink, ListenerId, ServiceRegistered, ServiceResolved};
pub use instance::Instance;
pub use lazy::LazyService;
pub use provider::ServiceProvider;
pub use registry::{DuplicatePolicy, Registration, ServiceRegistry};
pub use resolver::ServiceFactory;
