#![allow(dead_code)]

use fibre_di::{Argument, Blueprint, Container, ContainerEvent, Instance, Param, ServiceDescriptor, TypeCatalog};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// --- Type names used in descriptors ---

pub const DATABASE: &str = "app::Database";
pub const USER_REPOSITORY: &str = "app::UserRepository";
pub const LOGGER: &str = "app::Logger";
pub const LOGGER2: &str = "app::Logger2";
pub const LOGGER_INTERFACE: &str = "app::LoggerInterface";
pub const MAILER: &str = "app::Mailer";
pub const NODE: &str = "app::Node";
pub const COUNTED: &str = "app::Counted";

// --- Fixtures ---

#[derive(Debug)]
pub struct Database {
  pub dsn: String,
}

#[derive(Debug)]
pub struct UserRepository {
  pub db: Arc<Database>,
}

#[derive(Debug)]
pub struct Logger {
  pub channel: String,
}

#[derive(Debug)]
pub struct Logger2;

#[derive(Debug)]
pub struct Mailer {
  pub host: String,
  pub port: u16,
  pub logger: Option<Instance>,
}

// Depends on whatever its `next` argument references.
#[derive(Debug)]
pub struct Node {
  pub next: Instance,
}

#[derive(Debug)]
pub struct Counted {
  pub serial: usize,
}

/// A catalog with blueprints for every fixture type except `Counted`.
pub fn catalog() -> Arc<TypeCatalog> {
  let catalog = TypeCatalog::new();
  catalog.define(
    Blueprint::new(DATABASE, |args| Ok(Database { dsn: args.value("dsn")? }))
      .param(Param::new("dsn").with_default("sqlite::memory:")),
  );
  catalog.define(
    Blueprint::new(USER_REPOSITORY, |args| {
      Ok(UserRepository { db: args.service("db")? })
    })
    .param(Param::new("db").of_type(DATABASE)),
  );
  catalog.define(
    Blueprint::new(LOGGER, |args| {
      Ok(Logger {
        channel: args.value("channel")?,
      })
    })
    .param(Param::new("channel").with_default("app")),
  );
  catalog.define(Blueprint::new(LOGGER2, |_| Ok(Logger2)));
  catalog.define(
    Blueprint::new(MAILER, |args| {
      Ok(Mailer {
        host: args.value("host")?,
        port: args.value("port")?,
        logger: None,
      })
    })
    .param(Param::new("host"))
    .param(Param::new("port").with_default(25))
    .inject("logger", LOGGER_INTERFACE, |mailer: &mut Mailer, logger| {
      mailer.logger = Some(logger);
      Ok(())
    }),
  );
  catalog.define(
    Blueprint::new(NODE, |args| Ok(Node { next: args.instance("next")? })).param(Param::new("next")),
  );
  Arc::new(catalog)
}

/// Defines the `Counted` blueprint; every construction bumps `counter`.
pub fn define_counted(catalog: &TypeCatalog, counter: Arc<AtomicUsize>) {
  catalog.define(Blueprint::new(COUNTED, move |_| {
    let serial = counter.fetch_add(1, Ordering::SeqCst);
    // Widen the window in which concurrent first accesses race.
    std::thread::sleep(std::time::Duration::from_millis(20));
    Ok(Counted { serial })
  }));
}

pub fn container() -> Container {
  Container::builder().catalog(catalog()).build()
}

pub fn database(id: &str, dsn: &str) -> ServiceDescriptor {
  ServiceDescriptor::new(id, DATABASE).with_argument("dsn", Argument::literal(dsn))
}

pub fn user_repository(id: &str, db: &str) -> ServiceDescriptor {
  ServiceDescriptor::new(id, USER_REPOSITORY).with_argument("db", Argument::reference(db))
}

pub fn node(id: &str, next: &str) -> ServiceDescriptor {
  ServiceDescriptor::new(id, NODE).with_argument("next", Argument::reference(next))
}

/// An event sink that records the names and ids of everything it sees.
#[derive(Default)]
pub struct Recorder {
  pub events: Mutex<Vec<ContainerEvent>>,
}

impl Recorder {
  pub fn record(&self, event: &ContainerEvent) {
    self.events.lock().push(event.clone());
  }

  pub fn summary(&self) -> Vec<(String, String)> {
    self
      .events
      .lock()
      .iter()
      .map(|event| {
        let id = match event {
          ContainerEvent::Registered(e) => e.id.clone(),
          ContainerEvent::Resolved(e) => e.id.clone(),
        };
        (event.name().to_owned(), id)
      })
      .collect()
  }
}
