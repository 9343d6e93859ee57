use fibre_di::{Argument, Blueprint, Container, Param, Result, ServiceDescriptor, ServiceProvider, ServicesConfig};
use std::sync::Arc;

const CONFIG: &str = r#"
services:
  mailer:
    class: app::Mailer
    arguments:
      host: smtp.example.com
      transport: "@transport.smtp"
"#;

trait Transport: Send + Sync {
  fn send(&self, to: &str, body: &str) -> String;
}

struct SmtpTransport {
  port: u16,
}

impl Transport for SmtpTransport {
  fn send(&self, to: &str, body: &str) -> String {
    format!("smtp:{} -> {}: {}", self.port, to, body)
  }
}

// Trait objects are stored as `Arc<dyn Transport>` inside the instance.
struct Mailer {
  host: String,
  transport: Arc<Arc<dyn Transport>>,
}

struct TransportProvider;

impl ServiceProvider for TransportProvider {
  fn name(&self) -> &str {
    "transport"
  }

  fn priority(&self) -> i32 {
    10
  }

  fn register(&self, container: &Container) -> Result<()> {
    container.define(
      Blueprint::new("app::SmtpTransport", |args| {
        let transport: Arc<dyn Transport> = Arc::new(SmtpTransport { port: args.value("port")? });
        Ok(transport)
      })
      .param(Param::new("port").with_default(25)),
    );
    container.register(
      ServiceDescriptor::new("transport.smtp", "app::SmtpTransport")
        .implements("app::Transport")
        .with_argument("port", Argument::literal(587)),
    )
  }
}

struct MailProvider;

impl ServiceProvider for MailProvider {
  fn name(&self) -> &str {
    "mail"
  }

  fn dependencies(&self) -> Vec<String> {
    vec!["transport".to_owned()]
  }

  fn register(&self, container: &Container) -> Result<()> {
    container.define(
      Blueprint::new("app::Mailer", |args| {
        Ok(Mailer {
          host: args.value("host")?,
          transport: args.service("transport")?,
        })
      })
      .param(Param::new("host"))
      .param(Param::new("transport").of_type("app::Transport")),
    );
    container.load_configuration(&ServicesConfig::from_yaml_str(CONFIG)?)
  }

  fn boot(&self, container: &Container) -> Result<()> {
    let mailer = container.resolve_as::<Mailer>("mailer")?;
    println!("Mailer booted against {}", mailer.host);
    Ok(())
  }
}

fn main() -> Result<()> {
  let container = Container::new();

  // Added out of order; the mail provider still runs after its dependency.
  container.add_provider(MailProvider)?;
  container.add_provider(TransportProvider)?;
  println!("Provider order: {:?}", container.provider_order());

  container.run_providers()?;

  let mailer = container.resolve_as::<Mailer>("mailer")?;
  println!("{}", mailer.transport.send("ops@example.com", "providers are up"));
  Ok(())
}
