use std::sync::Arc;

use async_trait::async_trait;
use ibkeeper_config::NotifySettings;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, instrument};

use crate::error::NotifyError;

const IMPLICIT_TLS_PORT: u16 = 465;

/// Delivers a run report to operators.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn send(&self, subject: &str, html: &str) -> Result<(), NotifyError>;
}

/// Used when notification is disabled; the report only goes to the log.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
  async fn send(&self, subject: &str, _html: &str) -> Result<(), NotifyError> {
    debug!(subject, "notification disabled");
    Ok(())
  }
}

/// Sends HTML mail over SMTP.
///
/// Port 465 uses implicit TLS, any other port STARTTLS.
pub struct SmtpNotifier {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  from: Mailbox,
  to: Vec<Mailbox>,
  subject_prefix: String,
}

impl SmtpNotifier {
  pub fn new(settings: &NotifySettings) -> Result<Self, NotifyError> {
    if settings.to.is_empty() {
      return Err(NotifyError::Configuration("no recipients".to_string()));
    }
    let from: Mailbox = settings.from.parse()?;
    let to = settings
      .to
      .iter()
      .map(|address| address.parse())
      .collect::<Result<Vec<Mailbox>, _>>()?;

    let builder = if settings.smtp_port == IMPLICIT_TLS_PORT {
      AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host)?
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)?
    };
    let mut builder = builder.port(settings.smtp_port);
    if !settings.user.is_empty() {
      builder = builder.credentials(Credentials::new(settings.user.clone(), settings.password.clone()));
    }

    Ok(Self {
      transport: builder.build(),
      from,
      to,
      subject_prefix: settings.subject_prefix.clone(),
    })
  }

  fn message(&self, subject: &str, html: &str) -> Result<Message, NotifyError> {
    let subject = if self.subject_prefix.is_empty() {
      subject.to_string()
    } else {
      format!("{} {}", self.subject_prefix, subject)
    };
    let mut builder = Message::builder().from(self.from.clone()).subject(subject);
    for to in &self.to {
      builder = builder.to(to.clone());
    }
    Ok(builder.header(ContentType::TEXT_HTML).body(html.to_string())?)
  }
}

#[async_trait]
impl Notifier for SmtpNotifier {
  #[instrument(skip_all, fields(subject = %subject))]
  async fn send(&self, subject: &str, html: &str) -> Result<(), NotifyError> {
    let message = self.message(subject, html)?;
    self.transport.send(message).await?;
    info!(recipients = self.to.len(), "report sent");
    Ok(())
  }
}

/// The notifier `settings` ask for.
pub fn notifier_for(settings: &NotifySettings) -> Result<Arc<dyn Notifier>, NotifyError> {
  if settings.enabled {
    Ok(Arc::new(SmtpNotifier::new(settings)?))
  } else {
    Ok(Arc::new(NoopNotifier))
  }
}
