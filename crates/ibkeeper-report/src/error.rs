/// Errors rendering a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
  #[error("failed to render report: {0}")]
  Render(#[from] minijinja::Error),
}

/// Errors sending a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
  #[error("invalid e-mail address: {0}")]
  Address(#[from] lettre::address::AddressError),

  #[error("failed to build message: {0}")]
  Message(#[from] lettre::error::Error),

  #[error("smtp error: {0}")]
  Smtp(#[from] lettre::transport::smtp::Error),

  #[error("notification misconfigured: {0}")]
  Configuration(String),
}
