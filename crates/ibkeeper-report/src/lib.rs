//! ibkeeper Report
//!
//! Turns a run's results into something operators read:
//!
//! - [`analyze`] counts successes and failures, finds missing units and
//!   computes the average duration; [`analyze_uploads`] adds transferred
//!   bytes and throughput.
//! - [`render_html`] renders the e-mail body.
//! - [`Notifier`] sends it; [`SmtpNotifier`] over SMTP, [`NoopNotifier`]
//!   when notification is disabled.

mod analysis;
mod error;
mod html;
mod notify;

pub use analysis::{FailedUnit, Summary, UploadSummary, analyze, analyze_uploads};
pub use error::{NotifyError, ReportError};
pub use html::render_html;
pub use notify::{NoopNotifier, Notifier, SmtpNotifier, notifier_for};
