use std::time::Duration;

use chrono::{DateTime, Utc};
use ibkeeper_task::{TaskResult, Worklist, fields};
use serde::Serialize;
use tracing::{error, info, warn};

const MEGABYTE: f64 = 1024.0 * 1024.0;

/// A unit whose work failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnit {
  pub unit: String,
  pub message: String,
}

/// Aggregate view of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
  /// Units the run was asked to process.
  pub planned: usize,
  pub succeeded: usize,
  pub failed: Vec<FailedUnit>,
  /// Worklist members that produced no result at all.
  pub missing: Vec<String>,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  /// Wall time divided by the number of results; `None` when nothing ran.
  #[serde(skip)]
  pub average_duration: Option<Duration>,
}

impl Summary {
  pub fn nothing_done(&self) -> bool {
    self.succeeded == 0 && self.failed.is_empty()
  }

  pub fn wall_time(&self) -> Duration {
    (self.finished_at - self.started_at)
      .to_std()
      .unwrap_or_default()
  }

  /// One-line outcome, e.g. `2 succeeded; 1 failed`.
  pub fn headline(&self) -> String {
    let mut line = if self.nothing_done() {
      "nothing done".to_string()
    } else {
      format!("{} succeeded; {} failed", self.succeeded, self.failed.len())
    };
    if !self.missing.is_empty() {
      line.push_str(&format!("; {} missing", self.missing.len()));
    }
    line
  }
}

/// Summarize `results` of a run over `worklist`.
///
/// Failed units and missing units are logged as they are found.
pub fn analyze(
  results: &[TaskResult],
  worklist: &Worklist,
  started_at: DateTime<Utc>,
  finished_at: DateTime<Utc>,
) -> Summary {
  let mut succeeded = 0;
  let mut failed = Vec::new();
  for result in results {
    if result.succeeded {
      succeeded += 1;
    } else {
      error!(unit = %result.unit_id, kind = %result.kind, message = %result.message, "unit failed");
      failed.push(FailedUnit {
        unit: result.unit_id.clone(),
        message: result.message.clone(),
      });
    }
  }

  let missing = worklist.missing_from(results);
  if !missing.is_empty() {
    warn!(count = missing.len(), units = ?missing, "units produced no result");
  }

  let wall = (finished_at - started_at).to_std().unwrap_or_default();
  let average_duration = u32::try_from(results.len())
    .ok()
    .filter(|n| *n > 0)
    .map(|n| wall / n);

  let summary = Summary {
    planned: worklist.len(),
    succeeded,
    failed,
    missing,
    started_at,
    finished_at,
    average_duration,
  };
  match summary.average_duration {
    Some(average) => info!(
      outcome = %summary.headline(),
      wall_secs = wall.as_secs_f64(),
      average_secs = average.as_secs_f64(),
      "run analyzed"
    ),
    None => info!("nothing done"),
  }
  summary
}

/// Aggregate view of the upload stage.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
  pub succeeded: usize,
  pub failed: Vec<FailedUnit>,
  pub total_bytes: u64,
  /// Megabytes per second over the stage's wall time; `None` when nothing
  /// was transferred or no time elapsed.
  pub throughput_mb_s: Option<f64>,
}

impl UploadSummary {
  pub fn headline(&self) -> String {
    let mut line = format!(
      "{} uploaded ({:.1} MB); {} failed",
      self.succeeded,
      self.total_bytes as f64 / MEGABYTE,
      self.failed.len()
    );
    if let Some(rate) = self.throughput_mb_s {
      line.push_str(&format!("; {:.2} MB/s", rate));
    }
    line
  }
}

/// Sum transferred bytes over successful uploads and derive throughput.
///
/// Uploads run concurrently, so the rate is taken over the span from the
/// earliest start to the latest finish rather than over summed durations.
pub fn analyze_uploads(results: &[TaskResult]) -> UploadSummary {
  let mut succeeded = 0;
  let mut failed = Vec::new();
  let mut total_bytes = 0u64;
  let mut span: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

  for result in results {
    if !result.succeeded {
      failed.push(FailedUnit {
        unit: result.unit_id.clone(),
        message: result.message.clone(),
      });
      continue;
    }
    succeeded += 1;
    total_bytes += result.extra_u64(fields::UPLOADED_BYTES).unwrap_or(0);
    span = Some(match span {
      None => (result.started_at, result.finished_at),
      Some((first, last)) => (first.min(result.started_at), last.max(result.finished_at)),
    });
  }

  let throughput_mb_s = span
    .and_then(|(first, last)| (last - first).to_std().ok())
    .map(|elapsed| elapsed.as_secs_f64())
    .filter(|secs| *secs > 0.0 && total_bytes > 0)
    .map(|secs| total_bytes as f64 / MEGABYTE / secs);

  let summary = UploadSummary {
    succeeded,
    failed,
    total_bytes,
    throughput_mb_s,
  };
  info!(outcome = %summary.headline(), "uploads analyzed");
  summary
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeDelta;
  use ibkeeper_task::TaskKind;

  fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T02:00:00Z")
      .unwrap()
      .with_timezone(&Utc)
  }

  #[test]
  fn test_missing_units_detected() {
    let worklist = Worklist::new(["a", "b", "c"]);
    let results = vec![
      TaskResult::success("a", TaskKind::Backup, "ok"),
      TaskResult::success("c", TaskKind::Backup, "ok"),
    ];

    let summary = analyze(&results, &worklist, t0(), t0() + TimeDelta::seconds(60));

    assert_eq!(summary.missing, vec!["b".to_string()]);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.headline(), "2 succeeded; 0 failed; 1 missing");
    assert_eq!(summary.average_duration, Some(Duration::from_secs(30)));
  }

  #[test]
  fn test_failures_counted() {
    let worklist = Worklist::new(["a", "b", "c"]);
    let results = vec![
      TaskResult::success("a", TaskKind::Backup, "ok"),
      TaskResult::failure("b", TaskKind::Backup, "exit status 1"),
      TaskResult::success("c", TaskKind::Backup, "ok"),
    ];

    let summary = analyze(&results, &worklist, t0(), t0() + TimeDelta::seconds(90));

    assert_eq!(summary.headline(), "2 succeeded; 1 failed");
    assert_eq!(
      summary.failed,
      vec![FailedUnit {
        unit: "b".to_string(),
        message: "exit status 1".to_string(),
      }]
    );
    assert!(summary.missing.is_empty());
  }

  #[test]
  fn test_empty_run_reports_nothing_done() {
    let summary = analyze(&[], &Worklist::new(Vec::<String>::new()), t0(), t0());

    assert!(summary.nothing_done());
    assert_eq!(summary.average_duration, None);
    assert_eq!(summary.headline(), "nothing done");
  }

  #[test]
  fn test_upload_throughput() {
    let mut first = TaskResult::success("a", TaskKind::Upload, "ok").with(fields::UPLOADED_BYTES, 3 * 1024 * 1024u64);
    first.started_at = t0();
    first.finished_at = t0() + TimeDelta::seconds(2);
    let mut second = TaskResult::success("c", TaskKind::Upload, "ok").with(fields::UPLOADED_BYTES, 1024 * 1024u64);
    second.started_at = t0() + TimeDelta::seconds(1);
    second.finished_at = t0() + TimeDelta::seconds(4);
    let failed = TaskResult::failure("b", TaskKind::Upload, "denied");

    let summary = analyze_uploads(&[first, second, failed]);

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.total_bytes, 4 * 1024 * 1024);
    let rate = summary.throughput_mb_s.unwrap();
    assert!((rate - 1.0).abs() < 1e-9, "{}", rate);
  }

  #[test]
  fn test_upload_without_successes_has_no_rate() {
    let summary = analyze_uploads(&[TaskResult::failure("a", TaskKind::Upload, "denied")]);
    assert_eq!(summary.total_bytes, 0);
    assert!(summary.throughput_mb_s.is_none());
  }
}
