use std::time::Duration;

use ibkeeper_task::TaskResult;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::analysis::{Summary, UploadSummary};
use crate::error::ReportError;

// The `.html` name turns on auto-escaping of unit names and messages.
const TEMPLATE_NAME: &str = "report.html";

const TEMPLATE: &str = r#"<html>
<body style="font-family: sans-serif">
<h2>{{ title }}</h2>
<p><b>{{ headline }}</b></p>
<p>Started {{ started_at }}, finished {{ finished_at }} ({{ wall_time }}{% if average %}, {{ average }} per unit{% endif %}).</p>
{% if missing %}
<p style="color: #b00">No result for: {{ missing | join(", ") }}</p>
{% endif %}
{% if rows %}
<table border="1" cellpadding="4" cellspacing="0">
<tr><th>Unit</th><th>Status</th><th>Message</th><th>Duration</th></tr>
{% for row in rows %}
<tr{% if not row.succeeded %} style="background: #fdd"{% endif %}><td>{{ row.unit }}</td><td>{{ row.status }}</td><td>{{ row.message }}</td><td>{{ row.duration }}</td></tr>
{% endfor %}
</table>
{% endif %}
{% if uploads %}
<h3>Upload</h3>
<p><b>{{ uploads.headline }}</b></p>
<table border="1" cellpadding="4" cellspacing="0">
<tr><th>Unit</th><th>Status</th><th>Message</th><th>Duration</th></tr>
{% for row in uploads.rows %}
<tr{% if not row.succeeded %} style="background: #fdd"{% endif %}><td>{{ row.unit }}</td><td>{{ row.status }}</td><td>{{ row.message }}</td><td>{{ row.duration }}</td></tr>
{% endfor %}
</table>
{% endif %}
</body>
</html>
"#;

#[derive(Serialize)]
struct Row<'a> {
  unit: &'a str,
  succeeded: bool,
  status: &'static str,
  message: &'a str,
  duration: String,
}

#[derive(Serialize)]
struct UploadSection<'a> {
  headline: String,
  rows: Vec<Row<'a>>,
}

fn rows(results: &[TaskResult]) -> Vec<Row<'_>> {
  results
    .iter()
    .map(|result| Row {
      unit: &result.unit_id,
      succeeded: result.succeeded,
      status: if result.succeeded { "ok" } else { "FAILED" },
      message: &result.message,
      duration: format_duration(result.duration()),
    })
    .collect()
}

fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match (secs / 3600, secs % 3600 / 60, secs % 60) {
    (0, 0, s) => format!("{}s", s),
    (0, m, s) => format!("{}m {:02}s", m, s),
    (h, m, s) => format!("{}h {:02}m {:02}s", h, m, s),
  }
}

/// Render the e-mail body for a run: the outcome line, missing units, and a
/// table of per-unit results, followed by the upload stage when given.
pub fn render_html(
  title: &str,
  summary: &Summary,
  results: &[TaskResult],
  uploads: Option<(&UploadSummary, &[TaskResult])>,
) -> Result<String, ReportError> {
  let mut env = Environment::new();
  env.add_template(TEMPLATE_NAME, TEMPLATE)?;

  let uploads = uploads.map(|(upload_summary, upload_results)| UploadSection {
    headline: upload_summary.headline(),
    rows: rows(upload_results),
  });

  let template = env.get_template(TEMPLATE_NAME)?;
  let html = template.render(context! {
    title => title,
    headline => summary.headline(),
    started_at => summary.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    finished_at => summary.finished_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    wall_time => format_duration(summary.wall_time()),
    average => summary.average_duration.map(format_duration),
    missing => &summary.missing,
    rows => rows(results),
    uploads => uploads,
  })?;
  Ok(html)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::{analyze, analyze_uploads};
  use chrono::{TimeDelta, Utc};
  use ibkeeper_task::{TaskKind, Worklist, fields};

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(Duration::from_secs(7)), "7s");
    assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
    assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 61)), "3h 01m 01s");
  }

  #[test]
  fn test_report_lists_every_unit() {
    let start = Utc::now();
    let results = vec![
      TaskResult::success("a", TaskKind::Backup, "backed up"),
      TaskResult::failure("b", TaskKind::Backup, "exit status 1: <locked>"),
    ];
    let worklist = Worklist::new(["a", "b", "c"]);
    let summary = analyze(&results, &worklist, start, start + TimeDelta::seconds(20));

    let html = render_html("backup", &summary, &results, None).unwrap();

    assert!(html.contains("<h2>backup</h2>"));
    assert!(html.contains("1 succeeded; 1 failed; 1 missing"));
    assert!(html.contains("No result for: c"));
    assert!(html.contains("<td>a</td><td>ok</td>"));
    assert!(html.contains("<td>b</td><td>FAILED</td>"));
    assert!(html.contains("&lt;locked&gt;"));
    assert!(!html.contains("<h3>Upload</h3>"));
  }

  #[test]
  fn test_report_includes_uploads() {
    let start = Utc::now();
    let results = vec![TaskResult::success("a", TaskKind::Backup, "backed up")];
    let uploads = vec![TaskResult::success("a", TaskKind::Upload, "uploaded").with(fields::UPLOADED_BYTES, 10u64)];
    let summary = analyze(&results, &Worklist::new(["a"]), start, start);
    let upload_summary = analyze_uploads(&uploads);

    let html = render_html("backup", &summary, &results, Some((&upload_summary, &uploads))).unwrap();

    assert!(html.contains("<h3>Upload</h3>"));
    assert!(html.contains("<td>uploaded</td>"));
  }
}
