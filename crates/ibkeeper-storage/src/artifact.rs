//! Artifact naming.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

/// Extension of platform exports.
pub const PLATFORM_EXTENSION: &str = "dt";
/// Extension of native database dumps.
pub const DUMP_EXTENSION: &str = "dump";

/// Directory holding one unit's artifacts under `root`.
pub fn unit_dir(root: &Path, unit: &str) -> PathBuf {
  root.join(unit)
}

/// `<unit>_<YYYY-MM-DD_HH-MM-SS>.<extension>`
pub fn file_name(unit: &str, taken_at: NaiveDateTime, extension: &str) -> String {
  format!("{}_{}.{}", unit, taken_at.format("%Y-%m-%d_%H-%M-%S"), extension)
}

/// Whether `file_name` is one of `unit`'s artifacts.
pub fn belongs_to(file_name: &str, unit: &str) -> bool {
  file_name
    .strip_prefix(unit)
    .is_some_and(|rest| rest.starts_with('_'))
}

/// Remote key prefix of one unit's artifacts, ending in `/`.
pub fn remote_prefix(prefix: &str, unit: &str) -> String {
  let prefix = prefix.trim_matches('/');
  if prefix.is_empty() {
    format!("{}/", unit)
  } else {
    format!("{}/{}/", prefix, unit)
  }
}

/// Remote key of one artifact.
pub fn object_key(prefix: &str, unit: &str, file_name: &str) -> String {
  format!("{}{}", remote_prefix(prefix, unit), file_name)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  #[test]
  fn test_file_name() {
    let at = NaiveDate::from_ymd_opt(2026, 3, 7)
      .unwrap()
      .and_hms_opt(1, 2, 3)
      .unwrap();
    assert_eq!(
      file_name("payroll", at, PLATFORM_EXTENSION),
      "payroll_2026-03-07_01-02-03.dt"
    );
  }

  #[test]
  fn test_belongs_to() {
    assert!(belongs_to("payroll_2026-03-07_01-02-03.dt", "payroll"));
    assert!(!belongs_to("payroll.dt", "payroll"));
    assert!(!belongs_to("stock_2026-03-07_01-02-03.dt", "payroll"));
  }

  #[test]
  fn test_object_key() {
    assert_eq!(object_key("/backups/", "payroll", "p.dt"), "backups/payroll/p.dt");
    assert_eq!(object_key("", "payroll", "p.dt"), "payroll/p.dt");
  }
}
