//! The set of units one run targets.

use std::collections::HashSet;

use crate::result::TaskResult;

/// Units targeted by a run, in discovery order.
///
/// Names are unique ignoring ASCII case. A worklist is computed once at the
/// start of a run and not changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Worklist {
  units: Vec<String>,
}

impl Worklist {
  /// Build a worklist from units, dropping case-insensitive duplicates.
  pub fn new<I, S>(units: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut seen = HashSet::new();
    let units = units
      .into_iter()
      .map(Into::into)
      .filter(|unit: &String| seen.insert(unit.to_ascii_lowercase()))
      .collect();
    Self { units }
  }

  /// Apply the include/exclude policy to discovered units.
  ///
  /// A non-empty `include` keeps only the units it names and `exclude` is
  /// ignored. Otherwise every unit named by `exclude` is dropped. Names are
  /// compared case-insensitively.
  pub fn filter<I, S>(discovered: I, include: &[String], exclude: &[String]) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let contains = |list: &[String], unit: &str| list.iter().any(|n| n.eq_ignore_ascii_case(unit));
    let units = discovered.into_iter().map(Into::into).filter(|unit: &String| {
      if include.is_empty() {
        !contains(exclude, unit.as_str())
      } else {
        contains(include, unit.as_str())
      }
    });
    Self::new(units)
  }

  /// Keep at most the first `n` units.
  pub fn truncated(mut self, n: usize) -> Self {
    self.units.truncate(n);
    self
  }

  pub fn units(&self) -> &[String] {
    &self.units
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.units.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  pub fn contains(&self, unit: &str) -> bool {
    self.units.iter().any(|u| u == unit)
  }

  /// Units that have no result in `results`, in worklist order.
  pub fn missing_from(&self, results: &[TaskResult]) -> Vec<String> {
    let present: HashSet<&str> = results.iter().map(|r| r.unit_id.as_str()).collect();
    self
      .units
      .iter()
      .filter(|unit| !present.contains(unit.as_str()))
      .cloned()
      .collect()
  }
}
