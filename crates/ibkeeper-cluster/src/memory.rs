//! In-memory cluster.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::control::ClusterControl;
use crate::error::ClusterError;
use crate::types::{LockRequest, UnitInfo, UnitMetadata};

/// Observable state of one in-memory unit.
#[derive(Debug, Clone)]
pub struct MemoryUnitState {
  pub info: UnitInfo,
  pub metadata: UnitMetadata,
  pub sessions_deny: bool,
  pub jobs_deny: bool,
  pub permission_code: String,
  pub denied_message: String,
  pub sessions: usize,
  pub lock_calls: usize,
  pub unlock_calls: usize,
  fail_lock: bool,
  fail_unlock: bool,
}

/// A cluster held in memory, for tests and dry runs.
///
/// Lock and unlock calls are counted and either can be made to fail per
/// unit, which is how lease compensation is exercised.
#[derive(Debug, Default)]
pub struct MemoryCluster {
  units: Mutex<BTreeMap<String, MemoryUnitState>>,
}

impl MemoryCluster {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a unit with an empty configuration version.
  pub fn add_unit(&self, info: UnitInfo) {
    let state = MemoryUnitState {
      metadata: UnitMetadata {
        config_name: String::new(),
        config_version: String::new(),
      },
      info: info.clone(),
      sessions_deny: false,
      jobs_deny: false,
      permission_code: String::new(),
      denied_message: String::new(),
      sessions: 0,
      lock_calls: 0,
      unlock_calls: 0,
      fail_lock: false,
      fail_unlock: false,
    };
    self.lock_units().insert(info.name, state);
  }

  pub fn set_metadata(&self, unit: &str, metadata: UnitMetadata) {
    self.update(unit, |state| state.metadata = metadata);
  }

  pub fn set_sessions(&self, unit: &str, sessions: usize) {
    self.update(unit, |state| state.sessions = sessions);
  }

  pub fn fail_lock(&self, unit: &str, fail: bool) {
    self.update(unit, |state| state.fail_lock = fail);
  }

  pub fn fail_unlock(&self, unit: &str, fail: bool) {
    self.update(unit, |state| state.fail_unlock = fail);
  }

  /// Snapshot of a unit's state.
  pub fn state(&self, unit: &str) -> Option<MemoryUnitState> {
    self.lock_units().get(unit).cloned()
  }

  fn lock_units(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MemoryUnitState>> {
    self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn update(&self, unit: &str, f: impl FnOnce(&mut MemoryUnitState)) {
    if let Some(state) = self.lock_units().get_mut(unit) {
      f(state);
    }
  }

  fn with_unit<T>(
    &self,
    unit: &str,
    f: impl FnOnce(&mut MemoryUnitState) -> Result<T, ClusterError>,
  ) -> Result<T, ClusterError> {
    let mut units = self.lock_units();
    let state = units
      .get_mut(unit)
      .ok_or_else(|| ClusterError::UnitNotFound(unit.to_string()))?;
    f(state)
  }
}

#[async_trait]
impl ClusterControl for MemoryCluster {
  async fn list_units(&self) -> Result<Vec<String>, ClusterError> {
    Ok(self.lock_units().keys().cloned().collect())
  }

  async fn lock(&self, unit: &str, request: &LockRequest) -> Result<(), ClusterError> {
    self.with_unit(unit, |state| {
      state.lock_calls += 1;
      if state.fail_lock {
        return Err(ClusterError::call("lock", "injected lock failure"));
      }
      state.sessions_deny = true;
      state.jobs_deny = true;
      state.permission_code = request.permission_code.clone();
      state.denied_message = request.message.clone();
      Ok(())
    })
  }

  async fn terminate_sessions(&self, unit: &str) -> Result<usize, ClusterError> {
    self.with_unit(unit, |state| Ok(std::mem::take(&mut state.sessions)))
  }

  async fn unlock(&self, unit: &str) -> Result<(), ClusterError> {
    self.with_unit(unit, |state| {
      state.unlock_calls += 1;
      if state.fail_unlock {
        return Err(ClusterError::call("unlock", "injected unlock failure"));
      }
      state.sessions_deny = false;
      state.jobs_deny = false;
      state.permission_code.clear();
      state.denied_message.clear();
      Ok(())
    })
  }

  async fn unit_info(&self, unit: &str) -> Result<UnitInfo, ClusterError> {
    self.with_unit(unit, |state| Ok(state.info.clone()))
  }

  async fn unit_metadata(
    &self,
    unit: &str,
    _user: &str,
    _password: &str,
  ) -> Result<UnitMetadata, ClusterError> {
    self.with_unit(unit, |state| Ok(state.metadata.clone()))
  }
}
