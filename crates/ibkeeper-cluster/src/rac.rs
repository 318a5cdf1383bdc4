//! Cluster transport over the `rac` administration utility.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ibkeeper_command::{CommandExecutor, CommandSpec};
use ibkeeper_config::{Credential, CredentialSettings, Settings};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xmlparser::{ElementEnd, Token, Tokenizer};

use crate::control::ClusterControl;
use crate::error::ClusterError;
use crate::platform::Designer;
use crate::types::{Dbms, LockRequest, UnitInfo, UnitMetadata};

/// Unit label used for log lines of cluster-wide calls.
const CLUSTER_SCOPE: &str = "cluster";

/// Talks to the cluster through `rac`, one process per call.
///
/// Cluster and infobase ids are resolved lazily and cached for the lifetime
/// of the client. Configuration metadata is read by dumping the
/// `Configuration` object with the platform designer.
///
/// `rac` calls ignore run cancellation and are bounded by the call timeout
/// alone, so unlocks issued while the run is interrupted still reach the
/// cluster. Only the designer dump stops on cancellation.
pub struct RacClient {
  rac_path: PathBuf,
  address: String,
  admin: Option<Credential>,
  platform_path: PathBuf,
  server: String,
  credentials: CredentialSettings,
  call_timeout: Duration,
  metadata_timeout: Duration,
  work_dir: PathBuf,
  executor: Arc<dyn CommandExecutor>,
  /// Run cancellation, for the designer dump.
  cancel: CancellationToken,
  /// Never cancelled.
  transport: CancellationToken,
  cluster_id: OnceCell<String>,
  infobase_ids: Mutex<HashMap<String, String>>,
}

impl RacClient {
  pub fn new(settings: &Settings, executor: Arc<dyn CommandExecutor>, cancel: CancellationToken) -> Self {
    Self {
      rac_path: settings.cluster.rac_path.clone(),
      address: settings.cluster.address.clone(),
      admin: settings.cluster.admin.clone(),
      platform_path: settings.cluster.platform_path.clone(),
      server: settings.cluster.server.clone(),
      credentials: settings.credentials.clone(),
      call_timeout: settings.cluster.call_timeout(),
      metadata_timeout: settings.update.timeout(),
      work_dir: std::env::temp_dir(),
      executor,
      cancel,
      transport: CancellationToken::new(),
      cluster_id: OnceCell::new(),
      infobase_ids: Mutex::new(HashMap::new()),
    }
  }

  /// Run one `rac` call and return its output.
  async fn rac(&self, operation: &str, unit: &str, args: Vec<String>) -> Result<String, ClusterError> {
    let spec = CommandSpec::new(&self.rac_path, self.call_timeout)
      .arg(&self.address)
      .args(args);
    let output = self
      .executor
      .execute(unit, &spec, &self.transport)
      .await
      .map_err(|e| ClusterError::call(operation, e.to_string()))?;
    Ok(output.output)
  }

  fn cluster_auth(&self) -> Vec<String> {
    match &self.admin {
      Some(admin) => vec![
        format!("--cluster-user={}", admin.user),
        format!("--cluster-pwd={}", admin.password),
      ],
      None => Vec::new(),
    }
  }

  fn infobase_auth(&self, unit: &str) -> Vec<String> {
    let credential = self.credentials.for_unit(unit);
    vec![
      format!("--infobase-user={}", credential.user),
      format!("--infobase-pwd={}", credential.password),
    ]
  }

  async fn cluster_id(&self) -> Result<&str, ClusterError> {
    let id = self
      .cluster_id
      .get_or_try_init(|| async {
        let output = self
          .rac("cluster list", CLUSTER_SCOPE, vec!["cluster".into(), "list".into()])
          .await?;
        let id = parse_records(&output)
          .into_iter()
          .find_map(|mut record| record.remove("cluster"))
          .ok_or_else(|| ClusterError::protocol("cluster list", "no cluster reported"))?;
        debug!(cluster_id = %id, "cluster resolved");
        Ok::<_, ClusterError>(id)
      })
      .await?;
    Ok(id.as_str())
  }

  fn scoped(&self, cluster_id: &str, command: &[&str]) -> Vec<String> {
    let mut args: Vec<String> = command.iter().map(|s| s.to_string()).collect();
    args.push(format!("--cluster={}", cluster_id));
    args.extend(self.cluster_auth());
    args
  }

  /// `(name, id)` of every infobase, refreshing the id cache.
  async fn summaries(&self) -> Result<Vec<(String, String)>, ClusterError> {
    let cluster_id = self.cluster_id().await?;
    let output = self
      .rac(
        "infobase summary list",
        CLUSTER_SCOPE,
        self.scoped(cluster_id, &["infobase", "summary", "list"]),
      )
      .await?;

    let summaries: Vec<(String, String)> = parse_records(&output)
      .into_iter()
      .filter_map(|mut record| Some((record.remove("name")?, record.remove("infobase")?)))
      .collect();

    let mut ids = self.infobase_ids.lock().unwrap_or_else(|p| p.into_inner());
    for (name, id) in &summaries {
      ids.insert(name.to_ascii_lowercase(), id.clone());
    }
    Ok(summaries)
  }

  async fn infobase_id(&self, unit: &str) -> Result<String, ClusterError> {
    let cached = self
      .infobase_ids
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .get(&unit.to_ascii_lowercase())
      .cloned();
    if let Some(id) = cached {
      return Ok(id);
    }
    self
      .summaries()
      .await?
      .into_iter()
      .find(|(name, _)| name.eq_ignore_ascii_case(unit))
      .map(|(_, id)| id)
      .ok_or_else(|| ClusterError::UnitNotFound(unit.to_string()))
  }

  async fn update_infobase(
    &self,
    operation: &str,
    unit: &str,
    flags: Vec<String>,
  ) -> Result<(), ClusterError> {
    let cluster_id = self.cluster_id().await?;
    let infobase_id = self.infobase_id(unit).await?;
    let mut args = self.scoped(cluster_id, &["infobase", "update"]);
    args.push(format!("--infobase={}", infobase_id));
    args.extend(self.infobase_auth(unit));
    args.extend(flags);
    self.rac(operation, unit, args).await.map(|_| ())
  }
}

#[async_trait]
impl ClusterControl for RacClient {
  async fn list_units(&self) -> Result<Vec<String>, ClusterError> {
    Ok(
      self
        .summaries()
        .await?
        .into_iter()
        .map(|(name, _)| name)
        .collect(),
    )
  }

  async fn lock(&self, unit: &str, request: &LockRequest) -> Result<(), ClusterError> {
    self
      .update_infobase(
        "lock",
        unit,
        vec![
          "--sessions-deny=on".to_string(),
          "--scheduled-jobs-deny=on".to_string(),
          format!("--permission-code={}", request.permission_code),
          format!("--denied-message={}", request.message),
        ],
      )
      .await
  }

  async fn terminate_sessions(&self, unit: &str) -> Result<usize, ClusterError> {
    let cluster_id = self.cluster_id().await?;
    let infobase_id = self.infobase_id(unit).await?;

    let mut args = self.scoped(cluster_id, &["session", "list"]);
    args.push(format!("--infobase={}", infobase_id));
    let output = self.rac("session list", unit, args).await?;
    let sessions: Vec<String> = parse_records(&output)
      .into_iter()
      .filter_map(|mut record| record.remove("session"))
      .collect();

    let mut terminated = 0;
    for session in &sessions {
      let mut args = self.scoped(cluster_id, &["session", "terminate"]);
      args.push(format!("--session={}", session));
      match self.rac("session terminate", unit, args).await {
        Ok(_) => terminated += 1,
        // The session may have ended on its own since it was listed.
        Err(e) => warn!(unit = %unit, session = %session, error = %e, "failed to terminate session"),
      }
    }
    info!(unit = %unit, listed = sessions.len(), terminated, "sessions terminated");
    Ok(terminated)
  }

  async fn unlock(&self, unit: &str) -> Result<(), ClusterError> {
    self
      .update_infobase(
        "unlock",
        unit,
        vec![
          "--sessions-deny=off".to_string(),
          "--scheduled-jobs-deny=off".to_string(),
          "--permission-code=".to_string(),
          "--denied-message=".to_string(),
        ],
      )
      .await
  }

  async fn unit_info(&self, unit: &str) -> Result<UnitInfo, ClusterError> {
    let cluster_id = self.cluster_id().await?;
    let infobase_id = self.infobase_id(unit).await?;
    let mut args = self.scoped(cluster_id, &["infobase", "info"]);
    args.push(format!("--infobase={}", infobase_id));
    args.extend(self.infobase_auth(unit));

    let output = self.rac("infobase info", unit, args).await?;
    let mut record = parse_records(&output)
      .into_iter()
      .next()
      .ok_or_else(|| ClusterError::protocol("infobase info", "empty response"))?;
    let mut field = |key: &str| record.remove(key).unwrap_or_default();

    Ok(UnitInfo {
      name: unit.to_string(),
      dbms: Dbms::parse(&field("dbms")),
      db_server: field("db-server"),
      db_name: field("db-name"),
      db_user: field("db-user"),
    })
  }

  async fn unit_metadata(
    &self,
    unit: &str,
    user: &str,
    password: &str,
  ) -> Result<UnitMetadata, ClusterError> {
    let scratch = self
      .work_dir
      .join(format!("ibkeeper-metadata-{}", uuid::Uuid::new_v4()));
    let result = self.dump_metadata(&scratch, unit, user, password).await;
    if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
      debug!(path = %scratch.display(), error = %e, "failed to remove metadata scratch dir");
    }
    result
  }
}

impl RacClient {
  async fn dump_metadata(
    &self,
    scratch: &std::path::Path,
    unit: &str,
    user: &str,
    password: &str,
  ) -> Result<UnitMetadata, ClusterError> {
    let io_err = |e: std::io::Error| ClusterError::call("unit metadata", e.to_string());
    let dump_dir = scratch.join("cfg");
    let list_file = scratch.join("objects.txt");
    tokio::fs::create_dir_all(&dump_dir).await.map_err(io_err)?;
    tokio::fs::write(&list_file, "Configuration\n")
      .await
      .map_err(io_err)?;

    let designer = Designer::new(
      &self.platform_path,
      &self.server,
      unit,
      &Credential::new(user, password),
      scratch.join("designer.log"),
      self.metadata_timeout,
    );
    self
      .executor
      .execute(unit, &designer.dump_config_objects(&dump_dir, &list_file), &self.cancel)
      .await
      .map_err(|e| ClusterError::call("unit metadata", e.to_string()))?;

    let xml = tokio::fs::read_to_string(dump_dir.join("Configuration.xml"))
      .await
      .map_err(io_err)?;
    parse_configuration_xml(&xml)
  }
}

/// Parse `rac` output into records.
///
/// Records are separated by blank lines; each line is `key : value`.
/// Quoted values are unquoted.
pub fn parse_records(output: &str) -> Vec<HashMap<String, String>> {
  let mut records = Vec::new();
  let mut current = HashMap::new();

  for line in output.lines() {
    if line.trim().is_empty() {
      if !current.is_empty() {
        records.push(std::mem::take(&mut current));
      }
      continue;
    }
    let Some((key, value)) = line.split_once(':') else {
      continue;
    };
    let value = value.trim();
    let value = value
      .strip_prefix('"')
      .and_then(|v| v.strip_suffix('"'))
      .unwrap_or(value);
    current.insert(key.trim().to_string(), value.replace("\"\"", "\""));
  }
  if !current.is_empty() {
    records.push(current);
  }
  records
}

/// Read `Name` and `Version` from the `Properties` of a dumped
/// `Configuration.xml`.
///
/// Only the direct children of `Configuration/Properties` count; elements of
/// the same name elsewhere in the document are ignored.
fn parse_configuration_xml(xml: &str) -> Result<UnitMetadata, ClusterError> {
  let mut path: Vec<&str> = Vec::new();
  let mut config_name = None;
  let mut config_version = None;

  for token in Tokenizer::from(xml) {
    let token = token.map_err(|e| ClusterError::protocol("unit metadata", e.to_string()))?;
    match token {
      Token::ElementStart { local, .. } => path.push(local.as_str()),
      Token::ElementEnd { end, .. } => match end {
        ElementEnd::Open => {}
        ElementEnd::Close(..) => {
          path.pop();
        }
        ElementEnd::Empty => {
          if property(&path) == Some("Version") {
            config_version.get_or_insert_with(String::new);
          }
          path.pop();
        }
      },
      Token::Text { text } => {
        let value = text.as_str().trim().to_string();
        match property(&path) {
          Some("Name") => {
            config_name.get_or_insert(value);
          }
          Some("Version") => {
            config_version.get_or_insert(value);
          }
          _ => {}
        }
      }
      _ => {}
    }
  }

  let config_name = config_name
    .filter(|name| !name.is_empty())
    .ok_or_else(|| ClusterError::protocol("unit metadata", "configuration name missing"))?;
  Ok(UnitMetadata {
    config_name,
    config_version: config_version.unwrap_or_default(),
  })
}

/// Name of the configuration property `path` points into, if any.
fn property<'a>(path: &[&'a str]) -> Option<&'a str> {
  match path {
    [.., "Configuration", "Properties", name] => Some(*name),
    _ => None,
  }
}
