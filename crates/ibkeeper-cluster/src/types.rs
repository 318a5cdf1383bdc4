use std::fmt;

/// Database engine behind an infobase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dbms {
  PostgreSql,
  MsSqlServer,
  IbmDb2,
  Oracle,
  Other(String),
}

impl Dbms {
  /// Parse the engine name as reported by the cluster.
  pub fn parse(name: &str) -> Self {
    match name.to_ascii_lowercase().as_str() {
      "postgresql" => Dbms::PostgreSql,
      "mssqlserver" => Dbms::MsSqlServer,
      "ibmdb2" => Dbms::IbmDb2,
      "oracledatabase" => Dbms::Oracle,
      _ => Dbms::Other(name.to_string()),
    }
  }
}

impl fmt::Display for Dbms {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dbms::PostgreSql => f.write_str("PostgreSQL"),
      Dbms::MsSqlServer => f.write_str("MSSQLServer"),
      Dbms::IbmDb2 => f.write_str("IBMDB2"),
      Dbms::Oracle => f.write_str("OracleDatabase"),
      Dbms::Other(name) => f.write_str(name),
    }
  }
}

/// Where an infobase keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
  pub name: String,
  pub dbms: Dbms,
  pub db_server: String,
  pub db_name: String,
  pub db_user: String,
}

/// Configuration loaded into an infobase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMetadata {
  pub config_name: String,
  pub config_version: String,
}

/// Parameters of a lock: the bypass code and the message users see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
  pub permission_code: String,
  pub message: String,
}
