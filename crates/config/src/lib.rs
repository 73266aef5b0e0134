use serde::de::{Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root configuration record.
///
/// The layout follows the `config.json` shape used by the Python `db_utils`
/// package, so existing files load unchanged:
///
/// ```json
/// {
///   "SQL_credentials": {
///     "analytics": {
///       "DB_HOST": "db.internal", "DB_PORT": 5432,
///       "DB_USER": "analyst", "DB_PASSWORD": "${ANALYTICS_PW}",
///       "DB_NAME": "analytics"
///     }
///   },
///   "other": { "log_dir": "/var/log/dbutils" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DbUtilsConfig {
    /// Credentials keyed by the logical database name callers pass to `initialize`.
    #[serde(rename = "SQL_credentials")]
    #[serde(default)]
    pub sql_credentials: BTreeMap<String, DatabaseCredentials>,
    #[serde(default)]
    pub other: OtherConfig,
}

impl DbUtilsConfig {
    /// Look up the credentials for a logical database name.
    pub fn credentials(&self, database_name: &str) -> Option<&DatabaseCredentials> {
        self.sql_credentials.get(database_name)
    }

    /// Names of every configured database, in sorted order.
    pub fn database_names(&self) -> Vec<&str> {
        self.sql_credentials.keys().map(String::as_str).collect()
    }
}

/// Connection settings for one database.
///
/// The five `DB_*` connection fields are optional at the serde level so that a
/// file with a missing key still parses; presence is enforced by
/// [`DatabaseCredentials::require`] and the validator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseCredentials {
    #[serde(rename = "DB_HOST")]
    #[serde(default)]
    pub host: Option<String>,
    #[serde(rename = "DB_PORT")]
    #[serde(default, deserialize_with = "deserialize_port", serialize_with = "serialize_port")]
    pub port: Option<u16>,
    #[serde(rename = "DB_USER")]
    #[serde(default)]
    pub user: Option<String>,
    #[serde(rename = "DB_PASSWORD")]
    #[serde(default)]
    pub password: Option<String>,
    #[serde(rename = "DB_NAME")]
    #[serde(default)]
    pub database: Option<String>,
    #[serde(rename = "DB_SSLMODE")]
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

/// Fully-populated connection parameters, produced once every required
/// field has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl DatabaseCredentials {
    /// Names of the required `DB_*` keys that are absent or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.host) {
            missing.push("DB_HOST");
        }
        if self.port.is_none() {
            missing.push("DB_PORT");
        }
        if is_blank(&self.user) {
            missing.push("DB_USER");
        }
        if self.password.is_none() {
            missing.push("DB_PASSWORD");
        }
        if is_blank(&self.database) {
            missing.push("DB_NAME");
        }
        missing
    }

    /// Resolve into concrete connection parameters.
    ///
    /// Returns the list of missing required keys on failure.
    pub fn require(&self) -> Result<ResolvedCredentials, Vec<&'static str>> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(ResolvedCredentials {
            host: self.host.clone().unwrap_or_default(),
            port: self.port.unwrap_or_else(default_postgres_port),
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            database: self.database.clone().unwrap_or_default(),
            ssl_mode: self.ssl_mode.clone(),
            max_connections: self.max_connections,
            connection_timeout_seconds: self.connection_timeout_seconds,
            idle_timeout_seconds: self.idle_timeout_seconds,
        })
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

/// Process-level settings that are not tied to a single database.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OtherConfig {
    /// Directory for the rotating log file. Logs go to stdout only when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Mirror log lines to stdout in addition to the log file.
    #[serde(default = "default_print_logs")]
    pub print_logs: bool,
    #[serde(default = "default_log_backup_count")]
    pub log_backup_count: usize,
    #[serde(default = "default_identifier_table")]
    pub identifier_table: String,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
    /// Database initialized by the CLI when `--database` is omitted.
    #[serde(default)]
    pub default_database: Option<String>,
    /// Port for the Prometheus exporter; metrics are not exported when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for OtherConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_format: default_log_format(),
            print_logs: default_print_logs(),
            log_backup_count: default_log_backup_count(),
            identifier_table: default_identifier_table(),
            insert_batch_size: default_insert_batch_size(),
            default_database: None,
            metrics_port: None,
        }
    }
}

/// `DB_PORT` shows up both as `5432` and `"5432"` in hand-written files.
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PortVisitor;

    impl<'de> Visitor<'de> for PortVisitor {
        type Value = Option<u16>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a port number or a numeric string")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u16::try_from(value)
                .map(Some)
                .map_err(|_| E::custom(format!("port out of range: {}", value)))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u16::try_from(value)
                .map(Some)
                .map_err(|_| E::custom(format!("port out of range: {}", value)))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<u16>()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid port: '{}'", value)))
        }
    }

    deserializer.deserialize_any(PortVisitor)
}

fn serialize_port<S>(port: &Option<u16>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match port {
        Some(p) => serializer.serialize_u16(*p),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_CONFIG: &str = r#"
{
    "SQL_credentials": {
        "analytics": {
            "DB_HOST": "db.internal",
            "DB_PORT": "5433",
            "DB_USER": "analyst",
            "DB_PASSWORD": "secret",
            "DB_NAME": "analytics"
        },
        "reference": {
            "DB_HOST": "ref.internal",
            "DB_PORT": 5432,
            "DB_USER": "reader",
            "DB_PASSWORD": "",
            "DB_NAME": "refdata",
            "DB_SSLMODE": "disable",
            "max_connections": 2
        }
    },
    "other": {
        "log_dir": "/tmp/dbutils-logs"
    }
}
"#;

    #[test]
    fn test_parse_legacy_json_config() {
        let config: DbUtilsConfig = serde_yaml::from_str(JSON_CONFIG).expect("Failed to parse");

        assert_eq!(config.database_names(), vec!["analytics", "reference"]);

        let analytics = config.credentials("analytics").unwrap();
        assert_eq!(analytics.host.as_deref(), Some("db.internal"));
        assert_eq!(analytics.port, Some(5433));
        assert_eq!(analytics.ssl_mode, "require");
        assert_eq!(analytics.max_connections, 5);

        let reference = config.credentials("reference").unwrap();
        assert_eq!(reference.port, Some(5432));
        assert_eq!(reference.ssl_mode, "disable");
        assert_eq!(reference.max_connections, 2);

        assert_eq!(config.other.log_dir.as_deref(), Some("/tmp/dbutils-logs"));
        assert_eq!(config.other.identifier_table, "instrument_identifiers");
        assert_eq!(config.other.log_backup_count, 3);
        assert!(config.other.print_logs);
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
SQL_credentials:
  main:
    DB_HOST: localhost
    DB_PORT: 5432
    DB_USER: postgres
    DB_PASSWORD: postgres
    DB_NAME: main
other:
  identifier_table: ref.instrument_identifiers
  insert_batch_size: 250
  default_database: main
"#;
        let config: DbUtilsConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");
        assert_eq!(config.other.identifier_table, "ref.instrument_identifiers");
        assert_eq!(config.other.insert_batch_size, 250);
        assert_eq!(config.other.default_database.as_deref(), Some("main"));
        assert!(config.other.log_dir.is_none());
    }

    #[test]
    fn test_require_reports_missing_fields() {
        let yaml = r#"
SQL_credentials:
  broken:
    DB_HOST: localhost
    DB_USER: ""
"#;
        let config: DbUtilsConfig = serde_yaml::from_str(yaml).unwrap();
        let creds = config.credentials("broken").unwrap();

        let missing = creds.require().unwrap_err();
        assert_eq!(missing, vec!["DB_PORT", "DB_USER", "DB_PASSWORD", "DB_NAME"]);
    }

    #[test]
    fn test_require_resolves_complete_credentials() {
        let config: DbUtilsConfig = serde_yaml::from_str(JSON_CONFIG).unwrap();
        let resolved = config.credentials("reference").unwrap().require().unwrap();

        assert_eq!(resolved.host, "ref.internal");
        assert_eq!(resolved.port, 5432);
        // An empty password is allowed, only its absence is an error.
        assert_eq!(resolved.password, "");
        assert_eq!(resolved.database, "refdata");
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let yaml = r#"
SQL_credentials:
  main:
    DB_PORT: "not-a-port"
"#;
        let result: Result<DbUtilsConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());

        let yaml = r#"
SQL_credentials:
  main:
    DB_PORT: 70000
"#;
        let result: Result<DbUtilsConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_sections_default() {
        let config: DbUtilsConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.sql_credentials.is_empty());
        assert_eq!(config.other.log_format, "pretty");
        assert_eq!(config.other.insert_batch_size, 1000);
    }
}
