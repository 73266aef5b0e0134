use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Load a configuration file.
///
/// JSON files are accepted as-is since the YAML parser reads JSON documents.
/// `${VAR}` placeholders are substituted from the environment before parsing.
#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DbUtilsConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    parse_config(&content)
}

/// Parse configuration text (YAML or JSON).
pub fn parse_config(content: &str) -> Result<DbUtilsConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: DbUtilsConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse configuration")?;

    info!(
        databases = config.sql_credentials.len(),
        "Configuration loaded successfully"
    );
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> DbUtilsConfig {
    let mut config = DbUtilsConfig::default();

    config.sql_credentials.insert(
        "main".to_string(),
        DatabaseCredentials {
            host: Some("localhost".to_string()),
            port: Some(default_postgres_port()),
            user: Some("postgres".to_string()),
            password: Some("${DB_PASSWORD}".to_string()),
            database: Some("main".to_string()),
            ssl_mode: default_ssl_mode(),
            max_connections: default_max_connections(),
            connection_timeout_seconds: default_connection_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        },
    );
    config.other.log_dir = Some("logs".to_string());
    config.other.default_database = Some("main".to_string());

    config
}

/// Write a configuration file; `.json` paths get JSON, anything else YAML.
#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &DbUtilsConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let rendered = if is_json {
        serde_json::to_string_pretty(config)
            .with_context(|| "Failed to serialize configuration to JSON")?
    } else {
        serde_yaml::to_string(config)
            .with_context(|| "Failed to serialize configuration to YAML")?
    };

    fs::write(path, rendered)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_default_config() {
        let config = generate_default_config();

        assert_eq!(config.database_names(), vec!["main"]);
        assert_eq!(config.other.default_database.as_deref(), Some("main"));
        let creds = config.credentials("main").unwrap();
        assert_eq!(creds.port, Some(5432));
        assert!(creds.missing_fields().is_empty());
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = generate_default_config();
        config
            .sql_credentials
            .get_mut("main")
            .unwrap()
            .password = Some("plain".to_string());
        save_config(&config, &path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.trim_start().starts_with('{'));
        assert!(raw.contains("\"SQL_credentials\""));

        let loaded = load_config(&path).unwrap();
        let creds = loaded.credentials("main").unwrap();
        assert_eq!(creds.password.as_deref(), Some("plain"));
        assert_eq!(creds.port, Some(5432));
    }

    #[test]
    fn test_save_yaml_for_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbutils.yaml");

        save_config(&generate_default_config(), &path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("SQL_credentials:"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("nope.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_substitutes_environment() {
        std::env::set_var("DBUTILS_PARSER_TEST_HOST", "pg.example.com");
        let config = parse_config(
            r#"{"SQL_credentials": {"main": {"DB_HOST": "${DBUTILS_PARSER_TEST_HOST}"}}}"#,
        )
        .unwrap();

        assert_eq!(
            config.credentials("main").unwrap().host.as_deref(),
            Some("pg.example.com")
        );
    }

    #[test]
    fn test_dollar_in_password_loads_unchanged() {
        std::env::set_var("DBUTILS_PARSER_TEST_WORD", "rewritten");
        let config = parse_config(
            r#"{"SQL_credentials": {"main": {
                "DB_HOST": "localhost", "DB_PORT": 5432, "DB_USER": "postgres",
                "DB_PASSWORD": "pa$DBUTILS_PARSER_TEST_WORD", "DB_NAME": "main"
            }}}"#,
        )
        .unwrap();

        assert_eq!(
            config.credentials("main").unwrap().password.as_deref(),
            Some("pa$DBUTILS_PARSER_TEST_WORD")
        );
        let report = validate_database(&config, "main");
        assert!(report.is_valid(), "{:?}", report.errors);
    }
}
