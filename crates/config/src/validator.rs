use crate::*;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No databases defined under SQL_credentials")]
    NoDatabases,

    #[error("Database '{database}' is not defined under SQL_credentials")]
    UnknownDatabase { database: String },

    #[error("Database '{database}': required field {field} is missing")]
    MissingField { database: String, field: String },

    #[error("Database '{database}': port must be a positive integer")]
    InvalidPort { database: String },

    #[error("Database '{database}': invalid ssl mode '{value}'. Must be one of: disable, allow, prefer, require, verify-ca, verify-full")]
    InvalidSslMode { database: String, value: String },

    #[error("Database '{database}': {field} must be a positive integer")]
    InvalidPositiveInteger { database: String, field: String },

    #[error("Database '{database}': {field} references unset environment variable(s)")]
    UnresolvedEnvVar { database: String, field: String },

    #[error("Invalid log format '{0}'. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("insert_batch_size must be a positive integer")]
    InvalidBatchSize,

    #[error("Invalid identifier table name '{0}'. Expected 'table' or 'schema.table'")]
    InvalidIdentifierTable(String),
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

const VALID_SSL_MODES: [&str; 6] = [
    "disable",
    "allow",
    "prefer",
    "require",
    "verify-ca",
    "verify-full",
];

/// Validate the whole file: every database plus the `other` section.
pub fn validate_config(config: &DbUtilsConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    if config.sql_credentials.is_empty() {
        report.add_error(ValidationError::NoDatabases);
    }

    for (name, creds) in &config.sql_credentials {
        validate_credentials(name, creds, &mut report);
    }

    validate_other(config, &mut report);

    report
}

/// Validate only the entry a caller is about to connect to.
pub fn validate_database(config: &DbUtilsConfig, database_name: &str) -> ValidationReport {
    let mut report = ValidationReport::new();

    match config.credentials(database_name) {
        Some(creds) => validate_credentials(database_name, creds, &mut report),
        None => report.add_error(ValidationError::UnknownDatabase {
            database: database_name.to_string(),
        }),
    }

    report
}

fn validate_credentials(name: &str, creds: &DatabaseCredentials, report: &mut ValidationReport) {
    for field in creds.missing_fields() {
        report.add_error(ValidationError::MissingField {
            database: name.to_string(),
            field: field.to_string(),
        });
    }

    if creds.port == Some(0) {
        report.add_error(ValidationError::InvalidPort {
            database: name.to_string(),
        });
    }

    if !VALID_SSL_MODES.contains(&creds.ssl_mode.as_str()) {
        report.add_error(ValidationError::InvalidSslMode {
            database: name.to_string(),
            value: creds.ssl_mode.clone(),
        });
    }

    if creds.max_connections == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            database: name.to_string(),
            field: "max_connections".to_string(),
        });
    }

    if creds.connection_timeout_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            database: name.to_string(),
            field: "connection_timeout_seconds".to_string(),
        });
    }

    if creds.idle_timeout_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            database: name.to_string(),
            field: "idle_timeout_seconds".to_string(),
        });
    }

    let text_fields = [
        ("DB_HOST", &creds.host),
        ("DB_USER", &creds.user),
        ("DB_PASSWORD", &creds.password),
        ("DB_NAME", &creds.database),
    ];
    for (field, value) in text_fields {
        if value.as_deref().is_some_and(has_unresolved_env_vars) {
            report.add_error(ValidationError::UnresolvedEnvVar {
                database: name.to_string(),
                field: field.to_string(),
            });
        }
    }

    if creds.ssl_mode == "disable" {
        report.add_warning(
            &format!("SQL_credentials.{}.DB_SSLMODE", name),
            "TLS is disabled for this database",
        );
    }
}

fn table_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$")
            .expect("table name regex is valid")
    })
}

fn validate_other(config: &DbUtilsConfig, report: &mut ValidationReport) {
    let other = &config.other;

    if !["pretty", "json", "compact"].contains(&other.log_format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(other.log_format.clone()));
    }

    if other.insert_batch_size == 0 {
        report.add_error(ValidationError::InvalidBatchSize);
    }

    if !table_name_regex().is_match(&other.identifier_table) {
        report.add_error(ValidationError::InvalidIdentifierTable(
            other.identifier_table.clone(),
        ));
    }

    match other.log_dir {
        Some(ref dir) => {
            if !other.print_logs && dir.trim().is_empty() {
                report.add_warning("other.log_dir", "log_dir is empty and print_logs is off; logs are discarded");
            }
        }
        None => report.add_default("other.log_dir", "<stdout only>"),
    }

    if let Some(ref default_db) = other.default_database {
        if config.credentials(default_db).is_none() {
            report.add_error(ValidationError::UnknownDatabase {
                database: default_db.clone(),
            });
        }
    }
}
