//! dbutils admin binary
//!
//! Drives the client from the shell: validate or create a configuration
//! file, check a database connection, load a CSV into a table, and query the
//! identifier table.

use anyhow::{Context, Result};
use cli::{Cli, Commands, ConnectionArgs};
use config::{generate_default_config, load_config, save_config, validate_config, DbUtilsConfig};
use observability::{init_default_logging, init_logging, init_metrics, LogFormat, LogOptions};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use storage::{CellValue, DbClient, IdentifierQuery, InsertOptions};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Validate { config } => {
            init_default_logging("dbutil")?;
            info!("Executing 'validate' command");
            validate_command(config)
        }
        Commands::Init { output } => {
            init_default_logging("dbutil")?;
            info!("Executing 'init' command");
            init_command(output)
        }
        Commands::Ping { connection } => {
            let (client, database) = connect(&connection).await?;
            info!("Executing 'ping' command");
            println!("[ok] Connected to '{}'", database);
            client.close().await;
            Ok(())
        }
        Commands::Insert {
            connection,
            table,
            csv,
            upsert,
            conflict,
        } => {
            let (client, _) = connect(&connection).await?;
            info!("Executing 'insert' command");
            let options = insert_options(upsert, conflict);
            let result = insert_command(&client, &table, &csv, &options).await;
            client.close().await;
            result
        }
        Commands::Lookup {
            connection,
            filters,
            columns,
            limit,
        } => {
            let (client, _) = connect(&connection).await?;
            info!("Executing 'lookup' command");
            let result = lookup_command(&client, filters, columns, limit).await;
            client.close().await;
            result
        }
    }
}

/// Both flags go through unchanged so `--conflict` without `--upsert` is
/// rejected by the client instead of being dropped.
fn insert_options(upsert: bool, conflict: Vec<String>) -> InsertOptions {
    InsertOptions {
        upsert,
        conflict_columns: conflict,
        database: None,
    }
}

/// Logging settings from the `other` section.
fn log_options(config: &DbUtilsConfig) -> LogOptions {
    let format = LogFormat::parse(&config.other.log_format).unwrap_or_default();
    LogOptions {
        format,
        log_dir: config.other.log_dir.as_ref().map(PathBuf::from),
        print_logs: config.other.print_logs,
        backup_count: config.other.log_backup_count,
    }
}

/// Load the config, start logging and metrics, then initialize the database.
async fn connect(args: &ConnectionArgs) -> Result<(DbClient, String)> {
    let config = load_config(&args.config)?;

    init_logging("dbutil", &log_options(&config))?;
    debug!(?args, "Connection arguments");

    if let Some(port) = config.other.metrics_port {
        init_metrics(port)?;
    }

    let database = args
        .database
        .clone()
        .or_else(|| config.other.default_database.clone())
        .context("no --database given and other.default_database is not set")?;

    let client = DbClient::new(config);
    if let Err(e) = client.initialize(&database).await {
        error!(%e, database = %database, "Initialization failed");
        return Err(e.into());
    }

    Ok((client, database))
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()
        .with_context(|| format!("Failed to read CSV: {:?}", path))?
        .collect()
        .with_context(|| format!("Failed to parse CSV: {:?}", path))?;

    debug!(rows = df.height(), columns = ?df.get_column_names(), "CSV loaded");
    Ok(df)
}

async fn insert_command(
    client: &DbClient,
    table: &str,
    csv: &Path,
    options: &InsertOptions,
) -> Result<()> {
    let df = read_csv(csv)?;
    let rows = df.height();

    let affected = client.insert_dataframe(table, &df, options).await?;

    println!(
        "[ok] {} {} row(s) from {:?} into {} ({} affected)",
        if options.upsert { "Upserted" } else { "Inserted" },
        rows,
        csv,
        table,
        affected
    );
    Ok(())
}

async fn lookup_command(
    client: &DbClient,
    filters: Vec<(String, String)>,
    columns: Vec<String>,
    limit: Option<usize>,
) -> Result<()> {
    let mut query: IdentifierQuery = filters
        .into_iter()
        .map(|(column, value)| {
            let value = if value.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(value)
            };
            (column, value)
        })
        .collect();

    if !columns.is_empty() {
        query = query.with_columns(columns);
    }
    if let Some(limit) = limit {
        query = query.with_limit(limit);
    }

    let df = client.get_instrument_identifier(&query).await?;
    if df.height() == 0 {
        warn!("No identifiers matched");
    }
    println!("{}", df);
    Ok(())
}

fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Databases: {}", config.database_names().join(", "));
    println!(
        "Default database: {}",
        config.other.default_database.as_deref().unwrap_or("<none>")
    );
    println!("Identifier table: {}", config.other.identifier_table);
    println!(
        "Log directory: {}",
        config.other.log_dir.as_deref().unwrap_or("<stdout only>")
    );

    Ok(())
}

fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Fill in SQL_credentials for each database you use");
    println!("  2. Export DB_PASSWORD (or replace the ${{DB_PASSWORD}} placeholder)");
    println!(
        "  3. Run 'dbutil validate --config {:?}' to check the file",
        output_path
    );
    println!(
        "  4. Run 'dbutil ping --config {:?}' to test the connection",
        output_path
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_options_keep_conflict_columns() {
        let options = insert_options(false, vec!["id".to_string()]);
        assert!(!options.upsert);
        assert_eq!(options.conflict_columns, vec!["id"]);

        assert_eq!(
            insert_options(true, vec!["id".to_string()]),
            InsertOptions::upsert(["id"])
        );
        assert_eq!(insert_options(false, Vec::new()), InsertOptions::new());
    }
}
