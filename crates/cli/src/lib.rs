use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dbutil")]
#[command(about = "dbutils - load dataframes into PostgreSQL and look up instrument identifiers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Config file and database selection shared by commands that connect.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Database name under SQL_credentials (defaults to other.default_database)
    #[arg(short, long)]
    pub database: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a configuration file without connecting
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Write a new configuration file with all defaults
    Init {
        /// Output path (.json writes JSON, anything else YAML)
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Connect to a database and check that it answers
    Ping {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Insert or upsert the rows of a CSV file into a table
    Insert {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Target table, `table` or `schema.table`
        #[arg(short, long)]
        table: String,

        /// CSV file with a header row
        #[arg(long)]
        csv: PathBuf,

        /// Update existing rows on key conflict
        #[arg(long, requires = "conflict")]
        upsert: bool,

        /// Conflict key columns for --upsert
        #[arg(long, value_delimiter = ',')]
        conflict: Vec<String>,
    },

    /// Query the instrument identifier table
    Lookup {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Equality filter, repeatable
        #[arg(short, long = "filter", value_name = "COLUMN=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Columns to return (default: all)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Parse `column=value`. An empty value (`column=`) filters on NULL.
pub fn parse_filter(s: &str) -> Result<(String, String), String> {
    let (column, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid filter '{}', expected COLUMN=VALUE", s))?;

    let column = column.trim();
    if column.is_empty() {
        return Err(format!("invalid filter '{}', column name is empty", s));
    }
    Ok((column.to_string(), value.to_string()))
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            parse_filter("ticker=AAPL"),
            Ok(("ticker".to_string(), "AAPL".to_string()))
        );
        assert_eq!(
            parse_filter("note=a=b"),
            Ok(("note".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_filter("isin="), Ok(("isin".to_string(), String::new())));
        assert!(parse_filter("ticker").is_err());
        assert!(parse_filter("=AAPL").is_err());
    }

    #[test]
    fn test_insert_arguments() {
        let cli = Cli::try_parse_from([
            "dbutil", "insert", "-c", "cfg.yaml", "-d", "b", "-t", "market.prices", "--csv",
            "prices.csv", "--upsert", "--conflict", "id,venue",
        ])
        .unwrap();

        match cli.command {
            Commands::Insert { connection, table, csv, upsert, conflict } => {
                assert_eq!(connection.config, PathBuf::from("cfg.yaml"));
                assert_eq!(connection.database.as_deref(), Some("b"));
                assert_eq!(table, "market.prices");
                assert_eq!(csv, PathBuf::from("prices.csv"));
                assert!(upsert);
                assert_eq!(conflict, vec!["id", "venue"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_upsert_requires_conflict() {
        let result = Cli::try_parse_from([
            "dbutil", "insert", "-t", "prices", "--csv", "prices.csv", "--upsert",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lookup_arguments() {
        let cli = Cli::try_parse_from([
            "dbutil", "lookup", "-f", "ticker=AAPL", "-f", "exchange=", "--limit", "5",
        ])
        .unwrap();

        match cli.command {
            Commands::Lookup { connection, filters, columns, limit } => {
                assert_eq!(connection.config, PathBuf::from("config.json"));
                assert!(connection.database.is_none());
                assert_eq!(filters.len(), 2);
                assert_eq!(filters[1], ("exchange".to_string(), String::new()));
                assert!(columns.is_empty());
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
