//! PostgreSQL access for dbutils
//!
//! [`DbClient`] is the entry point: it reads database credentials from a
//! [`config::DbUtilsConfig`], keeps one connection pool per database name, and
//! offers four operations:
//!
//! - [`DbClient::initialize`] connects to a named database and makes it active
//! - [`DbClient::insert_dataframe`] bulk-inserts or upserts a polars frame
//! - [`DbClient::get_instrument_identifier`] queries the identifier table
//! - [`DbClient::switch_database`] changes which database later calls use
//!
//! Target tables are reflected from `information_schema` on every write, so
//! no table definitions live in this crate.

pub mod client;
pub mod error;
pub mod frame;
pub mod identifiers;
pub mod registry;
pub mod schema;
pub mod sql;

pub use client::{connect_options, pool_options, DbClient, InsertOptions};
pub use error::{DbError, DbResult};
pub use frame::CellValue;
pub use identifiers::IdentifierQuery;
pub use registry::ConnectionRegistry;
pub use schema::{ColumnKind, ColumnSchema, TableName, TableSchema};
