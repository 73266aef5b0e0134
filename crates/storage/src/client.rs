//! The configuration-driven database client.

use crate::error::{DbError, DbResult};
use crate::frame::{bind_cell, frame_to_rows, rows_to_frame};
use crate::identifiers::IdentifierQuery;
use crate::registry::ConnectionRegistry;
use crate::schema::{reflect_table, ColumnSchema, TableName};
use crate::sql::{insert_statement, rows_per_statement, select_statement, Condition};
use config::{validate_database, DbUtilsConfig, ResolvedCredentials};
use observability::DbMetrics;
use polars::prelude::DataFrame;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// How `insert_dataframe` writes rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Update rows whose conflict columns already exist instead of failing.
    pub upsert: bool,
    pub conflict_columns: Vec<String>,
    /// Write to this database instead of the active one. The active
    /// database is left unchanged.
    pub database: Option<String>,
}

impl InsertOptions {
    /// Plain insert into the active database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert keyed on `conflict_columns`.
    pub fn upsert<I, S>(conflict_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            upsert: true,
            conflict_columns: conflict_columns.into_iter().map(Into::into).collect(),
            database: None,
        }
    }

    pub fn on_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    fn validate(&self) -> DbResult<()> {
        if self.upsert && self.conflict_columns.is_empty() {
            return Err(DbError::invalid_argument(
                "upsert requires at least one conflict column",
            ));
        }
        if !self.upsert && !self.conflict_columns.is_empty() {
            return Err(DbError::invalid_argument(
                "conflict columns were given but upsert is not enabled",
            ));
        }
        Ok(())
    }
}

/// Connection options for one database.
pub fn connect_options(creds: &ResolvedCredentials) -> DbResult<PgConnectOptions> {
    let ssl_mode = PgSslMode::from_str(&creds.ssl_mode).map_err(|e| {
        DbError::configuration(format!("invalid ssl mode '{}': {}", creds.ssl_mode, e))
    })?;

    Ok(PgConnectOptions::new()
        .host(&creds.host)
        .port(creds.port)
        .username(&creds.user)
        .password(&creds.password)
        .database(&creds.database)
        .ssl_mode(ssl_mode))
}

/// Pool sizing and timeouts for one database.
pub fn pool_options(creds: &ResolvedCredentials) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(creds.max_connections)
        .acquire_timeout(Duration::from_secs(creds.connection_timeout_seconds))
        .idle_timeout(Duration::from_secs(creds.idle_timeout_seconds))
}

async fn open_pool(name: &str, creds: &ResolvedCredentials) -> DbResult<PgPool> {
    debug!(
        database = name,
        host = %creds.host,
        port = creds.port,
        db_name = %creds.database,
        "Connecting"
    );

    let pool = pool_options(creds)
        .connect_with(connect_options(creds)?)
        .await
        .map_err(|e| DbError::connection(name, e))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| DbError::connection(name, e))?;

    info!(
        database = name,
        "Connected to PostgreSQL at {}:{}/{}", creds.host, creds.port, creds.database
    );
    Ok(pool)
}

struct ClientInner {
    config: DbUtilsConfig,
    registry: ConnectionRegistry,
    metrics: DbMetrics,
}

/// Insert dataframes, look up identifiers, and move between the databases
/// named in a [`DbUtilsConfig`].
///
/// Cloning is cheap and every clone shares the same pools and active
/// database.
///
/// ```ignore
/// let client = DbClient::from_config_file("config.json")?;
/// client.initialize("analytics").await?;
/// client.insert_dataframe("prices", &df, &InsertOptions::upsert(["id"])).await?;
/// let rows = client
///     .get_instrument_identifier(&IdentifierQuery::new().with_filter("ticker", "AAPL"))
///     .await?;
/// ```
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<ClientInner>,
}

impl DbClient {
    pub fn new(config: DbUtilsConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                registry: ConnectionRegistry::new(),
                metrics: DbMetrics::new("dbutils"),
            }),
        }
    }

    /// Load the configuration file and build a client. Nothing connects yet.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let config = config::load_config(path.as_ref())
            .map_err(|e| DbError::configuration(format!("{:#}", e)))?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &DbUtilsConfig {
        &self.inner.config
    }

    /// Name of the database that calls currently use.
    pub fn active_database(&self) -> Option<String> {
        self.inner.registry.active()
    }

    /// Databases with an open pool, sorted by name.
    pub fn initialized_databases(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Pool for an already-initialized database.
    pub fn pool(&self, database: &str) -> Option<PgPool> {
        self.inner.registry.get(database)
    }

    /// Register an existing pool under a configured database name.
    ///
    /// Returns false when that name already had a pool, in which case the
    /// given pool is dropped.
    pub async fn attach_pool(&self, database: &str, pool: PgPool) -> DbResult<bool> {
        self.ensure_configured(database)?;
        let (_, created) = self
            .inner
            .registry
            .get_or_connect(database, || async { Ok(pool) })
            .await?;
        self.inner.metrics.set_open_pools(self.inner.registry.len());
        Ok(created)
    }

    /// Connect to `database` (or reuse its pool) and make it active.
    #[instrument(skip(self))]
    pub async fn initialize(&self, database: &str) -> DbResult<()> {
        let timer = self.inner.metrics.start("initialize");
        let result = self.connect(database).await.map(|_| {
            self.inner.registry.set_active(database);
        });
        timer.finish(result.is_ok());

        match &result {
            Ok(()) => info!(database, "Database initialized"),
            Err(e) => error!(database, error = %e, "Failed to initialize database"),
        }
        result
    }

    /// Make `database` active, connecting first if it has no pool yet.
    /// Pools of other databases stay open.
    #[instrument(skip(self))]
    pub async fn switch_database(&self, database: &str) -> DbResult<()> {
        let timer = self.inner.metrics.start("switch_database");
        let previous = self.active_database();
        let result = self.connect(database).await.map(|_| {
            self.inner.registry.set_active(database);
        });
        timer.finish(result.is_ok());

        match &result {
            Ok(()) => info!(
                from = previous.as_deref().unwrap_or("<none>"),
                to = database,
                "Switched active database"
            ),
            Err(e) => error!(database, error = %e, "Failed to switch database"),
        }
        result
    }

    /// Insert (or upsert) every row of `data` into `table`.
    ///
    /// `table` is `name` or `schema.name`. Columns of `data` must all exist in
    /// the table; they are written in the table's column order. All rows are
    /// written in one transaction. Returns the number of rows affected.
    #[instrument(skip(self, data, options), fields(rows = data.height(), upsert = options.upsert))]
    pub async fn insert_dataframe(
        &self,
        table: &str,
        data: &DataFrame,
        options: &InsertOptions,
    ) -> DbResult<u64> {
        let timer = self.inner.metrics.start("insert_dataframe");
        let result = self.insert_rows(table, data, options).await;
        timer.finish(result.is_ok());

        if let Err(e) = &result {
            error!(table, error = %e, "Insert failed");
        }
        result
    }

    /// Shorthand for [`insert_dataframe`](Self::insert_dataframe) with
    /// [`InsertOptions::upsert`].
    pub async fn upsert_dataframe(
        &self,
        table: &str,
        data: &DataFrame,
        conflict_columns: &[&str],
    ) -> DbResult<u64> {
        let options = InsertOptions::upsert(conflict_columns.iter().copied());
        self.insert_dataframe(table, data, &options).await
    }

    /// Rows of the identifier table matching `query`.
    ///
    /// No match yields an empty frame that still carries the selected
    /// column names.
    #[instrument(skip(self))]
    pub async fn get_instrument_identifier(&self, query: &IdentifierQuery) -> DbResult<DataFrame> {
        let timer = self.inner.metrics.start("get_instrument_identifier");
        let result = self.select_identifiers(query).await;
        timer.finish(result.is_ok());

        match &result {
            Ok(df) => debug!(rows = df.height(), "Identifier lookup complete"),
            Err(e) => error!(error = %e, "Identifier lookup failed"),
        }
        result
    }

    /// Close every pool. The client can be initialized again afterwards.
    pub async fn close(&self) {
        self.inner.registry.close_all().await;
        self.inner.metrics.set_open_pools(0);
        info!("Closed all database connections");
    }

    fn ensure_configured(&self, database: &str) -> DbResult<()> {
        if self.inner.config.credentials(database).is_some() {
            return Ok(());
        }
        Err(DbError::configuration(format!(
            "database '{}' is not configured (known: {:?})",
            database,
            self.inner.config.database_names()
        )))
    }

    fn resolve_credentials(&self, database: &str) -> DbResult<ResolvedCredentials> {
        self.ensure_configured(database)?;

        let report = validate_database(&self.inner.config, database);
        for warning in &report.warnings {
            warn!(database, field = %warning.field, "{}", warning.message);
        }
        if !report.is_valid() {
            let reasons = report
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DbError::configuration(reasons));
        }

        self.inner
            .config
            .credentials(database)
            .ok_or_else(|| DbError::configuration(format!("database '{}' is not configured", database)))?
            .require()
            .map_err(|missing| {
                DbError::configuration(format!(
                    "database '{}' is missing required field(s): {}",
                    database,
                    missing.join(", ")
                ))
            })
    }

    /// Pool for `database`, opened on first use.
    async fn connect(&self, database: &str) -> DbResult<PgPool> {
        if let Some(pool) = self.inner.registry.get(database) {
            debug!(database, "Reusing existing pool");
            return Ok(pool);
        }

        let creds = self.resolve_credentials(database)?;
        let (pool, created) = self
            .inner
            .registry
            .get_or_connect(database, || open_pool(database, &creds))
            .await?;

        if created {
            self.inner.metrics.set_open_pools(self.inner.registry.len());
        }
        Ok(pool)
    }

    async fn target_pool(&self, database: Option<&str>) -> DbResult<(String, PgPool)> {
        match database {
            Some(name) => Ok((name.to_string(), self.connect(name).await?)),
            None => self
                .inner
                .registry
                .active_pool()
                .ok_or(DbError::NotInitialized),
        }
    }

    async fn insert_rows(
        &self,
        table: &str,
        data: &DataFrame,
        options: &InsertOptions,
    ) -> DbResult<u64> {
        options.validate()?;
        let table = TableName::parse(table)?;
        let (database, pool) = self.target_pool(options.database.as_deref()).await?;

        let schema = reflect_table(&pool, &table).await?;
        let payload_columns = data.get_column_names();
        schema.ensure_columns(payload_columns.iter().copied())?;

        if let Some(missing) = options
            .conflict_columns
            .iter()
            .find(|c| !payload_columns.contains(&c.as_str()))
        {
            return Err(DbError::invalid_argument(format!(
                "conflict column '{}' is not in the dataframe",
                missing
            )));
        }

        if data.height() == 0 {
            debug!(table = %table, "Empty dataframe, nothing to insert");
            return Ok(0);
        }

        let columns = schema.ordered_subset(&payload_columns);
        let rows = frame_to_rows(data, &columns)?;
        let chunk_size = rows_per_statement(columns.len(), self.inner.config.other.insert_batch_size);
        let conflict = options
            .upsert
            .then_some(options.conflict_columns.as_slice());

        let mut tx = pool.begin().await?;
        let mut affected = 0u64;

        for chunk in rows.chunks(chunk_size) {
            let sql = insert_statement(&table, &columns, chunk.len(), conflict);
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for (cell, column) in row.iter().zip(&columns) {
                    query = bind_cell(query, cell, column);
                }
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        self.inner
            .metrics
            .record_rows_written(&table.to_string(), affected);
        info!(
            database = %database,
            table = %table,
            rows = rows.len(),
            affected,
            statements = rows.len().div_ceil(chunk_size),
            "Inserted dataframe"
        );
        Ok(affected)
    }

    async fn select_identifiers(&self, query: &IdentifierQuery) -> DbResult<DataFrame> {
        let (_, pool) = self.target_pool(None).await?;
        let table = TableName::parse(&self.inner.config.other.identifier_table)?;

        let schema = reflect_table(&pool, &table).await?;
        schema.ensure_columns(query.referenced_columns())?;

        let projection: Vec<&ColumnSchema> = match query.projection() {
            Some(names) if names.is_empty() => {
                return Err(DbError::invalid_argument("column projection is empty"));
            }
            Some(names) => names.into_iter().filter_map(|n| schema.column(n)).collect(),
            None => schema.columns.iter().collect(),
        };

        let mut conditions = Vec::with_capacity(query.filters.len());
        for (name, value) in &query.filters {
            if let Some(column) = schema.column(name) {
                conditions.push((
                    Condition {
                        column,
                        is_null: value.is_null(),
                    },
                    value,
                ));
            }
        }

        let order_by = query
            .order_by
            .as_deref()
            .and_then(|name| schema.column(name))
            .map(|column| (column, query.descending));

        let sql = select_statement(
            &table,
            &projection,
            &conditions.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            order_by,
            query.limit,
        );
        debug!(sql = %sql, "Identifier query");

        let mut select = sqlx::query(&sql);
        for (condition, value) in &conditions {
            if !condition.is_null {
                select = bind_cell(select, value, condition.column);
            }
        }

        let rows = select.fetch_all(&pool).await?;
        rows_to_frame(&rows, &projection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::DatabaseCredentials;
    use polars::prelude::df;

    fn credentials(port: u16) -> DatabaseCredentials {
        DatabaseCredentials {
            host: Some("127.0.0.1".to_string()),
            port: Some(port),
            user: Some("analyst".to_string()),
            password: Some("secret".to_string()),
            database: Some("analytics".to_string()),
            ssl_mode: "disable".to_string(),
            max_connections: 2,
            connection_timeout_seconds: 1,
            idle_timeout_seconds: 60,
        }
    }

    fn client_with(names: &[&str]) -> DbClient {
        let mut config = DbUtilsConfig::default();
        for name in names {
            config.sql_credentials.insert(name.to_string(), credentials(1));
        }
        DbClient::new(config)
    }

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new().connect_lazy_with(PgConnectOptions::new().host("127.0.0.1").port(1))
    }

    #[tokio::test]
    async fn test_initialize_unknown_database() {
        let client = client_with(&["a"]);
        let err = client.initialize("missing").await.unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
        assert!(client.active_database().is_none());
    }

    #[tokio::test]
    async fn test_initialize_missing_field() {
        let mut config = DbUtilsConfig::default();
        let mut creds = credentials(1);
        creds.host = None;
        config.sql_credentials.insert("a".to_string(), creds);
        let client = DbClient::new(config);

        match client.initialize("a").await {
            Err(DbError::Configuration(msg)) => assert!(msg.contains("DB_HOST"), "{}", msg),
            other => panic!("expected Configuration, got {:?}", other.err()),
        }
        assert!(client.initialized_databases().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_unreachable_database() {
        let client = client_with(&["a"]);

        let err = client.initialize("a").await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }), "{:?}", err);
        assert!(err.is_retryable());
        assert!(client.initialized_databases().is_empty());
        assert!(client.active_database().is_none());
    }

    #[tokio::test]
    async fn test_switch_between_attached_pools() {
        let client = client_with(&["a", "b"]);
        assert!(client.attach_pool("a", lazy_pool()).await.unwrap());
        assert!(client.attach_pool("b", lazy_pool()).await.unwrap());
        assert!(!client.attach_pool("b", lazy_pool()).await.unwrap());

        client.initialize("a").await.unwrap();
        assert_eq!(client.active_database().as_deref(), Some("a"));

        client.switch_database("b").await.unwrap();
        assert_eq!(client.active_database().as_deref(), Some("b"));
        assert_eq!(client.initialized_databases(), vec!["a", "b"]);

        let err = client.switch_database("c").await.unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
        assert_eq!(client.active_database().as_deref(), Some("b"));

        let clone = client.clone();
        clone.switch_database("a").await.unwrap();
        assert_eq!(client.active_database().as_deref(), Some("a"));

        client.close().await;
        assert!(client.initialized_databases().is_empty());
        assert!(client.active_database().is_none());
    }

    #[tokio::test]
    async fn test_attach_pool_requires_configured_name() {
        let client = client_with(&["a"]);
        let err = client.attach_pool("x", lazy_pool()).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_operations_before_initialize() {
        let client = client_with(&["a"]);
        let df = df! { "id" => [1i64] }.unwrap();

        let err = client
            .insert_dataframe("prices", &df, &InsertOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotInitialized));

        let err = client
            .get_instrument_identifier(&IdentifierQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotInitialized));
    }

    #[tokio::test]
    async fn test_insert_argument_checks() {
        let client = client_with(&["a"]);
        let df = df! { "id" => [1i64] }.unwrap();

        let options = InsertOptions {
            upsert: true,
            ..InsertOptions::default()
        };
        let err = client.insert_dataframe("prices", &df, &options).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));

        let options = InsertOptions {
            conflict_columns: vec!["id".to_string()],
            ..InsertOptions::default()
        };
        let err = client.insert_dataframe("prices", &df, &options).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));

        let err = client
            .insert_dataframe("a.b.c", &df, &InsertOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }

    #[test]
    fn test_insert_options_builders() {
        let options = InsertOptions::upsert(["id", "venue"]).on_database("b");
        assert!(options.upsert);
        assert_eq!(options.conflict_columns, vec!["id", "venue"]);
        assert_eq!(options.database.as_deref(), Some("b"));
        assert!(options.validate().is_ok());
        assert!(InsertOptions::new().validate().is_ok());
    }

    #[test]
    fn test_connect_options_rejects_bad_ssl_mode() {
        let mut creds = credentials(5432).require().unwrap();
        assert!(connect_options(&creds).is_ok());

        creds.ssl_mode = "sometimes".to_string();
        assert!(matches!(
            connect_options(&creds),
            Err(DbError::Configuration(_))
        ));
    }
}
