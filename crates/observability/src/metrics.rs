//! Prometheus metrics infrastructure
//!
//! Counters and histograms for database client operations. Without an
//! installed recorder the `metrics` macros are no-ops, so recording is always
//! safe; [`init_metrics`] installs the Prometheus exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize the Prometheus metrics exporter
///
/// This starts an HTTP server on the specified port that exposes metrics
/// at the `/metrics` endpoint.
///
/// # Example
///
/// ```ignore
/// observability::metrics::init_metrics(9090)?;
/// // Metrics available at http://localhost:9090/metrics
/// ```
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Metrics for one database client.
///
/// # Metrics
///
/// * `dbutils_operations_total` - Operations by name and outcome
/// * `dbutils_operation_duration_seconds` - Operation latency histogram
/// * `dbutils_rows_written_total` - Rows inserted or updated, per table
/// * `dbutils_open_pools` - Connection pools currently registered
///
/// # Example
///
/// ```ignore
/// let metrics = DbMetrics::new("dbutils");
/// let timer = metrics.start("insert_dataframe");
/// // ... run the statement ...
/// timer.finish(true);
/// metrics.record_rows_written("public.prices", 120);
/// ```
#[derive(Debug, Clone)]
pub struct DbMetrics {
    client_name: String,
}

impl DbMetrics {
    /// Create metrics labelled with a client name
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
        }
    }

    /// Record a completed operation
    pub fn record_operation(&self, operation: &'static str, duration: Duration, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        counter!(
            "dbutils_operations_total",
            "client" => self.client_name.clone(),
            "operation" => operation,
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            "dbutils_operation_duration_seconds",
            "client" => self.client_name.clone(),
            "operation" => operation
        )
        .record(duration.as_secs_f64());
    }

    /// Record rows written to a table
    pub fn record_rows_written(&self, table: &str, rows: u64) {
        counter!(
            "dbutils_rows_written_total",
            "client" => self.client_name.clone(),
            "table" => table.to_string()
        )
        .increment(rows);
    }

    /// Update the number of registered pools
    pub fn set_open_pools(&self, count: usize) {
        gauge!("dbutils_open_pools", "client" => self.client_name.clone()).set(count as f64);
    }

    /// Start timing an operation
    pub fn start(&self, operation: &'static str) -> OperationTimer<'_> {
        OperationTimer {
            metrics: self,
            operation,
            start: Instant::now(),
        }
    }

    /// Get the client name
    pub fn client_name(&self) -> &str {
        &self.client_name
    }
}

/// Times one operation; call [`OperationTimer::finish`] with the outcome.
pub struct OperationTimer<'a> {
    metrics: &'a DbMetrics,
    operation: &'static str,
    start: Instant,
}

impl OperationTimer<'_> {
    /// Record the elapsed time and outcome
    pub fn finish(self, success: bool) {
        self.metrics
            .record_operation(self.operation, self.start.elapsed(), success);
    }
}
