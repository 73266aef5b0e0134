//! Observability infrastructure for dbutils
//!
//! This crate provides:
//! - Structured logging via tracing, to stdout and a rotating log file
//! - Prometheus metrics for database operations
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogOptions};
//!
//! init_logging("dbutil", &LogOptions::default())?;
//!
//! // Optional
//! observability::metrics::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat, LogOptions};
pub use metrics::{init_metrics, DbMetrics, OperationTimer};
