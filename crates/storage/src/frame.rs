//! Conversion between polars frames and PostgreSQL rows.

use crate::error::{DbError, DbResult};
use crate::schema::{ColumnKind, ColumnSchema};
use bigdecimal::ToPrimitive;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::BigDecimal;
use sqlx::{Postgres, Row};

/// Days between 0001-01-01 and 1970-01-01, for polars `Date` values.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// A single value ready to be bound as a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    List(Vec<CellValue>),
    /// Named fields of a polars struct value, in field order.
    Struct(Vec<(String, CellValue)>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// JSON rendering, used for every cell bound to a `json`/`jsonb` column.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) => Value::from(*i),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Date(d) => Value::String(d.to_string()),
            CellValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            CellValue::TimestampTz(ts) => Value::String(ts.to_rfc3339()),
            CellValue::List(items) => Value::Array(items.iter().map(CellValue::to_json).collect()),
            CellValue::Struct(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// PostgreSQL array literal (`{1,2,NULL}`), used for list cells bound to
    /// array columns.
    pub fn to_array_literal(&self) -> String {
        match self {
            CellValue::List(items) => {
                let elements = items
                    .iter()
                    .map(|item| match item {
                        CellValue::Null => "NULL".to_string(),
                        CellValue::List(_) => item.to_array_literal(),
                        other => quote_array_element(&other.to_plain_text()),
                    })
                    .collect::<Vec<_>>();
                format!("{{{}}}", elements.join(","))
            }
            CellValue::Null => "NULL".to_string(),
            other => format!("{{{}}}", quote_array_element(&other.to_plain_text())),
        }
    }

    fn to_plain_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Date(d) => d.to_string(),
            CellValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            CellValue::TimestampTz(ts) => ts.to_rfc3339(),
            CellValue::List(_) => self.to_array_literal(),
            CellValue::Struct(_) => self.to_json().to_string(),
        }
    }
}

fn quote_array_element(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(v.into())
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(v: NaiveDate) -> Self {
        CellValue::Date(v)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(v: NaiveDateTime) -> Self {
        CellValue::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(v: DateTime<Utc>) -> Self {
        CellValue::TimestampTz(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// Bind one cell, shaping list values for the target column.
pub(crate) fn bind_cell<'q>(
    query: Query<'q, Postgres, PgArguments>,
    cell: &CellValue,
    column: &ColumnSchema,
) -> Query<'q, Postgres, PgArguments> {
    match cell {
        CellValue::Null => query.bind(Option::<String>::None),
        // json/jsonb columns get every value JSON-encoded; a native bool or
        // number has no cast to json.
        _ if column.is_json() => query.bind(cell.to_json().to_string()),
        CellValue::Bool(b) => query.bind(*b),
        CellValue::Int(i) => query.bind(*i),
        CellValue::Float(f) => query.bind(*f),
        CellValue::Text(s) => query.bind(s.clone()),
        CellValue::Date(d) => query.bind(*d),
        CellValue::Timestamp(ts) => query.bind(*ts),
        CellValue::TimestampTz(ts) => query.bind(*ts),
        CellValue::List(_) if column.is_array() => query.bind(cell.to_array_literal()),
        CellValue::List(_) | CellValue::Struct(_) => query.bind(cell.to_json().to_string()),
    }
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn timestamp_from(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    let (secs, nanos) = match unit {
        TimeUnit::Nanoseconds => (value.div_euclid(1_000_000_000), value.rem_euclid(1_000_000_000)),
        TimeUnit::Microseconds => (value.div_euclid(1_000_000), value.rem_euclid(1_000_000) * 1_000),
        TimeUnit::Milliseconds => (value.div_euclid(1_000), value.rem_euclid(1_000) * 1_000_000),
    };
    DateTime::from_timestamp(secs, nanos as u32)
}

/// Convert one polars value.
pub fn cell_from_any(value: AnyValue<'_>, column: &str) -> DbResult<CellValue> {
    let out_of_range = |what: &str| {
        DbError::invalid_argument(format!("column '{}': {} out of range", column, what))
    };

    // Borrowed struct values are materialized so their fields can be walked.
    let value = match value {
        v @ AnyValue::Struct(..) => v.into_static()?,
        v => v,
    };

    let cell = match value {
        AnyValue::Null => CellValue::Null,
        AnyValue::StructOwned(payload) => {
            let (values, fields) = *payload;
            CellValue::Struct(
                fields
                    .iter()
                    .zip(values)
                    .map(|(field, v)| Ok((field.name().to_string(), cell_from_any(v, column)?)))
                    .collect::<DbResult<Vec<_>>>()?,
            )
        }
        AnyValue::Boolean(b) => CellValue::Bool(b),
        AnyValue::String(s) => CellValue::Text(s.to_string()),
        AnyValue::StringOwned(s) => CellValue::Text(s.to_string()),
        AnyValue::Int8(v) => CellValue::Int(v.into()),
        AnyValue::Int16(v) => CellValue::Int(v.into()),
        AnyValue::Int32(v) => CellValue::Int(v.into()),
        AnyValue::Int64(v) => CellValue::Int(v),
        AnyValue::UInt8(v) => CellValue::Int(v.into()),
        AnyValue::UInt16(v) => CellValue::Int(v.into()),
        AnyValue::UInt32(v) => CellValue::Int(v.into()),
        AnyValue::UInt64(v) => CellValue::Int(i64::try_from(v).map_err(|_| out_of_range("u64 value"))?),
        AnyValue::Float32(v) => CellValue::Float(v.into()),
        AnyValue::Float64(v) => CellValue::Float(v),
        AnyValue::Date(days) => CellValue::Date(date_from_days(days).ok_or_else(|| out_of_range("date"))?),
        AnyValue::Datetime(v, unit, tz) => {
            let ts = timestamp_from(v, unit).ok_or_else(|| out_of_range("timestamp"))?;
            if tz.is_some() {
                CellValue::TimestampTz(ts)
            } else {
                CellValue::Timestamp(ts.naive_utc())
            }
        }
        AnyValue::List(series) => CellValue::List(series_cells(&series, column)?),
        other => {
            return Err(DbError::UnsupportedType {
                column: column.to_string(),
                dtype: other.dtype().to_string(),
            })
        }
    };

    Ok(cell)
}

fn series_cells(series: &Series, column: &str) -> DbResult<Vec<CellValue>> {
    (0..series.len())
        .map(|i| cell_from_any(series.get(i)?, column))
        .collect()
}

/// Row-major cells for `columns` (already in table order).
pub fn frame_to_rows(df: &DataFrame, columns: &[&ColumnSchema]) -> DbResult<Vec<Vec<CellValue>>> {
    let series: Vec<&Series> = columns
        .iter()
        .map(|c| df.column(&c.name))
        .collect::<PolarsResult<_>>()?;

    (0..df.height())
        .map(|row| {
            series
                .iter()
                .zip(columns)
                .map(|(s, c)| cell_from_any(s.get(row)?, &c.name))
                .collect::<DbResult<Vec<_>>>()
        })
        .collect()
}

/// Typed accumulator for one result column.
enum ColumnBuffer {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
}

impl ColumnBuffer {
    fn for_kind(kind: ColumnKind, capacity: usize) -> Self {
        match kind {
            ColumnKind::Bool => Self::Bool(Vec::with_capacity(capacity)),
            ColumnKind::Int16 | ColumnKind::Int32 | ColumnKind::Int64 => {
                Self::Int(Vec::with_capacity(capacity))
            }
            ColumnKind::Float32 | ColumnKind::Float64 | ColumnKind::Numeric => {
                Self::Float(Vec::with_capacity(capacity))
            }
            ColumnKind::Date => Self::Date(Vec::with_capacity(capacity)),
            ColumnKind::Timestamp | ColumnKind::TimestampTz => {
                Self::Timestamp(Vec::with_capacity(capacity))
            }
            ColumnKind::Text | ColumnKind::Json | ColumnKind::Other => {
                Self::Text(Vec::with_capacity(capacity))
            }
        }
    }

    fn push(&mut self, row: &PgRow, idx: usize, kind: ColumnKind) -> DbResult<()> {
        match (self, kind) {
            (Self::Bool(v), _) => v.push(row.try_get::<Option<bool>, _>(idx)?),
            (Self::Int(v), ColumnKind::Int16) => {
                v.push(row.try_get::<Option<i16>, _>(idx)?.map(i64::from))
            }
            (Self::Int(v), ColumnKind::Int32) => {
                v.push(row.try_get::<Option<i32>, _>(idx)?.map(i64::from))
            }
            (Self::Int(v), _) => v.push(row.try_get::<Option<i64>, _>(idx)?),
            (Self::Float(v), ColumnKind::Float32) => {
                v.push(row.try_get::<Option<f32>, _>(idx)?.map(f64::from))
            }
            (Self::Float(v), ColumnKind::Numeric) => v.push(
                row.try_get::<Option<BigDecimal>, _>(idx)?
                    .and_then(|d| d.to_f64()),
            ),
            (Self::Float(v), _) => v.push(row.try_get::<Option<f64>, _>(idx)?),
            (Self::Date(v), _) => v.push(row.try_get::<Option<NaiveDate>, _>(idx)?),
            (Self::Timestamp(v), ColumnKind::TimestampTz) => v.push(
                row.try_get::<Option<DateTime<Utc>>, _>(idx)?
                    .map(|ts| ts.naive_utc()),
            ),
            (Self::Timestamp(v), _) => v.push(row.try_get::<Option<NaiveDateTime>, _>(idx)?),
            (Self::Text(v), _) => v.push(row.try_get::<Option<String>, _>(idx)?),
        }
        Ok(())
    }

    fn into_series(self, name: &str) -> Series {
        match self {
            Self::Bool(v) => Series::new(name, v),
            Self::Int(v) => Series::new(name, v),
            Self::Float(v) => Series::new(name, v),
            Self::Text(v) => Series::new(name, v),
            Self::Date(v) => Series::new(name, v),
            Self::Timestamp(v) => Series::new(name, v),
        }
    }
}

/// Build a frame from rows selected with `columns` as the projection.
///
/// Zero rows still produce a frame with every column, typed by its kind.
/// `timestamptz` values come back as naive UTC datetimes.
pub fn rows_to_frame(rows: &[PgRow], columns: &[&ColumnSchema]) -> DbResult<DataFrame> {
    let mut buffers: Vec<(ColumnKind, ColumnBuffer)> = columns
        .iter()
        .map(|c| {
            let kind = c.kind();
            (kind, ColumnBuffer::for_kind(kind, rows.len()))
        })
        .collect();

    for row in rows {
        for (idx, (kind, buffer)) in buffers.iter_mut().enumerate() {
            buffer.push(row, idx, *kind)?;
        }
    }

    let series = buffers
        .into_iter()
        .zip(columns)
        .map(|((_, buffer), column)| buffer.into_series(&column.name))
        .collect::<Vec<_>>();

    Ok(DataFrame::new(series)?)
}
