//! Typed cell values and materialized query results.
//!
//! Values keep the type the engine reported (a `tinyint` stays a `TinyInt`,
//! a `datetime2` stays a `DateTime`); nothing is cast on the way through.
//! Serialization renders dates as ISO-8601 text, decimals as text and binary
//! data as base64.

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use uuid::Uuid;

/// A single cell or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL of any type
    Null,
    /// `bit`
    Bit(bool),
    /// `tinyint`
    TinyInt(u8),
    /// `smallint`
    SmallInt(i16),
    /// `int`
    Int(i32),
    /// `bigint`
    BigInt(i64),
    /// `real`
    Real(f32),
    /// `float`
    Float(f64),
    /// Exact numeric as unscaled value and scale (`12345, 2` is `123.45`)
    Decimal {
        /// Unscaled digits
        value: i128,
        /// Digits after the decimal point
        scale: u8,
    },
    /// Character data of any width
    Text(String),
    /// `binary`, `varbinary` and `image`
    Binary(Vec<u8>),
    /// `uniqueidentifier`
    Guid(Uuid),
    /// `date`
    Date(NaiveDate),
    /// `time`
    Time(NaiveTime),
    /// `datetime`, `datetime2` and `smalldatetime`
    DateTime(NaiveDateTime),
    /// `datetimeoffset`, normalized to UTC
    DateTimeOffset(DateTime<Utc>),
}

impl SqlValue {
    /// Returns true for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrows text content
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Widens any integer type to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a naive timestamp for `datetime`-family values
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::DateTimeOffset(dt) => Some(dt.naive_utc()),
            _ => None,
        }
    }

    /// Engine type name, used in debug output
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bit(_) => "bit",
            Self::TinyInt(_) => "tinyint",
            Self::SmallInt(_) => "smallint",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Real(_) => "real",
            Self::Float(_) => "float",
            Self::Decimal { .. } => "decimal",
            Self::Text(_) => "nvarchar",
            Self::Binary(_) => "varbinary",
            Self::Guid(_) => "uniqueidentifier",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime2",
            Self::DateTimeOffset(_) => "datetimeoffset",
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bit(v) => write!(f, "{}", v),
            Self::TinyInt(v) => write!(f, "{}", v),
            Self::SmallInt(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::BigInt(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Decimal { value, scale } => write!(f, "{}", format_decimal(*value, *scale)),
            Self::Text(s) => write!(f, "{}", s),
            Self::Binary(b) => write!(f, "0x{}", hex(b)),
            Self::Guid(g) => write!(f, "{}", g),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::DateTimeOffset(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bit(v) => serializer.serialize_bool(*v),
            Self::TinyInt(v) => serializer.serialize_u8(*v),
            Self::SmallInt(v) => serializer.serialize_i16(*v),
            Self::Int(v) => serializer.serialize_i32(*v),
            Self::BigInt(v) => serializer.serialize_i64(*v),
            Self::Real(v) => serializer.serialize_f32(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Binary(b) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::Guid(_)
            | Self::Decimal { .. }
            | Self::Date(_)
            | Self::Time(_)
            | Self::DateTime(_)
            | Self::DateTimeOffset(_) => serializer.collect_str(self),
        }
    }
}

/// Renders an unscaled integer with `scale` fractional digits.
fn format_decimal(value: i128, scale: u8) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let digits = value.unsigned_abs().to_string();
    let scale = usize::from(scale);
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale.saturating_sub(digits.len()).saturating_add(1)), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len().saturating_sub(scale));
    let sign = if value < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, int_part, frac_part)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bit(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Fully materialized first result set as returned by a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names in select-list order
    pub columns: Vec<String>,
    /// Rows, each with one value per column
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    /// Creates a result set
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }
}

/// Requested output shape for [`crate::QueryExecutor::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultShape {
    /// Ordered columns plus ordered rows
    #[default]
    Tabular,
    /// One name-to-value map per row
    RowList,
}

impl std::fmt::Display for ResultShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tabular => write!(f, "tabular"),
            Self::RowList => write!(f, "rows"),
        }
    }
}

/// Tabular result: ordered columns and ordered rows of typed cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    /// Column names in select-list order
    pub columns: Vec<String>,
    /// Rows of cells aligned with `columns`
    pub rows: Vec<Vec<SqlValue>>,
}

impl Table {
    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column by exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterates one column's values
    pub fn column<'a>(
        &'a self,
        name: &str,
    ) -> Option<impl Iterator<Item = &'a SqlValue> + use<'a>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().filter_map(move |row| row.get(index)))
    }
}

/// A row addressable by column name, keeping select-list order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Creates a row; `values` must align with `columns`
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Value by column name (first match, case-sensitive)
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.values.get(index)
    }

    /// Value by position
    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Text value by column name; NULL and non-text yield `None`
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(SqlValue::as_str)
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Iterates `(name, value)` pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the row has no cells
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Output of a query in the requested shape.
///
/// Serializes as the inner value: a `{"columns", "rows"}` object for a table,
/// an array of row objects for a row list.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Tabular shape
    Table(Table),
    /// Row-list shape
    Rows(Vec<Row>),
}

impl QueryResult {
    /// Shapes a raw result set
    pub fn from_result_set(set: ResultSet, shape: ResultShape) -> Self {
        match shape {
            ResultShape::Tabular => Self::Table(Table {
                columns: set.columns,
                rows: set.rows,
            }),
            ResultShape::RowList => {
                let columns: Arc<[String]> = set.columns.into();
                Self::Rows(
                    set.rows
                        .into_iter()
                        .map(|values| Row::new(Arc::clone(&columns), values))
                        .collect(),
                )
            }
        }
    }

    /// Number of rows regardless of shape
    pub fn row_count(&self) -> usize {
        match self {
            Self::Table(table) => table.row_count(),
            Self::Rows(rows) => rows.len(),
        }
    }

    /// Converts into row maps
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Table(table) => {
                let columns: Arc<[String]> = table.columns.into();
                table
                    .rows
                    .into_iter()
                    .map(|values| Row::new(Arc::clone(&columns), values))
                    .collect()
            }
        }
    }

    /// Converts into a table
    pub fn into_table(self) -> Table {
        match self {
            Self::Table(table) => table,
            Self::Rows(rows) => {
                let columns = rows
                    .first()
                    .map(|row| row.columns().to_vec())
                    .unwrap_or_default();
                let rows = rows.into_iter().map(|row| row.values).collect();
                Table { columns, rows }
            }
        }
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Table(table) => table.serialize(serializer),
            Self::Rows(rows) => {
                let mut seq = serializer.serialize_seq(Some(rows.len()))?;
                for row in rows {
                    seq.serialize_element(row)?;
                }
                seq.end()
            }
        }
    }
}
