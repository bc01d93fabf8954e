//! Per-column conversion between typed values and their text form.
//!
//! The codec never formats values itself. It asks a [`ConverterRegistry`],
//! which resolves a [`ValueConverter`] by table and column first, then by
//! column kind, then falls back to [`DefaultConverter`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use super::schema::{Column, ColumnKind, Table};
use super::value::{Value, DATETIME_FORMAT, TIME_FORMAT};
use crate::error::{Result, RowportError};

/// Converts one column's values to and from text.
///
/// Errors are plain messages; the registry attaches table and column context.
pub trait ValueConverter: Send + Sync {
    /// Text form of a non-null value.
    fn to_text(&self, value: &Value, column: &Column) -> std::result::Result<String, String>;

    /// Parse a value from its text form.
    fn from_text(&self, text: &str, column: &Column) -> std::result::Result<Value, String>;
}

/// Converts according to the column's [`ColumnKind`], using `Value`'s display form.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConverter;

impl ValueConverter for DefaultConverter {
    fn to_text(&self, value: &Value, _column: &Column) -> std::result::Result<String, String> {
        Ok(value.to_string())
    }

    fn from_text(&self, text: &str, column: &Column) -> std::result::Result<Value, String> {
        let kind = column.kind();
        match kind {
            ColumnKind::Text => Ok(Value::Text(text.to_string())),
            ColumnKind::Integer => i64::from_str(text.trim())
                .map(Value::Int)
                .map_err(|e| format!("'{}' is not an integer: {}", text, e)),
            ColumnKind::Float => f64::from_str(text.trim())
                .map(Value::Float)
                .map_err(|e| format!("'{}' is not a number: {}", text, e)),
            ColumnKind::Decimal => Decimal::from_str(text.trim())
                .map(Value::Decimal)
                .map_err(|e| format!("'{}' is not a decimal: {}", text, e)),
            ColumnKind::Boolean => parse_bool(text.trim())
                .map(Value::Bool)
                .ok_or_else(|| format!("'{}' is not a boolean", text)),
            ColumnKind::Date => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| format!("'{}' is not a date: {}", text, e)),
            ColumnKind::Time => NaiveTime::parse_from_str(text.trim(), TIME_FORMAT)
                .map(Value::Time)
                .map_err(|e| format!("'{}' is not a time: {}", text, e)),
            ColumnKind::Timestamp => parse_timestamp(text.trim())
                .map(Value::DateTime)
                .map_err(|e| format!("'{}' is not a timestamp: {}", text, e)),
            ColumnKind::Binary => BASE64
                .decode(text.trim())
                .map(Value::Bytes)
                .map_err(|e| format!("binary value is not base64: {}", e)),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
}

/// Resolves the converter for a table column.
#[derive(Clone)]
pub struct ConverterRegistry {
    by_column: HashMap<(String, String), Arc<dyn ValueConverter>>,
    by_kind: HashMap<ColumnKind, Arc<dyn ValueConverter>>,
    fallback: Arc<dyn ValueConverter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self {
            by_column: HashMap::new(),
            by_kind: HashMap::new(),
            fallback: Arc::new(DefaultConverter),
        }
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("columns", &self.by_column.keys().collect::<Vec<_>>())
            .field("kinds", &self.by_kind.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConverterRegistry {
    /// Create a registry that only knows the default converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converter for one table column.
    pub fn register_column(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        converter: Arc<dyn ValueConverter>,
    ) {
        self.by_column
            .insert((table.into(), column.into()), converter);
    }

    /// Register a converter for every column of a kind.
    pub fn register_kind(&mut self, kind: ColumnKind, converter: Arc<dyn ValueConverter>) {
        self.by_kind.insert(kind, converter);
    }

    fn resolve(&self, table: &Table, column: &Column) -> &dyn ValueConverter {
        if let Some(c) = self
            .by_column
            .get(&(table.name.clone(), column.name.clone()))
        {
            return c.as_ref();
        }
        if let Some(c) = self.by_kind.get(&column.kind()) {
            return c.as_ref();
        }
        self.fallback.as_ref()
    }

    /// Text form of a value; `None` for null.
    pub fn to_text(&self, table: &Table, column: &Column, value: &Value) -> Result<Option<String>> {
        if value.is_null() {
            return Ok(None);
        }
        self.resolve(table, column)
            .to_text(value, column)
            .map(Some)
            .map_err(|msg| RowportError::conversion(&table.name, &column.name, msg))
    }

    /// Parse a column value from text.
    pub fn from_text(&self, table: &Table, column: &Column, text: &str) -> Result<Value> {
        self.resolve(table, column)
            .from_text(text, column)
            .map_err(|msg| RowportError::conversion(&table.name, &column.name, msg))
    }
}
