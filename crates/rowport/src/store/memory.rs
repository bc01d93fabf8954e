//! In-process store.
//!
//! Behaves like a database with primary key and foreign key constraints and
//! identity columns, without persisting anything. Every call is recorded so
//! the order and shape of inserts can be inspected.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::{Row, Schema, StoreAdapter, Table, Value};
use crate::error::{Result, RowportError};

/// One call made against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Insert { table: String },
    Batch { table: String, rows: usize },
    Commit,
}

/// Tables held in memory.
#[derive(Debug)]
pub struct MemoryStore {
    schema: Arc<Schema>,
    tables: HashMap<String, Vec<Row>>,
    inserted: Vec<Row>,
    /// Last generated value per (table, identity column).
    sequences: HashMap<(String, String), i64>,
    calls: Vec<StoreCall>,
    autocommit: bool,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            tables: HashMap::new(),
            inserted: Vec::new(),
            sequences: HashMap::new(),
            calls: Vec::new(),
            autocommit: true,
        }
    }

    /// Require explicit commits, like a session with autocommit off.
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    /// Advance an identity sequence, as if `count` rows had been inserted and deleted.
    pub fn skip_identity_values(&mut self, table: &str, column: &str, count: i64) {
        *self
            .sequences
            .entry((table.to_string(), column.to_string()))
            .or_insert(0) += count;
    }

    /// Rows of one table in insertion order.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All rows in insertion order.
    pub fn inserted(&self) -> &[Row] {
        &self.inserted
    }

    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    /// Row counts per table.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.tables
            .iter()
            .map(|(name, rows)| (name.clone(), rows.len()))
            .collect()
    }

    /// Validate and store one row.
    fn store_row(&mut self, table: &Table, mut row: Row) -> Result<Row> {
        for column in table.identity_columns() {
            let key = (table.name.clone(), column.name.clone());
            let next = self.sequences.get(&key).copied().unwrap_or(0) + 1;
            self.sequences.insert(key, next);
            row.set(column.name.clone(), next);
        }

        if table.has_pk() {
            let key = key_text(&row, &table.primary_key).ok_or_else(|| {
                RowportError::store(&table.name, "primary key column is null")
            })?;
            let duplicate = self
                .rows(&table.name)
                .iter()
                .any(|r| key_text(r, &table.primary_key).as_ref() == Some(&key));
            if duplicate {
                return Err(RowportError::store(
                    &table.name,
                    format!("duplicate primary key ({})", key.join(", ")),
                ));
            }
        }

        for fk in &table.foreign_keys {
            let Some(values) = key_text(&row, &fk.columns) else {
                continue;
            };
            let found = self
                .rows(&fk.ref_table)
                .iter()
                .any(|r| key_text(r, &fk.ref_columns).as_ref() == Some(&values));
            if !found {
                return Err(RowportError::store(
                    &table.name,
                    format!(
                        "foreign key {} has no target row ({})",
                        fk.display_name(),
                        values.join(", ")
                    ),
                ));
            }
        }

        self.tables
            .entry(table.name.clone())
            .or_default()
            .push(row.clone());
        self.inserted.push(row.clone());
        Ok(row)
    }
}

/// Text form of a set of columns, or `None` if any is null or absent.
fn key_text(row: &Row, columns: &[String]) -> Option<Vec<String>> {
    columns
        .iter()
        .map(|c| row.get_non_null(c).map(Value::to_string))
        .collect()
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn insert(&mut self, table: &Table, row: Row) -> Result<Row> {
        self.calls.push(StoreCall::Insert {
            table: table.name.clone(),
        });
        self.store_row(table, row)
    }

    /// All or nothing: a rejected row discards the whole batch.
    async fn insert_batch(&mut self, table: &Table, rows: Vec<Row>) -> Result<Vec<Row>> {
        self.calls.push(StoreCall::Batch {
            table: table.name.clone(),
            rows: rows.len(),
        });
        let table_len = self.rows(&table.name).len();
        let inserted_len = self.inserted.len();
        let sequences = self.sequences.clone();

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            match self.store_row(table, row) {
                Ok(row) => stored.push(row),
                Err(e) => {
                    if let Some(rows) = self.tables.get_mut(&table.name) {
                        rows.truncate(table_len);
                    }
                    self.inserted.truncate(inserted_len);
                    self.sequences = sequences;
                    return Err(e);
                }
            }
        }
        Ok(stored)
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    async fn commit(&mut self) -> Result<()> {
        self.calls.push(StoreCall::Commit);
        Ok(())
    }

    async fn read_table(&mut self, table: &Table) -> Result<Vec<Row>> {
        let schema_table = self.schema.find_table(&table.name, true).ok_or_else(|| {
            RowportError::Schema(format!("unknown table {}", table.name))
        })?;
        debug!("Reading {} rows from memory", schema_table.name);
        Ok(self.rows(&schema_table.name).to_vec())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}
