//! Seams between the codec, the loader, and the store.
//!
//! - [`DataSink`]: consumes decoded rows (the loader is one)
//! - [`StoreAdapter`]: inserts rows into, and reads rows from, a target store

use async_trait::async_trait;

use crate::error::Result;

use super::schema::Table;
use super::value::Row;

/// Consumer of a stream of rows.
///
/// `start` and `end` bracket one session; `add_row` is called once per row in
/// document order.
#[async_trait]
pub trait DataSink: Send {
    /// Begin a session.
    async fn start(&mut self) -> Result<()>;

    /// Accept one row.
    async fn add_row(&mut self, row: Row) -> Result<()>;

    /// Finish the session.
    async fn end(&mut self) -> Result<()>;
}

/// Insert rows into, and read rows from, a target store.
///
/// Inserts return the row as stored, so that values the store generated
/// (identity columns) are visible to the caller.
#[async_trait]
pub trait StoreAdapter: Send {
    /// Insert one row, returning it with generated values filled in.
    async fn insert(&mut self, table: &Table, row: Row) -> Result<Row>;

    /// Insert several rows of the same table, returning them in input order.
    async fn insert_batch(&mut self, table: &Table, rows: Vec<Row>) -> Result<Vec<Row>>;

    /// Whether every insert is committed on its own.
    fn is_autocommit(&self) -> bool {
        true
    }

    /// Commit work done since the last commit.
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read every row of a table.
    async fn read_table(&mut self, table: &Table) -> Result<Vec<Row>>;

    /// Get the store type identifier (e.g., "memory", "postgres").
    fn db_type(&self) -> &str;
}
