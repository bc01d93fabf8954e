//! [`StoreAdapter`](crate::core::StoreAdapter) implementations and export.
//!
//! - [`MemoryStore`]: in-process tables, used for dry runs and tests
//! - [`PgStore`]: PostgreSQL through a `deadpool-postgres` pool

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, StoreCall};
pub use postgres::PgStore;

use std::io::Write;

use tracing::info;

use crate::codec::DataWriter;
use crate::core::{Schema, StoreAdapter};
use crate::error::{Result, RowportError};

/// Write the rows of `tables` (all tables when empty) from a store to a data document.
///
/// Referenced tables are written before the tables referencing them, so the
/// document loads with as little deferral as possible. Returns the number of
/// rows written.
pub async fn export_tables<S, W>(
    store: &mut S,
    schema: &Schema,
    writer: &mut DataWriter<W>,
    tables: &[String],
) -> Result<u64>
where
    S: StoreAdapter + ?Sized,
    W: Write + Send,
{
    for name in tables {
        if schema.find_table(name, false).is_none() {
            return Err(RowportError::Schema(format!("unknown table {}", name)));
        }
    }

    writer.start()?;
    let mut total = 0u64;
    for table in schema.tables_in_dependency_order() {
        if !tables.is_empty() && !tables.iter().any(|t| t.eq_ignore_ascii_case(&table.name)) {
            continue;
        }
        let rows = store.read_table(table).await?;
        for row in &rows {
            writer.write_row(row)?;
        }
        info!("Exported {} rows from {}", rows.len(), table.name);
        total += rows.len() as u64;
    }
    writer.end()?;
    Ok(total)
}
