//! # rowport
//!
//! Move relational table rows between an XML data file and a database.
//!
//! This library provides:
//!
//! - **Row codec**: streaming reader and writer for a self-describing XML
//!   format that round-trips any text, including `]]>` and control characters
//! - **Dependency-ordered loading**: rows are accepted in any order and
//!   inserted only after the rows they reference, with store-generated keys
//!   propagated into referencing rows
//! - **Batching** with a configurable batch size and error policy
//! - **Stores**: PostgreSQL and an in-memory store for dry runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rowport::{Config, DataReader, Loader, PgStore, Schema};
//!
//! #[tokio::main]
//! async fn main() -> rowport::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let schema = Arc::new(Schema::load("schema.yaml")?);
//!     let target = config.target.as_ref().expect("target configured");
//!     let store = PgStore::connect(target, &config.loader).await?;
//!
//!     let mut loader = Loader::new(store, Arc::clone(&schema), config.loader.options());
//!     let mut reader = DataReader::open("data.xml", schema)?;
//!     reader.read_into(&mut loader).await?;
//!     println!("Inserted {} rows", loader.stats().rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod loader;
pub mod store;

// Re-exports for convenient access
pub use codec::{DataReader, DataWriter};
pub use config::{CodecConfig, Config, LoaderConfig, TargetConfig};
pub use crate::core::{
    Column, ColumnKind, ConverterRegistry, DataSink, ForeignKey, Row, Schema, StoreAdapter,
    Table, Value, ValueConverter,
};
pub use error::{Result, RowportError};
pub use loader::{ErrorPolicy, Identity, LoadStats, Loader, LoaderOptions};
pub use store::{export_tables, MemoryStore, PgStore};
