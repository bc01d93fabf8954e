//! Core abstractions shared by the codec, the loader and the stores.
//!
//! - [`schema`]: table, column and foreign key metadata
//! - [`value`]: typed column values and rows
//! - [`convert`]: per-column text conversion
//! - [`identifier`]: XML name rules and SQL quoting
//! - [`traits`]: the sink and store seams

pub mod convert;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use convert::{ConverterRegistry, DefaultConverter, ValueConverter};
pub use schema::{Column, ColumnKind, ForeignKey, Schema, Table};
pub use traits::{DataSink, StoreAdapter};
pub use value::{Row, Value};
