//! Row identities: the key values one row is referred to by.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::core::{ForeignKey, Row};

/// A table name plus the text form of a set of key column values.
///
/// An identity built from a foreign key remembers which key of the referring
/// table it came from. That tag is bookkeeping only and takes no part in
/// equality or hashing, so the identity a child row waits on compares equal to
/// the identity its parent row is committed under.
#[derive(Debug, Clone)]
pub struct Identity {
    table: String,
    values: BTreeMap<String, String>,
    foreign_key: Option<usize>,
}

impl Identity {
    /// Identity of a row under the given key columns.
    ///
    /// Returns `None` if any key column is null or absent.
    pub fn of_row<'a, I>(row: &Row, columns: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut values = BTreeMap::new();
        for column in columns {
            let value = row.get_non_null(column)?;
            values.insert(column.clone(), value.to_string());
        }
        if values.is_empty() {
            return None;
        }
        Some(Self {
            table: row.table.clone(),
            values,
            foreign_key: None,
        })
    }

    /// Identity of the row that foreign key number `index` of `row` points at.
    ///
    /// Values are keyed by the referenced column names. Returns `None` if any
    /// local column is null or absent: such a reference has no target.
    pub fn of_reference(row: &Row, fk: &ForeignKey, index: usize) -> Option<Self> {
        let mut values = BTreeMap::new();
        for (local, referenced) in fk.references() {
            let value = row.get_non_null(local)?;
            values.insert(referenced.to_string(), value.to_string());
        }
        Some(Self {
            table: fk.ref_table.clone(),
            values,
            foreign_key: Some(index),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Index of the foreign key this identity was derived from, if any.
    pub fn foreign_key(&self) -> Option<usize> {
        self.foreign_key
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.values == other.values
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        self.values.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.table)?;
        for (i, (column, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", column, value)?;
        }
        write!(f, ")")
    }
}
