//! Schema metadata for tables, columns, and foreign keys.
//!
//! The loader and codec only consume this model; it is loaded from a YAML or
//! JSON document describing the target database.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::error::{Result, RowportError};

/// A set of tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Table definitions in declaration order.
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Schema {
    /// Create a schema from a list of tables.
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    /// Load a schema from a YAML or JSON file (JSON is valid YAML).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a schema from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let schema: Schema = serde_yaml::from_str(yaml)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Find a table by name.
    pub fn find_table(&self, name: &str, case_sensitive: bool) -> Option<&Table> {
        if case_sensitive {
            self.tables.iter().find(|t| t.name == name)
        } else {
            self.tables
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name))
        }
    }

    /// Check structural consistency of keys.
    ///
    /// Every primary key and foreign key column must exist, foreign keys must
    /// pair up local and referenced columns, and referenced tables must exist.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(RowportError::Schema("table with empty name".into()));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(RowportError::Schema(format!(
                    "table {} is defined more than once",
                    table.name
                )));
            }
            for pk in &table.primary_key {
                if table.find_column(pk, true).is_none() {
                    return Err(RowportError::Schema(format!(
                        "primary key column {}.{} does not exist",
                        table.name, pk
                    )));
                }
            }
            for fk in &table.foreign_keys {
                if fk.columns.is_empty() || fk.columns.len() != fk.ref_columns.len() {
                    return Err(RowportError::Schema(format!(
                        "foreign key {} on {} must reference as many columns as it declares",
                        fk.display_name(),
                        table.name
                    )));
                }
                for col in &fk.columns {
                    if table.find_column(col, true).is_none() {
                        return Err(RowportError::Schema(format!(
                            "foreign key column {}.{} does not exist",
                            table.name, col
                        )));
                    }
                }
                let target = self.find_table(&fk.ref_table, true).ok_or_else(|| {
                    RowportError::Schema(format!(
                        "foreign key {} on {} references unknown table {}",
                        fk.display_name(),
                        table.name,
                        fk.ref_table
                    ))
                })?;
                for col in &fk.ref_columns {
                    if target.find_column(col, true).is_none() {
                        return Err(RowportError::Schema(format!(
                            "foreign key {} references unknown column {}.{}",
                            fk.display_name(),
                            target.name,
                            col
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Order tables so that referenced tables come before the tables that reference them.
    ///
    /// Self-references are ignored. Tables caught in a cycle are appended in
    /// declaration order.
    pub fn tables_in_dependency_order(&self) -> Vec<&Table> {
        let mut remaining: HashMap<&str, HashSet<&str>> = self
            .tables
            .iter()
            .map(|t| {
                let deps = t
                    .foreign_keys
                    .iter()
                    .map(|fk| fk.ref_table.as_str())
                    .filter(|r| *r != t.name && self.find_table(r, true).is_some())
                    .collect();
                (t.name.as_str(), deps)
            })
            .collect();

        let mut ordered: Vec<&Table> = Vec::with_capacity(self.tables.len());
        loop {
            let ready: Vec<&Table> = self
                .tables
                .iter()
                .filter(|t| {
                    remaining
                        .get(t.name.as_str())
                        .is_some_and(|deps| deps.is_empty())
                })
                .collect();
            if ready.is_empty() {
                break;
            }
            for table in ready {
                remaining.remove(table.name.as_str());
                for deps in remaining.values_mut() {
                    deps.remove(table.name.as_str());
                }
                ordered.push(table);
            }
        }

        if !remaining.is_empty() {
            let mut cyclic: Vec<&str> = remaining.keys().copied().collect();
            cyclic.sort_unstable();
            warn!(
                "Tables {:?} reference each other in a cycle; writing them in declaration order",
                cyclic
            );
            ordered.extend(
                self.tables
                    .iter()
                    .filter(|t| remaining.contains_key(t.name.as_str())),
            );
        }
        ordered
    }
}

/// Table metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Column definitions in declaration order.
    #[serde(default)]
    pub columns: Vec<Column>,

    /// Primary key column names.
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Foreign key constraints.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Find a column by name.
    pub fn find_column(&self, name: &str, case_sensitive: bool) -> Option<&Column> {
        if case_sensitive {
            self.columns.iter().find(|c| c.name == name)
        } else {
            self.columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
        }
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Check if the table declares any foreign keys.
    pub fn has_foreign_keys(&self) -> bool {
        !self.foreign_keys.is_empty()
    }

    /// Columns whose values the store generates.
    pub fn identity_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_identity)
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "integer", "varchar(40)", "timestamp").
    #[serde(default = "default_data_type")]
    pub data_type: String,

    /// Whether the column allows NULL.
    #[serde(default = "default_true")]
    pub is_nullable: bool,

    /// Whether the store generates the value (identity / autoincrement).
    #[serde(default)]
    pub is_identity: bool,
}

impl Column {
    /// Create a nullable, non-identity column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_identity: false,
        }
    }

    /// Mark the column as store-generated.
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.is_nullable = false;
        self
    }

    /// Broad value category derived from the data type.
    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_data_type(&self.data_type)
    }
}

/// Value category of a column, used to pick a text conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    Time,
    Timestamp,
    Binary,
    Text,
}

impl ColumnKind {
    /// Classify a data type string. Length/precision suffixes are ignored.
    pub fn from_data_type(data_type: &str) -> Self {
        let base = data_type
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        match base.as_str() {
            "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint"
            | "mediumint" | "serial" | "bigserial" | "smallserial" => ColumnKind::Integer,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                ColumnKind::Float
            }
            "decimal" | "numeric" | "money" | "smallmoney" => ColumnKind::Decimal,
            "bool" | "boolean" | "bit" => ColumnKind::Boolean,
            "date" => ColumnKind::Date,
            "time" | "time without time zone" => ColumnKind::Time,
            "timestamp" | "timestamp without time zone" | "datetime" | "datetime2"
            | "smalldatetime" => ColumnKind::Timestamp,
            "bytea" | "binary" | "varbinary" | "blob" | "longblob" | "image" => ColumnKind::Binary,
            _ => ColumnKind::Text,
        }
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Declared constraint name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Local column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names, paired with `columns` by position.
    pub ref_columns: Vec<String>,
}

impl ForeignKey {
    /// Create an unnamed foreign key.
    pub fn new(columns: &[&str], ref_table: impl Into<String>, ref_columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Set the constraint name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Local → referenced column pairs in declaration order.
    pub fn references(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.ref_columns.iter().map(String::as_str))
    }

    /// Name used in messages: the declared name or a synthesized one.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("({}) -> {}", self.columns.join(", "), self.ref_table),
        }
    }
}

fn default_data_type() -> String {
    "varchar".to_string()
}

fn default_true() -> bool {
    true
}
