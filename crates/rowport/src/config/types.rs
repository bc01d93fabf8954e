//! Configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::loader::{ErrorPolicy, LoaderOptions};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target database. Not needed for dry runs or when only checking files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetConfig>,

    /// Loader behavior.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Data file format options.
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Loader behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Rows per batch insert; 1 inserts row by row (default: 1).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// What to do when the target rejects a row (default: halt).
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Match table and column names case-sensitively (default: false).
    #[serde(default)]
    pub case_sensitive: bool,

    /// Commit every insert on its own (default: true).
    #[serde(default = "default_true")]
    pub autocommit: bool,

    /// Insert identity column values from the file instead of letting the
    /// target generate them (default: false).
    #[serde(default)]
    pub identity_override: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            error_policy: ErrorPolicy::default(),
            case_sensitive: false,
            autocommit: true,
            identity_override: false,
        }
    }
}

impl LoaderConfig {
    /// Options for a [`Loader`](crate::loader::Loader) session.
    pub fn options(&self) -> LoaderOptions {
        LoaderOptions {
            batch_size: self.batch_size,
            error_policy: self.error_policy,
            case_sensitive: self.case_sensitive,
        }
    }
}

/// Data file format configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Indent exported documents (default: true).
    #[serde(default = "default_true")]
    pub pretty_print: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self { pretty_print: true }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_true() -> bool {
    true
}
