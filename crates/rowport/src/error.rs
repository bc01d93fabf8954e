//! Error types for the rowport library.

use thiserror::Error;

/// Number of unresolved identities spelled out in an [`RowportError::UnresolvedRows`] message.
const UNRESOLVED_PREVIEW: usize = 10;

/// Main error type for import and export operations.
#[derive(Error, Debug)]
pub enum RowportError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema model is inconsistent (unknown FK target, column count mismatch, etc.)
    #[error("Schema error: {0}")]
    Schema(String),

    /// IO error (file operations, stream reads and writes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed markup reported by the XML parser
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Structurally invalid data document (missing root, bad body, etc.)
    #[error("Data format error: {0}")]
    Format(String),

    /// Base64 body could not be decoded
    #[error("Invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A column value could not be converted to or from its text form
    #[error("Cannot convert value of column {table}.{column}: {message}")]
    Conversion {
        table: String,
        column: String,
        message: String,
    },

    /// The store rejected a row
    #[error("Insert into {table} failed: {message}")]
    Store { table: String, message: String },

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Rows still waiting for foreign key targets when the load ended
    #[error("{count} row(s) could not be inserted because their foreign key targets were never loaded: {}", preview(.identities))]
    UnresolvedRows {
        count: usize,
        identities: Vec<String>,
    },

    /// Load was cancelled (SIGINT, etc.)
    #[error("Load cancelled")]
    Cancelled,
}

fn preview(identities: &[String]) -> String {
    let mut shown: Vec<&str> = identities
        .iter()
        .take(UNRESOLVED_PREVIEW)
        .map(String::as_str)
        .collect();
    let rest = identities.len().saturating_sub(UNRESOLVED_PREVIEW);
    let more = format!("... and {} more", rest);
    if rest > 0 {
        shown.push(&more);
    }
    shown.join(", ")
}

impl RowportError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        RowportError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Store error
    pub fn store(table: impl Into<String>, message: impl Into<String>) -> Self {
        RowportError::Store {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Conversion error
    pub fn conversion(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        RowportError::Conversion {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the store rather than from the input document.
    ///
    /// Only these errors are subject to the loader's error policy.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            RowportError::Store { .. } | RowportError::Target(_) | RowportError::Pool { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            RowportError::Config(_) | RowportError::Yaml(_) | RowportError::Json(_) => 1,
            RowportError::Schema(_) => 2,
            RowportError::Xml(_)
            | RowportError::Format(_)
            | RowportError::Base64(_)
            | RowportError::Conversion { .. } => 3,
            RowportError::Store { .. } | RowportError::Target(_) | RowportError::Pool { .. } => 4,
            RowportError::UnresolvedRows { .. } => 5,
            RowportError::Cancelled => 6,
            RowportError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for rowport operations.
pub type Result<T> = std::result::Result<T, RowportError>;
