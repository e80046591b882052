//! Error types for the mirroring library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection and pool errors.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for fatal introspection errors.
pub const EXIT_INTROSPECTION_ERROR: u8 = 3;
/// Exit code for a run that completed but recorded table-level errors.
pub const EXIT_PARTIAL_FAILURE: u8 = 4;
/// Exit code for database errors outside of introspection.
pub const EXIT_DATABASE_ERROR: u8 = 5;
/// Exit code for file and serialization errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for mirroring operations.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Configuration error (invalid YAML, missing fields, same endpoints, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not reach one of the two databases.
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Catalog discovery failed (schemas or tables could not be listed).
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// Query error from either database
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// The run finished but some tables recorded errors.
    #[error("Run completed with errors in {0} table(s)")]
    PartialFailure(usize),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MirrorError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MirrorError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error for a labelled endpoint.
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MirrorError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MirrorError::Config(_) | MirrorError::Yaml(_) => EXIT_CONFIG_ERROR,
            MirrorError::Connection { .. } | MirrorError::Pool { .. } => EXIT_CONNECTION_ERROR,
            MirrorError::Introspection(_) => EXIT_INTROSPECTION_ERROR,
            MirrorError::PartialFailure(_) => EXIT_PARTIAL_FAILURE,
            MirrorError::Database(_) => EXIT_DATABASE_ERROR,
            MirrorError::Io(_) | MirrorError::Json(_) => EXIT_IO_ERROR,
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

/// Result type alias for mirroring operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Render a database error with its server-side detail when present.
///
/// `tokio_postgres::Error`'s `Display` only says "db error"; the useful part
/// lives in the `DbError` source.
pub fn describe_db_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{}: {} ({})", db.severity(), db.message(), detail),
            None => format!("{}: {}", db.severity(), db.message()),
        },
        None => err.to_string(),
    }
}

impl MirrorError {
    /// Short, single-line message suitable for a table outcome record.
    pub fn summary(&self) -> String {
        match self {
            MirrorError::Database(e) => describe_db_error(e),
            other => other.to_string(),
        }
    }
}
