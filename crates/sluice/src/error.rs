//! Error types for the apply engine
//!
//! Failure granularity is the whole fetched batch: any error in a cycle
//! rolls the transaction back and the batch is redelivered upstream.

use thiserror::Error;

use crate::event::RowKind;

/// Result type alias for apply operations
pub type Result<T> = std::result::Result<T, ApplyError>;

/// Errors raised by the apply engine
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Malformed change event, raised before any statement executes
    #[error("decode error: {0}")]
    Decode(String),

    /// A planned statement failed against the target
    #[error("{kind} on '{table}' failed for {rows} row(s): {source}")]
    Execution {
        /// Target table (as rendered, suffix included)
        table: String,
        /// Operation kind of the failed statement
        kind: RowKind,
        /// Rows covered by the failed statement
        rows: usize,
        /// Underlying database error
        #[source]
        source: sluice_rdbc::Error,
    },

    /// Begin, commit or rollback failed, or the connection could not be borrowed
    #[error("transaction error: {0}")]
    Transaction(#[source] sluice_rdbc::Error),

    /// Upstream log source failure
    #[error("source error: {0}")]
    Source(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("shutdown requested")]
    Shutdown,
}

impl ApplyError {
    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create an upstream source error
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error signals a requested shutdown
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Whether retrying the same batch may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Execution { source, .. } | Self::Transaction(source) => source.is_retriable(),
            Self::Source(_) => true,
            Self::Decode(_) | Self::Config(_) | Self::Shutdown => false,
        }
    }
}

impl From<serde_json::Error> for ApplyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
