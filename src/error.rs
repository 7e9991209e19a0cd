//! Unified error handling for the mirrorwatch crate
//!
//! Failures are recovered at the smallest enclosing unit that can make
//! independent progress: a failed probe becomes a zero-status observation, a
//! failed persistence write skips one (content, mirror) pair, a failed cycle
//! is reported and the next cycle is still scheduled. Only configuration
//! errors at startup are fatal.

use std::io;
use thiserror::Error;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, DNS)
    Network,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Scheduler and cycle errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the mirrorwatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration errors; the only fatal class at startup
    #[error("Config error: {0}")]
    Config(String),

    /// A cycle step failed; caught at the scheduler boundary
    #[error("Cycle error during {step}: {source}")]
    Cycle {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is transient and safe to retry
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Io(_) => true,
            Self::Database(_) => false,
            Self::Json(_) => false,
            Self::Notification(_) => true,
            Self::Config(_) => false,
            Self::Cycle { source, .. } => source.is_recoverable(),
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Http(_) | Self::Notification(_) => ErrorCategory::Network,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Cycle { .. } => ErrorCategory::Scheduler,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Wrap an error as a named cycle step failure
    pub fn cycle_step(step: &'static str, source: Error) -> Self {
        Self::Cycle {
            step,
            source: Box::new(source),
        }
    }

    /// Render the full source chain for error reports
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error (repository internals use anyhow contexts)
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
