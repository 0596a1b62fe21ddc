//! Error types for schema reconciliation and manipulation.

use std::fmt;

use crate::staged::CommitReport;

/// Errors reported by a [`Backend`](crate::backend::Backend) implementation.
///
/// Backends own their driver errors; this type only carries a message and,
/// when available, the underlying cause.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl BackendError {
    /// Creates a backend error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a backend error wrapping a driver error.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the error message without the source chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// How serious a failed backend call is, as judged by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// The operation can continue; the failure is reported.
    Warning,
    /// The current operation failed.
    Error,
    /// The whole batch must be aborted.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Errors that can occur while reconciling or writing.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Invalid caller input: unknown write command, unknown field type, bad config.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A backend call failed.
    #[error("Backend {severity}: {source}")]
    Backend {
        /// Severity chosen at the call site.
        severity: Severity,
        /// The underlying backend failure.
        #[source]
        source: BackendError,
    },

    /// A session operation was called in the wrong session state.
    #[error("Cannot {operation}: schema session is {actual}, expected {expected}")]
    SessionState {
        /// The rejected operation.
        operation: &'static str,
        /// State the operation requires.
        expected: &'static str,
        /// State the session is actually in.
        actual: &'static str,
    },

    /// Some staged changes failed to apply during commit.
    #[error("{}", commit_summary(.0))]
    Commit(CommitReport),

    /// IO error (reading configuration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    /// Wraps a backend error with the given severity.
    #[must_use]
    pub const fn backend(severity: Severity, source: BackendError) -> Self {
        Self::Backend { severity, source }
    }

    /// Returns the severity for backend errors, `Fatal` for configuration errors.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Backend { severity, .. } => *severity,
            Self::Configuration(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

fn commit_summary(report: &CommitReport) -> String {
    let failures: Vec<String> = report
        .failures
        .iter()
        .map(|f| format!("  - {} ({}): {}", f.table, f.step, f.error))
        .collect();
    format!(
        "Schema commit failed for {} change(s), {} applied:\n{}",
        report.failures.len(),
        report.applied.len(),
        failures.join("\n")
    )
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
