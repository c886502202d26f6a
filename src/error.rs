//! Centralized error types for invoice-relay.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the invoice-relay library.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A PDF attachment could not be parsed (corrupt, truncated, no pages).
    #[error("Malformed attachment '{filename}': {reason}")]
    MalformedAttachment { filename: String, reason: String },

    /// The merge engine could not produce a valid document.
    #[error("PDF merge failed: {0}")]
    MergeFailure(String),

    /// The relay transport rejected the message.
    #[error("Relay transport error: {0}")]
    Transport(String),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An attachment filename would resolve outside its target folder.
    #[error("Refusing to write attachment with unsafe filename '{0}'")]
    UnsafeFilename(String),

    /// The message cannot be rendered as RFC 5322 (bad address, no recipients).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Processing a message panicked; the failure was contained to that message.
    #[error("Message processing aborted: {0}")]
    Panicked(String),

    /// The mail source could not be read.
    #[error("Mail source error on '{path}': {reason}")]
    Source { path: PathBuf, reason: String },

    /// Missing or invalid configuration. Fatal, raised before any fetch.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `MalformedAttachment` variant.
    pub fn malformed(filename: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedAttachment {
            filename: filename.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable snake_case label used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedAttachment { .. } => "malformed_attachment",
            Self::MergeFailure(_) => "merge_failure",
            Self::Transport(_) => "transport_error",
            Self::Io { .. } | Self::UnsafeFilename(_) => "io_failure",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Panicked(_) => "panicked",
            Self::Source { .. } => "source_error",
            Self::Config(_) => "config_error",
        }
    }

    /// `true` for errors that abort the whole run rather than a single message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Source { .. })
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `RelayError::io`).
impl From<std::io::Error> for RelayError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
