//! Error types for iPusnas Core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the pipeline stage that raises them so callers can
//! decide what to show and whether a retry makes sense.
//!
//! ## Stages
//!
//! - Input / session: `InvalidInput`, `NotAuthenticated`
//! - Catalog (remote API): `UpstreamError`
//! - Fetch: `NetworkError`, `WriteError`
//! - Derivation: `DerivationError`
//! - Container unwrapping: `CorruptArchive`, `EntryNotFound`, `DecryptionFailed`
//! - External tool: `ToolNotFound`, `ToolFailed`, `OutputMissing`
//!
//! The orchestrator wraps every failure that happens after the catalog lookup
//! in [`PusnasError::Pipeline`], tagged with the [`PipelineStage`] it came from.
//! Use [`PusnasError::root_cause`] to get at the component error.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our PusnasError type
pub type Result<T> = std::result::Result<T, PusnasError>;

/// Pipeline stage a wrapped failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Fetch,
    Derive,
    Unwrap,
    Decrypt,
    Finalize,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Derive => "derive",
            Self::Unwrap => "unwrap",
            Self::Decrypt => "decrypt",
            Self::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Main error type for iPusnas Core
#[derive(Error, Debug)]
pub enum PusnasError {
    // ===== Input / Session Errors =====

    /// Generic input validation error (malformed book id, bad URL, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No usable session credential is available
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    // ===== Catalog Errors =====

    /// Remote catalog / auth call failed
    #[error("Upstream request failed: {message}")]
    UpstreamError {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
        /// API endpoint that failed
        endpoint: Option<String>,
    },

    // ===== Fetch Errors =====

    /// Connection or transport failure while fetching an artifact
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Local disk failure while staging an artifact
    #[error("Failed to write {}: {message}", path.display())]
    WriteError { path: PathBuf, message: String },

    // ===== Derivation Errors =====

    /// Key derivation rejected its inputs
    #[error("Key derivation failed: {0}")]
    DerivationError(String),

    // ===== Container Errors =====

    /// The container could not be parsed as an archive
    #[error("Corrupt archive {}: {message}", path.display())]
    CorruptArchive { path: PathBuf, message: String },

    /// No entry in a multi-entry container matches the book
    #[error("No entry for book '{book_id}' in archive ({entry_count} entries)")]
    EntryNotFound { book_id: String, entry_count: usize },

    /// An entry could not be decrypted with the supplied password
    #[error("Decryption failed for '{entry}': {message}")]
    DecryptionFailed { entry: String, message: String },

    // ===== External Tool Errors =====

    /// The password-removal binary is not available on this host
    #[error("Decryption tool not found: {}", binary.display())]
    ToolNotFound { binary: PathBuf },

    /// The password-removal tool exited unsuccessfully
    #[error("Decryption tool failed (exit code {}): {diagnostic}", exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    ToolFailed {
        /// Exit code, `None` if the process was terminated by a signal
        exit_code: Option<i32>,
        /// Captured stderr (and stdout) of the tool
        diagnostic: String,
    },

    /// The tool reported success but no output file exists
    #[error("Decryption tool produced no output at {}", path.display())]
    OutputMissing { path: PathBuf },

    // ===== Pipeline =====

    /// A downstream component failed while acquiring a book
    #[error("Acquisition failed during {stage}: {source}")]
    Pipeline {
        stage: PipelineStage,
        #[source]
        source: Box<PusnasError>,
    },

    // ===== Configuration =====

    /// Configuration file or environment override is invalid
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper methods for creating common errors
impl PusnasError {
    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        PusnasError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        PusnasError::InternalError(message.into())
    }

    /// Create an UpstreamError
    pub fn upstream<S: Into<String>>(
        message: S,
        status_code: Option<u16>,
        endpoint: Option<String>,
    ) -> Self {
        PusnasError::UpstreamError {
            message: message.into(),
            status_code,
            endpoint,
        }
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        PusnasError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a WriteError for a path
    pub fn write_error<P: Into<PathBuf>, S: fmt::Display>(path: P, err: S) -> Self {
        PusnasError::WriteError {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a DecryptionFailed error for an archive entry
    pub fn decryption_failed<E: Into<String>, S: fmt::Display>(entry: E, err: S) -> Self {
        PusnasError::DecryptionFailed {
            entry: entry.into(),
            message: err.to_string(),
        }
    }

    /// Wrap a component failure with the stage it happened in.
    ///
    /// Errors that are already wrapped are returned unchanged.
    pub fn in_stage(self, stage: PipelineStage) -> Self {
        match self {
            PusnasError::Pipeline { .. } => self,
            other => PusnasError::Pipeline {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Innermost component error, unwrapping any `Pipeline` layers
    pub fn root_cause(&self) -> &PusnasError {
        match self {
            PusnasError::Pipeline { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Stage a pipeline failure came from, if any
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PusnasError::Pipeline { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Check if re-invoking the whole acquisition might succeed.
    ///
    /// Nothing in this crate retries on its own; this is advice for callers.
    /// Fetch-stage I/O failures are safe to retry because of the staging cache.
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            PusnasError::NetworkError { is_transient, .. } => *is_transient,
            PusnasError::UpstreamError { status_code: Some(500..=599), .. } => true,
            PusnasError::WriteError { .. } => true,
            PusnasError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Check if error means the user has to log in (again)
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self.root_cause(),
            PusnasError::NotAuthenticated(_)
                | PusnasError::UpstreamError { status_code: Some(401), .. }
        )
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self.root_cause(),
            PusnasError::WriteError { .. } | PusnasError::OutputMissing { .. } | PusnasError::Io(_)
        )
    }

    /// Check if error is related to DRM removal
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self.root_cause(),
            PusnasError::DerivationError(_)
                | PusnasError::CorruptArchive { .. }
                | PusnasError::EntryNotFound { .. }
                | PusnasError::DecryptionFailed { .. }
                | PusnasError::ToolFailed { .. }
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self.root_cause() {
            PusnasError::NotAuthenticated(_) => {
                "You are not logged in. Please log in and try again.".to_string()
            }
            PusnasError::UpstreamError { status_code: Some(401), .. } => {
                "Your session has expired. Please log in again.".to_string()
            }
            PusnasError::ToolNotFound { binary } => format!(
                "qpdf is required to unlock PDF books but was not found at '{}'. Please install qpdf.",
                binary.display()
            ),
            PusnasError::DecryptionFailed { .. } | PusnasError::ToolFailed { .. } => {
                "The book could not be unlocked. The borrow may have expired; borrow it again and retry."
                    .to_string()
            }
            PusnasError::ConfigurationError(message)
                if self.stage() == Some(PipelineStage::Derive) =>
            {
                format!(
                    "This book cannot be unlocked with the current setup: {}",
                    message
                )
            }
            PusnasError::NetworkError { .. } => {
                "Download failed because of a network problem. Please try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
