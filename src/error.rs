//! Error types for the verification core

use crate::driver::ContextId;
use thiserror::Error;

/// Result type alias for verification operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while polling, switching contexts, or verifying order
#[derive(Error, Debug)]
pub enum Error {
    /// A wait never resolved within its budget
    #[error("Timed out after {elapsed_ms}ms waiting for {waited_for}: {last_reason}")]
    Timeout {
        /// Description of the awaited condition
        waited_for: String,
        /// Reason reported by the last `NotYet` evaluation
        last_reason: String,
        /// Time actually spent waiting
        elapsed_ms: u64,
    },

    /// The predicate signalled an unrecoverable condition
    #[error("Predicate failed: {0}")]
    FatalPredicate(Box<Error>),

    /// No new context appeared and the origin did not navigate either
    #[error("No new context opened from {origin} within {timeout_ms}ms (open: {contexts:?})")]
    ContextSwitchTimeout {
        origin: ContextId,
        timeout_ms: u64,
        contexts: Vec<ContextId>,
    },

    /// A verification ran and reported failure
    #[error("Verification failed: {diagnostic}")]
    VerificationFailure {
        diagnostic: String,
        before: Vec<String>,
        after: Vec<String>,
    },

    /// An element or value is not present yet. Pollers treat this as transient.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A context id is not known to the driver
    #[error("Unknown context: {0}")]
    ContextNotFound(ContextId),

    /// Invalid configuration or wait directive
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The automation driver rejected an operation
    #[error("Driver error: {0}")]
    DriverError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means "not there yet" rather than "broken"
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
