//! Error types for Tiernet.
//!
//! Errors fall into two groups. Fatal errors (rejected provider requests,
//! wait timeouts, terminal resource states, bad configuration, cancellation)
//! stop the run. Tagging failures are reported but never stop the run; use
//! [`Error::is_fatal`] to tell them apart.

use crate::provider::{ProviderError, ResourceKind};
use crate::provision::Step;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Tiernet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Tiernet.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Provider Errors
    // ========================================================================
    /// A create or mutate request was refused by the provider.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    // ========================================================================
    // Wait Errors
    // ========================================================================
    /// A polled resource never reached the target state within the bound.
    #[error(
        "Timed out after {waited:?} waiting for {kind} '{id}' to become '{target}'{}",
        last_state.as_ref().map(|s| format!(" (last seen: '{}')", s)).unwrap_or_default()
    )]
    WaitTimeout {
        /// Kind of the polled resource
        kind: ResourceKind,
        /// Provider id of the polled resource
        id: String,
        /// State that was expected
        target: String,
        /// Time spent waiting
        waited: Duration,
        /// Last state the provider reported, if any
        last_state: Option<String>,
    },

    /// A polled resource entered a state it can never leave for the target.
    #[error("{kind} '{id}' entered state '{state}' while waiting for '{target}'")]
    WaitFailed {
        /// Kind of the polled resource
        kind: ResourceKind,
        /// Provider id of the polled resource
        id: String,
        /// State that was expected
        target: String,
        /// Terminal state that was observed
        state: String,
    },

    // ========================================================================
    // Tagging Errors
    // ========================================================================
    /// Tagging a resource failed. Cosmetic, never aborts a run.
    #[error("Failed to tag '{id}': {message}")]
    Tagging {
        /// Resource that could not be tagged
        id: String,
        /// Provider message
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration is present but invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {message}")]
    ConfigLoad {
        /// Path of the configuration file
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Control Flow
    // ========================================================================
    /// The run was cancelled before the given step started.
    #[error("Provisioning cancelled before step '{step}'")]
    Cancelled {
        /// The step that was not started
        step: Step,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Tagging { .. })
    }

    /// Whether this error came from a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled { .. } => 130,
            _ => 1,
        }
    }
}
