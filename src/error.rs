//! Error types for the provisioning engine.

use std::io;

use thiserror::Error;

/// Result type alias for the provisioning engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Provisioning engine errors.
///
/// The variants map onto the engine's propagation rules: `Configuration`,
/// `ProviderResolution` and `CredentialResolution` surface while a service
/// is being built and block its activation; `RevocationCheck` fails only
/// the single validation in progress; `State` reports a runtime operation
/// addressed to a service that is not in the expected state.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or conflicting configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No provider supplies the requested algorithm
    #[error("No provider found for {kind} algorithm '{algorithm}'")]
    ProviderResolution {
        /// Factory kind that could not be resolved (trust or key manager)
        kind: &'static str,
        /// The algorithm that was requested
        algorithm: String,
    },

    /// Keystore credential could not be resolved
    #[error("Credential resolution error: {0}")]
    CredentialResolution(String),

    /// CRL unreadable, responder unreachable, or certificate revoked
    #[error("Revocation check error: {0}")]
    RevocationCheck(String),

    /// Peer certificate chain failed validation
    #[error("Certificate validation error: {0}")]
    Validation(String),

    /// Runtime operation addressed to a service in the wrong state
    #[error("State error: {0}")]
    State(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a `Configuration` error from any displayable value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a `RevocationCheck` error from any displayable value.
    pub fn revocation(msg: impl Into<String>) -> Self {
        Self::RevocationCheck(msg.into())
    }

    /// Create a `State` error from any displayable value.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}
