use thiserror::Error;

/// Errors from model backend calls.
///
/// Any of these ends the agent loop: there is no response to act on.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The request never got an answer (connection failure, timeout).
    #[error("network: {0}")]
    Network(String),

    /// The provider answered with an error status.
    #[error("provider api: {0}")]
    Api(String),

    /// The provider response could not be parsed.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The backend was built with settings it cannot use.
    #[error("backend configuration: {0}")]
    Config(String),
}
