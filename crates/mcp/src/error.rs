//! Stdio protocol error types.

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn server: {0}")]
    Spawn(std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server not initialized")]
    NotInitialized,

    #[error("server exited unexpectedly")]
    ServerExited,

    #[error("timeout after {0:?} waiting for response")]
    Timeout(std::time::Duration),

    #[error("failed to encode or decode message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("response line exceeds {max} bytes")]
    OutputTooLarge { max: usize },
}

impl Error {
    /// Map a pipe error to [`Error::ServerExited`] when the peer has gone away.
    pub(crate) fn from_pipe(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof => Self::ServerExited,
            _ => Self::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
