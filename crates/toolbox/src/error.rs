//! Tool server errors.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The stdio protocol loop failed.
    #[error(transparent)]
    Protocol(#[from] mcp::Error),

    #[error(transparent)]
    Tool(#[from] runtime::ToolError),
}

pub type Result<T> = std::result::Result<T, Error>;
