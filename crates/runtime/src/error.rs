use thiserror::Error;

use crate::conversation::ConversationError;
use crate::model::ModelError;
use crate::tools::ToolError;

/// Errors that end an agent loop run.
///
/// Tool failures that the model can react to never show up here; they are
/// appended to the conversation as error-tagged results instead.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// A tool failure the loop cannot recover from, such as a bad handshake.
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error("loop budget exceeded: {limit} model calls without a final answer")]
    LoopBudgetExceeded { limit: u32 },

    #[error("conversation cancelled")]
    Cancelled,

    #[error("empty input")]
    EmptyInput,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
