//! Conversation state: the ordered turn history of one conversation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::model::ToolCall;
use crate::tools::ToolExecutionResult;

/// A unique identifier for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        output: Value,
        is_error: bool,
    },
}

/// Appending a turn would break the call/result pairing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("tool result {0} does not answer a call from the preceding assistant turn")]
    UnmatchedResult(String),

    #[error("tool call {0} already has a result")]
    DuplicateResult(String),

    #[error("tool call id {0} appears twice in one assistant turn")]
    DuplicateCallId(String),
}

/// Append-only turn history.
///
/// Every tool result answers a distinct call of the assistant turn that
/// precedes the run of results it belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::User { text: text.into() });
    }

    pub fn push_assistant(
        &mut self,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<(), ConversationError> {
        for (i, call) in tool_calls.iter().enumerate() {
            if tool_calls[..i].iter().any(|c| c.id == call.id) {
                return Err(ConversationError::DuplicateCallId(call.id.clone()));
            }
        }
        self.turns.push(Turn::Assistant {
            text: text.into(),
            tool_calls,
        });
        Ok(())
    }

    pub fn push_tool_result(
        &mut self,
        call_id: impl Into<String>,
        result: ToolExecutionResult,
    ) -> Result<(), ConversationError> {
        let call_id = call_id.into();
        let (calls, answered) = self.open_batch();

        if !calls.iter().any(|c| c.id == call_id) {
            return Err(ConversationError::UnmatchedResult(call_id));
        }
        if answered.contains(&call_id.as_str()) {
            return Err(ConversationError::DuplicateResult(call_id));
        }

        self.turns.push(Turn::ToolResult {
            call_id,
            output: result.output,
            is_error: result.is_error,
        });
        Ok(())
    }

    /// Calls of the latest assistant turn that have no result yet, in order.
    pub fn pending_calls(&self) -> Vec<&ToolCall> {
        let (calls, answered) = self.open_batch();
        calls
            .iter()
            .filter(|c| !answered.contains(&c.id.as_str()))
            .collect()
    }

    /// Start over with a fresh id and no turns.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// The calls of the assistant turn directly before the trailing run of
    /// tool results, and the ids that run already answers.
    fn open_batch(&self) -> (&[ToolCall], Vec<&str>) {
        let mut answered = Vec::new();
        for turn in self.turns.iter().rev() {
            match turn {
                Turn::ToolResult { call_id, .. } => answered.push(call_id.as_str()),
                Turn::Assistant { tool_calls, .. } => return (tool_calls, answered),
                Turn::User { .. } => break,
            }
        }
        (&[], answered)
    }
}
