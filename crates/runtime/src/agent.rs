//! The agent loop: model call, tool dispatch, repeat until a final answer.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::model::{Backend, ModelRequest, ToolCall, Usage};
use crate::tools::{ToolExecutionResult, ToolRegistry};
use crate::{Error, Result};

/// Default cap on model calls per user message.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

const ABANDONED: &str = "call abandoned: the previous request was interrupted";

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    AwaitingToolResults,
    Done,
    Failed,
}

/// How the calls of one assistant turn are run.
///
/// Results are appended in call order under either policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// All calls at once.
    #[default]
    Parallel,
    /// One after another.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Model calls allowed per user message.
    pub max_iterations: u32,
    pub dispatch: DispatchPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            dispatch: DispatchPolicy::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}

/// One conversation driven against a model and a shared tool registry.
pub struct Agent<B> {
    backend: B,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    conversation: Conversation,
    state: LoopState,
    iterations: u32,
    usage: Usage,
    last_failure: Option<Error>,
}

impl<B: Backend> Agent<B> {
    pub fn new(backend: B, tools: Arc<ToolRegistry>, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            tools,
            config,
            conversation: Conversation::new(),
            state: LoopState::Done,
            iterations: 0,
            usage: Usage::default(),
            last_failure: None,
        })
    }

    /// Send a user message and run the loop to a final answer.
    pub async fn chat(&mut self, input: &str) -> Result<String> {
        self.chat_with_cancel(input, &CancellationToken::new())
            .await
    }

    /// Like [`Agent::chat`], stopping with [`Error::Cancelled`] at the next
    /// state transition once `cancel` fires. A call already in flight runs to
    /// completion or its own timeout.
    pub async fn chat_with_cancel(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::EmptyInput);
        }

        self.abandon_pending()?;
        self.conversation.push_user(input);
        self.state = LoopState::AwaitingModel;
        self.iterations = 0;
        self.last_failure = None;

        match self.drive(cancel).await {
            Ok(answer) => {
                info!(
                    conversation = %self.conversation.id(),
                    iterations = self.iterations,
                    "final answer"
                );
                Ok(answer)
            }
            Err(e) => {
                warn!(conversation = %self.conversation.id(), error = %e, "loop failed");
                self.state = LoopState::Failed;
                self.last_failure = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<String> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.state {
                LoopState::AwaitingModel => {
                    if self.iterations >= self.config.max_iterations {
                        return Err(Error::LoopBudgetExceeded {
                            limit: self.config.max_iterations,
                        });
                    }
                    self.iterations += 1;

                    let response = self
                        .backend
                        .call(ModelRequest {
                            turns: self.conversation.turns(),
                            tools: self.tools.list(),
                        })
                        .await?;
                    self.usage += response.usage;

                    debug!(
                        iteration = self.iterations,
                        tool_calls = response.tool_calls.len(),
                        "model responded"
                    );

                    if response.is_final() {
                        self.conversation
                            .push_assistant(response.text.clone(), Vec::new())?;
                        self.state = LoopState::Done;
                        return Ok(response.text);
                    }
                    self.conversation
                        .push_assistant(response.text, response.tool_calls)?;
                    self.state = LoopState::AwaitingToolResults;
                }
                LoopState::AwaitingToolResults => {
                    self.dispatch().await?;
                    self.state = LoopState::AwaitingModel;
                }
                LoopState::Done | LoopState::Failed => {
                    return Err(Error::InvalidState(format!(
                        "loop driven from {:?}",
                        self.state
                    )));
                }
            }
        }
    }

    /// Run every pending call and append the results in call order.
    async fn dispatch(&mut self) -> Result<()> {
        let calls: Vec<ToolCall> = self
            .conversation
            .pending_calls()
            .into_iter()
            .cloned()
            .collect();
        let tools = &self.tools;

        let results = match self.config.dispatch {
            DispatchPolicy::Parallel => join_all(calls.iter().map(|c| run_call(tools, c))).await,
            DispatchPolicy::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    results.push(run_call(tools, call).await);
                }
                results
            }
        };

        for (call, result) in calls.iter().zip(results) {
            self.conversation.push_tool_result(&call.id, result?)?;
        }
        Ok(())
    }

    /// Answer calls left open by an interrupted run so the history stays
    /// well-formed.
    fn abandon_pending(&mut self) -> Result<()> {
        let open: Vec<String> = self
            .conversation
            .pending_calls()
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        for id in open {
            self.conversation
                .push_tool_result(id, ToolExecutionResult::failure(ABANDONED))?;
        }
        Ok(())
    }

    /// Drop the history and start a new conversation.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.state = LoopState::Done;
        self.iterations = 0;
        self.last_failure = None;
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Why the last run ended in [`LoopState::Failed`].
    pub fn last_failure(&self) -> Option<&Error> {
        self.last_failure.as_ref()
    }

    /// Model calls made for the latest user message.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Tokens used over the agent's lifetime.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// Execute one call. Only fatal tool errors escape; everything else becomes
/// an error-tagged result for the model.
async fn run_call(tools: &ToolRegistry, call: &ToolCall) -> Result<ToolExecutionResult> {
    match tools.execute(&call.name, call.arguments.clone()).await {
        Ok(result) => {
            if result.is_error {
                warn!(tool = %call.name, call = %call.id, output = %result.output_text(), "tool reported failure");
            }
            Ok(result)
        }
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            warn!(tool = %call.name, call = %call.id, error = %e, "tool call failed");
            Ok(ToolExecutionResult::from(e))
        }
    }
}
