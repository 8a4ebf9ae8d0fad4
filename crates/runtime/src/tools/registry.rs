//! Tool registry: name to definition and executor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{Arguments, ToolDefinition, ToolError, ToolExecutionResult};
use crate::transport::{RemoteTool, ToolTransport};

/// Something that can run a tool.
///
/// This is the boundary between the agent loop and side effects.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run with already-validated arguments.
    ///
    /// `Err` means the tool could not be reached or run at all; a tool that
    /// ran and failed may also report that as `Ok` with `is_error` set.
    async fn execute(&self, arguments: Arguments) -> Result<ToolExecutionResult, ToolError>;
}

/// Adapts a plain function into a [`ToolExecutor`].
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F> ToolExecutor for FnTool<F>
where
    F: Fn(Arguments) -> Result<Value, ToolError> + Send + Sync,
{
    async fn execute(&self, arguments: Arguments) -> Result<ToolExecutionResult, ToolError> {
        (self.0)(arguments).map(ToolExecutionResult::success)
    }
}

/// Registered tools, in registration order.
///
/// Built once at startup (`&mut self`), then shared read-only.
#[derive(Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    executors: Vec<Arc<dyn ToolExecutor>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover the tools a transport offers and register each one as a
    /// remote executor.
    pub async fn from_transport(transport: Arc<dyn ToolTransport>) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for definition in transport.list_tools().await? {
            let executor = RemoteTool::new(Arc::clone(&transport), definition.name.clone());
            registry.register(definition, executor)?;
        }
        info!(
            transport = transport.kind(),
            tools = registry.len(),
            "discovered tools"
        );
        Ok(registry)
    }

    /// Register a tool.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        executor: impl ToolExecutor + 'static,
    ) -> Result<(), ToolError> {
        self.register_shared(definition, Arc::new(executor))
    }

    /// Register a tool backed by a plain function.
    pub fn register_fn<F>(&mut self, definition: ToolDefinition, f: F) -> Result<(), ToolError>
    where
        F: Fn(Arguments) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.register(definition, FnTool(f))
    }

    /// Register a tool whose executor is already shared.
    pub fn register_shared(
        &mut self,
        definition: ToolDefinition,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<(), ToolError> {
        if self.index.contains_key(&definition.name) {
            return Err(ToolError::DuplicateTool(definition.name));
        }
        debug!(tool = %definition.name, "registered tool");
        self.index
            .insert(definition.name.clone(), self.definitions.len());
        self.definitions.push(definition);
        self.executors.push(executor);
        Ok(())
    }

    /// Get a tool's executor by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ToolExecutor>, ToolError> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.executors[i]))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Get a tool's definition by name.
    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.definitions[i])
    }

    /// All definitions, in registration order.
    pub fn list(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Resolve, validate, and run one tool.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<ToolExecutionResult, ToolError> {
        let executor = self.lookup(name)?;
        if let Some(definition) = self.definition(name) {
            definition.check_arguments(&arguments)?;
        }
        executor.execute(arguments).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self.definitions.iter().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
