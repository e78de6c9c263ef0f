//! Tool registry
//!
//! Owns the tools available to the LLM and runs calls with a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parley_config::ToolsConfig;
use serde_json::Value;

use crate::clock::CurrentTimeTool;
use crate::search::{SearchProvider, WebSearchTool};
use crate::tool::{Tool, ToolError, ToolOutput, ToolSchema};

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout_secs: u64,
}

impl ToolRegistry {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            tools: HashMap::new(),
            timeout_secs,
        }
    }

    /// Registry with the clock and search tools
    pub fn with_defaults(config: &ToolsConfig, provider: Arc<dyn SearchProvider>) -> Self {
        let mut registry = Self::new(config.timeout_secs);
        registry.register(Arc::new(CurrentTimeTool::new()));
        registry.register(Arc::new(WebSearchTool::new(provider, config)));
        registry
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate and execute a tool call
    pub async fn call(&self, name: &str, input: Value) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        tool.validate(&input)?;

        let secs = tool.timeout_secs().min(self.timeout_secs);
        match tokio::time::timeout(Duration::from_secs(secs), tool.execute(input)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!(tool = name, error = %e, "Tool call failed");
                }
                result
            }
            Err(_) => {
                tracing::warn!(tool = name, timeout_secs = secs, "Tool call timed out");
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    secs,
                })
            }
        }
    }
}
