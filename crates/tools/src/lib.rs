//! Tools for the assistant
//!
//! Implements a JSON-schema described tool interface plus the tools the
//! LLM may call while composing a reply.

pub mod clock;
pub mod registry;
pub mod search;
pub mod tool;

pub use clock::CurrentTimeTool;
pub use registry::ToolRegistry;
pub use search::{SearchHit, SearchProvider, StaticSearchProvider, WebSearchTool};
pub use tool::{InputSchema, PropertySchema, Tool, ToolError, ToolOutput, ToolSchema};

impl From<ToolError> for parley_core::Error {
    fn from(err: ToolError) -> Self {
        parley_core::Error::Tool(err.to_string())
    }
}
