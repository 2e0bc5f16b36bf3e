pub mod exa;
pub mod search;
pub mod tavily;

use crate::error::ToolError;
use crate::llm::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub use exa::ExaProvider;
pub use search::{
    search_step, single_query_search, SearchContext, SearchOptions, SearchOutcome,
    SearchProvider, WebSearchTool, WEB_SEARCH,
};
pub use tavily::TavilyProvider;

/// A single callable tool exposed to a model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// `call_id` identifies the model's tool invocation; tools use it to tag
    /// the progress events they emit.
    async fn call(&self, call_id: &str, arguments: Value) -> Result<String, ToolError>;
}

/// Everything a generation loop needs to expose and dispatch tools.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn invoke(&self, call: &ToolCall) -> Result<String, ToolError>;

    /// Sees every tool call of step `step` before any of them runs.
    fn batch_started(&self, _step: usize, _calls: &[ToolCall]) {}

    /// Runs once every call of step `step` has resolved.
    fn batch_finished(&self, _step: usize) {}
}

/// An open set of tools dispatched by name.
#[derive(Default, Clone)]
pub struct ToolBox {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.definition().name).collect()
    }
}

impl Extend<Arc<dyn Tool>> for ToolBox {
    fn extend<I: IntoIterator<Item = Arc<dyn Tool>>>(&mut self, iter: I) {
        self.tools.extend(iter);
    }
}

#[async_trait]
impl ToolHandler for ToolBox {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    async fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition().name == call.name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: call.name.clone(),
            })?;
        tool.call(&call.id, call.arguments.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "Echo the input".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn call(&self, call_id: &str, arguments: Value) -> Result<String, ToolError> {
            Ok(format!("{call_id}:{arguments}"))
        }
    }

    #[tokio::test]
    async fn test_toolbox_dispatches_by_name() {
        let mut tools = ToolBox::new();
        tools.push(Arc::new(Echo));
        assert_eq!(tools.names(), vec!["echo".to_string()]);

        let out = tools
            .invoke(&ToolCall::new("c1", "echo", json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(out, r#"c1:{"a":1}"#);
    }

    #[tokio::test]
    async fn test_toolbox_rejects_unknown_tool() {
        let tools = ToolBox::new();
        let err = tools
            .invoke(&ToolCall::new("c1", "nope", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { name } if name == "nope"));
    }
}
