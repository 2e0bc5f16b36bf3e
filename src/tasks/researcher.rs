use super::compressor::compress_research;
use super::queue::TopicResearcher;
use crate::error::ResearchError;
use crate::llm::{generate, GenerateRequest, Message, StopCondition};
use crate::models::CompressedBrief;
use crate::progress::{EventKind, InFlight};
use crate::session::ResearchSession;
use crate::tools::{ToolBox, WebSearchTool};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

pub const RESEARCHER_COST_SOURCE: &str = "deep-research-researcher";

/// Runs one focused investigation: a tool loop on the topic followed by a
/// compression pass over the resulting transcript.
pub struct ResearcherAgent {
    session: ResearchSession,
}

impl ResearcherAgent {
    pub fn new(session: ResearchSession) -> Self {
        Self { session }
    }

    /// Search (when configured) plus any injected connector tools.
    fn tools(&self) -> ToolBox {
        let mut tools = ToolBox::new();
        if let Some(ctx) = self.session.search_context() {
            tools.push(Arc::new(WebSearchTool::new(ctx)));
        }
        tools.extend(self.session.connectors.iter().cloned());
        tools
    }

    fn instructions(&self, tools: &ToolBox) -> String {
        let mut instructions = format!(
            r#"You are a research assistant investigating a single topic. Today's date is {}.

Use the available tools ({}) to gather evidence about the topic.

Requirements:
- Start with broad searches, then narrow down to fill specific gaps
- Stop as soon as you can answer the topic confidently; do not repeat searches
- Prefer primary and authoritative sources, and keep track of every URL
- When you are done, reply with your findings and no further tool calls"#,
            Utc::now().format("%Y-%m-%d"),
            tools.names().join(", ")
        );
        if let Some(fragment) = &self.session.config.mcp_prompt_fragment {
            instructions.push_str("\n\n");
            instructions.push_str(fragment);
        }
        instructions
    }

    #[instrument(skip(self))]
    pub async fn run(&self, topic: &str, tool_call_id: &str) -> Result<CompressedBrief, ResearchError> {
        let tools = self.tools();
        if tools.is_empty() {
            return Err(ResearchError::NoToolsAvailable);
        }

        let session = &self.session;
        let config = &session.config;
        info!(tools = tools.len(), "starting research");

        InFlight::start(
            &session.progress,
            tool_call_id,
            EventKind::Thoughts,
            "Researching",
            topic,
            None,
        )
        .complete("Research started", topic, None);

        let request = GenerateRequest {
            model: config.research_model_id.clone(),
            instructions: self.instructions(&tools),
            messages: vec![Message::user(topic)],
            max_output_tokens: config.research_model_max_tokens,
            stop_when: vec![StopCondition::StepCount(config.researcher_max_steps)],
        };
        let output = generate(
            session.model.as_ref(),
            &tools,
            request,
            &session.cancel,
            |step| {
                session
                    .costs
                    .add_llm_cost(&config.research_model_id, step.usage, RESEARCHER_COST_SOURCE)
            },
        )
        .await?;
        info!(steps = output.steps.len(), usage = ?output.usage, "research loop finished");

        let compressing = InFlight::start(
            &session.progress,
            tool_call_id,
            EventKind::Thoughts,
            "Compressing findings",
            topic,
            None,
        );
        let result = compress_research(session, topic, &output.transcript).await;
        match &result {
            Ok(_) => compressing.complete("Research complete", topic, None),
            Err(err) => compressing.complete("Research failed", err.to_string(), None),
        }
        result
    }
}

#[async_trait]
impl TopicResearcher for ResearcherAgent {
    async fn research(&self, topic: &str, tool_call_id: &str) -> Result<CompressedBrief, ResearchError> {
        self.run(topic, tool_call_id).await
    }
}
