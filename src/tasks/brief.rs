use crate::error::ResearchError;
use crate::llm::{CompletionRequest, Message};
use crate::models::ResearchBrief;
use crate::progress::{EventKind, InFlight};
use crate::session::ResearchSession;
use chrono::Utc;
use tracing::{info, instrument};

pub const BRIEF_COST_SOURCE: &str = "deep-research-brief";
pub const BRIEF_EVENT_ID: &str = "research-brief";

fn brief_prompt(query: &str) -> String {
    format!(
        r#"You are a research assistant. Today's date is {}.
Turn the following request into a detailed research brief that will guide a team of researchers:

"{query}"

Requirements:
- State the question to answer and every dimension the user asked about
- Keep constraints the user gave (time period, region, sources, format) and do not invent new ones
- Mark anything the user left open as open rather than guessing
- Write in the first person from the user's point of view
- Return only the brief"#,
        Utc::now().format("%Y-%m-%d")
    )
}

/// Rewrites the user's query into the research brief handed to the supervisor.
#[instrument(skip(session))]
pub async fn write_research_brief(session: &ResearchSession, query: &str) -> Result<ResearchBrief, ResearchError> {
    let config = &session.config;
    let writing = InFlight::start(
        &session.progress,
        BRIEF_EVENT_ID,
        EventKind::Thoughts,
        "Planning research",
        query,
        None,
    );

    let request = CompletionRequest {
        model: config.research_model_id.clone(),
        messages: vec![Message::user(brief_prompt(query))],
        tools: Vec::new(),
        max_output_tokens: config.research_model_max_tokens,
    };
    let response = tokio::select! {
        biased;
        _ = session.cancel.cancelled() => Err(ResearchError::Cancelled),
        response = session.model.complete(request) => response.map_err(ResearchError::from),
    };

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            writing.complete("Planning failed", err.to_string(), None);
            return Err(err);
        }
    };
    session
        .costs
        .add_llm_cost(&config.research_model_id, response.usage, BRIEF_COST_SOURCE);

    // An empty brief still leaves the supervisor something to work from.
    let brief = response
        .content
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| query.to_string());
    info!(brief_len = brief.len(), "research brief written");
    writing.complete("Research planned", brief.clone(), None);
    Ok(brief)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSessionConfig;
    use crate::cost::CostEntry;
    use crate::llm::{CompletionResponse, MockLanguageModel};
    use crate::progress::{EventStatus, MemorySink};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_brief_records_cost_and_events() {
        let model = Arc::new(MockLanguageModel::with_text("  I want to compare heat pumps.  "));
        let memory = Arc::new(MemorySink::new());
        let session = ResearchSession::new(AgentSessionConfig::default(), model.clone())
            .with_progress(memory.clone());

        let brief = write_research_brief(&session, "heat pumps vs boilers").await.unwrap();
        assert_eq!(brief, "I want to compare heat pumps.");
        assert!(model.requests()[0].messages[0].content.contains("heat pumps vs boilers"));

        let entries = session.costs.entries();
        assert!(matches!(&entries[..], [CostEntry::Llm { source, .. }] if source == BRIEF_COST_SOURCE));

        let events = memory.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, events[1].id);
        assert_eq!(events[1].status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_brief_falls_back_to_query() {
        let model = Arc::new(MockLanguageModel::with_text("   "));
        let session = ResearchSession::new(AgentSessionConfig::default(), model);
        let brief = write_research_brief(&session, "tidal energy").await.unwrap();
        assert_eq!(brief, "tidal energy");
    }

    #[tokio::test]
    async fn test_failure_still_completes_the_event() {
        let model = Arc::new(MockLanguageModel::new(|_| {
            Err(crate::error::LlmError::Other("offline".to_string()))
        }));
        let memory = Arc::new(MemorySink::new());
        let session = ResearchSession::new(AgentSessionConfig::default(), model).with_progress(memory.clone());

        assert!(write_research_brief(&session, "q").await.is_err());
        let events = memory.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].title, "Planning failed");
        assert!(session.costs.is_empty());
    }
}
