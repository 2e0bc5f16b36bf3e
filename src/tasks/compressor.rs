use crate::error::ResearchError;
use crate::llm::{CompletionRequest, Message, Role};
use crate::models::CompressedBrief;
use crate::session::ResearchSession;
use crate::truncate::truncate_messages;
use chrono::Utc;
use tracing::{debug, instrument};

pub const COMPRESSION_COST_SOURCE: &str = "deep-research-compress";

const COMPRESSION_REQUEST: &str = "All of the messages above are research an AI researcher gathered on a single topic. \
Clean up these findings into a dense brief. Do not drop facts, figures or sources; \
remove only duplicates and irrelevant material. End with a numbered list of every source URL cited.";

fn compression_instructions() -> String {
    format!(
        r#"You are a research assistant. A researcher has investigated a topic by calling tools and running web searches.
Your job is to clean up those findings while preserving every relevant statement, number and source the researcher gathered.

Requirements:
- Keep all information relevant to the topic, verbatim where possible
- Merge duplicate findings from different sources and cite each source
- Use inline citations like [1] that map to the source list at the end
- Do not add information that is not in the findings

Today's date is {}."#,
        Utc::now().format("%Y-%m-%d")
    )
}

/// Summarizes a researcher's raw transcript into a compressed brief.
///
/// The transcript's own leading system message is replaced by the
/// compression instructions, and the whole prompt is truncated to the
/// compression model's context window minus its output budget.
#[instrument(skip(session, transcript), fields(messages = transcript.len()))]
pub async fn compress_research(
    session: &ResearchSession,
    topic: &str,
    transcript: &[Message],
) -> Result<CompressedBrief, ResearchError> {
    let config = &session.config;
    let body = match transcript.first() {
        Some(first) if first.role == Role::System => &transcript[1..],
        _ => transcript,
    };

    let mut prompt = Vec::with_capacity(body.len() + 2);
    prompt.push(Message::system(compression_instructions()));
    prompt.extend(body.iter().cloned());
    prompt.push(Message::user(COMPRESSION_REQUEST));

    let window = session.model.context_window(&config.compression_model_id);
    let budget = window.saturating_sub(config.compression_model_max_tokens as usize);
    let messages = truncate_messages(&prompt, budget, session.token_counter.as_ref())?;
    if messages.len() < prompt.len() {
        debug!(dropped = prompt.len() - messages.len(), budget, "transcript truncated for compression");
    }

    let request = CompletionRequest {
        model: config.compression_model_id.clone(),
        messages,
        tools: Vec::new(),
        max_output_tokens: config.compression_model_max_tokens,
    };
    let response = tokio::select! {
        biased;
        _ = session.cancel.cancelled() => return Err(ResearchError::Cancelled),
        response = session.model.complete(request) => response?,
    };

    session
        .costs
        .add_llm_cost(&config.compression_model_id, response.usage, COMPRESSION_COST_SOURCE);
    debug!(usage = ?response.usage, "compression finished");
    Ok(response.content.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSessionConfig;
    use crate::cost::CostEntry;
    use crate::llm::{CompletionResponse, MockLanguageModel};
    use std::sync::Arc;

    fn session(model: Arc<MockLanguageModel>, max_tokens: u32) -> ResearchSession {
        let config = AgentSessionConfig {
            compression_model_id: "compress-model".to_string(),
            compression_model_max_tokens: max_tokens,
            ..Default::default()
        };
        ResearchSession::new(config, model)
    }

    #[tokio::test]
    async fn test_replaces_system_message_and_appends_request() {
        let model = Arc::new(MockLanguageModel::new(|_| {
            Ok(CompletionResponse::text("dense brief").with_usage(40, 10))
        }));
        let session = session(model.clone(), 1000);
        let transcript = vec![
            Message::system("researcher instructions"),
            Message::user("topic A"),
            Message::assistant("found things"),
        ];

        let brief = compress_research(&session, "topic A", &transcript).await.unwrap();
        assert_eq!(brief, "dense brief");

        let sent = &model.requests()[0];
        assert_eq!(sent.model, "compress-model");
        assert!(sent.tools.is_empty());
        assert_eq!(sent.messages.len(), 4);
        assert_eq!(sent.messages[0].role, Role::System);
        assert_ne!(sent.messages[0].content, "researcher instructions");
        assert_eq!(sent.messages[1].content, "topic A");
        assert_eq!(sent.messages[3].content, COMPRESSION_REQUEST);

        let entries = session.costs.entries();
        assert!(matches!(
            &entries[..],
            [CostEntry::Llm { source, .. }] if source == COMPRESSION_COST_SOURCE
        ));
    }

    #[tokio::test]
    async fn test_long_transcript_is_truncated_to_window() {
        let model = Arc::new(
            MockLanguageModel::new(|_| Ok(CompletionResponse::text("ok"))).with_context_window(1200),
        );
        let session = session(model.clone(), 200);
        let mut transcript = vec![Message::system("s"), Message::user("topic")];
        for i in 0..50 {
            transcript.push(Message::assistant(format!("{i} {}", "finding ".repeat(40))));
        }

        compress_research(&session, "topic", &transcript).await.unwrap();
        let sent = &model.requests()[0];
        assert!(sent.messages.len() < transcript.len() + 1);
        assert!(session.token_counter.count_messages(&sent.messages) <= 1000);
        assert_eq!(sent.messages.last().unwrap().content, COMPRESSION_REQUEST);
    }

    #[tokio::test]
    async fn test_window_smaller_than_instructions_is_a_config_error() {
        let model = Arc::new(
            MockLanguageModel::new(|_| Ok(CompletionResponse::text("ok"))).with_context_window(100),
        );
        let session = session(model.clone(), 90);
        let err = compress_research(&session, "t", &[Message::user("t")])
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::ContextBudgetExceeded { .. }));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_propagates_without_cost() {
        let model = Arc::new(MockLanguageModel::new(|_| {
            Err(crate::error::LlmError::Other("overloaded".to_string()))
        }));
        let session = session(model, 1000);
        let err = compress_research(&session, "t", &[Message::user("t")])
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Llm(_)));
        assert!(session.costs.is_empty());
    }
}
