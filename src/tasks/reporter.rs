use crate::error::ResearchError;
use crate::llm::{CompletionRequest, Message};
use crate::models::CompressedBrief;
use crate::progress::{EventKind, InFlight};
use crate::session::ResearchSession;
use crate::truncate::truncate_messages;
use chrono::Utc;
use tracing::{debug, info, instrument};

pub const REPORT_COST_SOURCE: &str = "deep-research-report";
pub const REPORT_EVENT_ID: &str = "final-report";

const REPORT_REQUEST: &str = "Write the final report now, using only the findings above.";

fn report_instructions(research_brief: &str) -> String {
    format!(
        r#"You are a research assistant. Today's date is {}.
Create a comprehensive research report that answers the following brief, based on the findings you are given:

{research_brief}

Requirements:
- Create a well-structured markdown report
- Start with a short summary that answers the brief directly
- Organize the body by theme, not by finding
- Add a conclusion section
- Cite sources inline as [1], [2] and list every cited URL in a final Sources section
- Do not invent facts that are not supported by the findings"#,
        Utc::now().format("%Y-%m-%d")
    )
}

/// Writes the final markdown report from the supervisor's findings.
///
/// Each finding is sent as its own message so that, if the findings outgrow
/// the research model's window, the oldest are dropped first.
#[instrument(skip_all, fields(findings = findings.len()))]
pub async fn write_final_report(
    session: &ResearchSession,
    research_brief: &str,
    findings: &[CompressedBrief],
) -> Result<String, ResearchError> {
    let writing = InFlight::start(
        &session.progress,
        REPORT_EVENT_ID,
        EventKind::Thoughts,
        "Writing report",
        format!("Synthesizing {} findings", findings.len()),
        None,
    );

    let result = request_report(session, research_brief, findings).await;

    match &result {
        Ok(report) => {
            info!(report_len = report.len(), "final report written");
            writing.complete("Report ready", format!("{} characters", report.len()), None);
        }
        Err(err) => writing.complete("Report failed", err.to_string(), None),
    }
    result
}

async fn request_report(
    session: &ResearchSession,
    research_brief: &str,
    findings: &[CompressedBrief],
) -> Result<String, ResearchError> {
    let config = &session.config;
    let mut prompt = Vec::with_capacity(findings.len() + 2);
    prompt.push(Message::system(report_instructions(research_brief)));
    prompt.extend(
        findings
            .iter()
            .enumerate()
            .map(|(i, finding)| Message::user(format!("Finding {}:\n{finding}", i + 1))),
    );
    prompt.push(Message::user(REPORT_REQUEST));

    let window = session.model.context_window(&config.research_model_id);
    let budget = window.saturating_sub(config.research_model_max_tokens as usize);
    let messages = truncate_messages(&prompt, budget, session.token_counter.as_ref())?;
    if messages.len() < prompt.len() {
        debug!(dropped = prompt.len() - messages.len(), budget, "findings truncated for report");
    }

    let request = CompletionRequest {
        model: config.research_model_id.clone(),
        messages,
        tools: Vec::new(),
        max_output_tokens: config.research_model_max_tokens,
    };
    let response = tokio::select! {
        biased;
        _ = session.cancel.cancelled() => return Err(ResearchError::Cancelled),
        response = session.model.complete(request) => response?,
    };
    session
        .costs
        .add_llm_cost(&config.research_model_id, response.usage, REPORT_COST_SOURCE);
    Ok(response.content.unwrap_or_default())
}
