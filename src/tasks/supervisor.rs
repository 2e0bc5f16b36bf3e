use super::queue::{ResearchQueue, TopicResearcher};
use super::researcher::ResearcherAgent;
use crate::error::{ResearchError, ToolError};
use crate::llm::{generate, GenerateRequest, Message, StopCondition, ToolCall, ToolDefinition};
use crate::models::CompressedBrief;
use crate::progress::{EventKind, InFlight, ProgressSink};
use crate::session::ResearchSession;
use crate::tools::ToolHandler;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument};

pub const SUPERVISOR_COST_SOURCE: &str = "deep-research-supervisor";
pub const CONDUCT_RESEARCH: &str = "conduct_research";
pub const RESEARCH_COMPLETE: &str = "research_complete";

/// The supervisor's closed tool vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    ConductResearch { topic: String },
    ResearchComplete,
}

#[derive(Debug, Deserialize)]
struct ConductResearchArgs {
    #[serde(alias = "topic")]
    research_topic: String,
}

impl ToolInvocation {
    pub fn parse(call: &ToolCall) -> Result<Self, ToolError> {
        match call.name.as_str() {
            CONDUCT_RESEARCH => {
                let args: ConductResearchArgs = serde_json::from_value(call.arguments.clone())
                    .map_err(|e| ToolError::InvalidArguments {
                        name: CONDUCT_RESEARCH.to_string(),
                        reason: e.to_string(),
                    })?;
                let topic = args.research_topic.trim();
                if topic.is_empty() {
                    return Err(ToolError::InvalidArguments {
                        name: CONDUCT_RESEARCH.to_string(),
                        reason: "research_topic must not be empty".to_string(),
                    });
                }
                Ok(Self::ConductResearch {
                    topic: topic.to_string(),
                })
            }
            RESEARCH_COMPLETE => Ok(Self::ResearchComplete),
            other => Err(ToolError::UnknownTool {
                name: other.to_string(),
            }),
        }
    }

    fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: CONDUCT_RESEARCH.to_string(),
                description: "Delegate research on one focused topic to a researcher. Returns the researcher's compressed findings.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "research_topic": {
                            "type": "string",
                            "description": "The topic to research, described in enough detail to work on independently"
                        }
                    },
                    "required": ["research_topic"]
                }),
            },
            ToolDefinition {
                name: RESEARCH_COMPLETE.to_string(),
                description: "Signal that enough research has been gathered.".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
        ]
    }
}

/// Topics dispatched in one step, for the aggregated progress event.
fn dispatched_topics(calls: &[ToolCall]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|call| match ToolInvocation::parse(call) {
            Ok(ToolInvocation::ConductResearch { topic }) => Some(topic),
            _ => None,
        })
        .collect()
}

/// Correlation id of the aggregated dispatch event for one supervisor step.
fn dispatch_event_id(step: usize) -> String {
    format!("supervisor-step-{step}")
}

struct Dispatch {
    event: InFlight,
    topics: String,
    count: usize,
}

/// Dispatches supervisor tool calls onto the session's research queue.
struct SupervisorTools<'q> {
    queue: &'q ResearchQueue,
    progress: Arc<dyn ProgressSink>,
    concurrency_hint: usize,
    dispatch: Mutex<Option<Dispatch>>,
}

#[async_trait]
impl<'q> ToolHandler for SupervisorTools<'q> {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ToolInvocation::definitions()
    }

    async fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
        match ToolInvocation::parse(call)? {
            ToolInvocation::ResearchComplete => Ok("Research marked complete.".to_string()),
            ToolInvocation::ConductResearch { topic } => {
                // Enqueued before the first await, so queue order follows the
                // order the calls were issued in.
                let ticket = self.queue.enqueue(topic, call.id.clone());
                ticket.wait().await.map_err(|err| ToolError::Execution {
                    name: CONDUCT_RESEARCH.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    fn batch_started(&self, step: usize, calls: &[ToolCall]) {
        let topics = dispatched_topics(calls);
        if topics.is_empty() {
            return;
        }
        if topics.len() > self.concurrency_hint {
            debug!(requested = topics.len(), hint = self.concurrency_hint, "supervisor exceeded concurrency hint");
        }
        let joined = topics.join("; ");
        let event = InFlight::start(
            &self.progress,
            &dispatch_event_id(step),
            EventKind::Thoughts,
            "Dispatching research",
            joined.clone(),
            None,
        );
        let previous = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Dispatch {
                event,
                topics: joined,
                count: topics.len(),
            });
        drop(previous);
    }

    fn batch_finished(&self, _step: usize) {
        let finished = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(Dispatch { event, topics, count }) = finished {
            event.complete(format!("Researched {count} topics"), topics, None);
        }
    }
}

/// Top-level controller: decides what to research and when to stop.
pub struct SupervisorAgent {
    session: ResearchSession,
    researcher: Arc<dyn TopicResearcher>,
}

impl SupervisorAgent {
    pub fn new(session: ResearchSession) -> Self {
        let researcher = Arc::new(ResearcherAgent::new(session.clone()));
        Self {
            session,
            researcher,
        }
    }

    /// Uses `researcher` for queued topics instead of a [`ResearcherAgent`].
    pub fn with_researcher(session: ResearchSession, researcher: Arc<dyn TopicResearcher>) -> Self {
        Self {
            session,
            researcher,
        }
    }

    fn instructions(&self) -> String {
        let config = &self.session.config;
        format!(
            r#"You are a research supervisor. Today's date is {}.
Your job is to gather the research needed to answer the brief by delegating focused topics with the {CONDUCT_RESEARCH} tool.

Requirements:
- Each topic must be self-contained; researchers cannot see the brief or each other's work
- Dispatch at most {} topics per turn, and only split work when the sub-topics are truly independent
- Review the returned findings before deciding whether more research is needed
- You have at most {} research rounds; call {RESEARCH_COMPLETE} as soon as the findings are sufficient"#,
            Utc::now().format("%Y-%m-%d"),
            config.max_concurrent_research_units,
            config.max_researcher_iterations,
        )
    }

    /// Runs the supervision loop and returns the compressed briefs in the
    /// order their research was dispatched.
    ///
    /// Queued work is always drained before returning. On cancellation the
    /// briefs that already resolved are returned, or `Cancelled` if none did.
    #[instrument(skip(self, research_brief), fields(brief_len = research_brief.len()))]
    pub async fn run(&self, research_brief: &str) -> Result<Vec<CompressedBrief>, ResearchError> {
        let session = &self.session;
        let config = &session.config;
        let queue = ResearchQueue::start(Arc::clone(&self.researcher), session.cancel.clone());
        let tools = SupervisorTools {
            queue: &queue,
            progress: Arc::clone(&session.progress),
            concurrency_hint: config.max_concurrent_research_units,
            dispatch: Mutex::new(None),
        };

        let request = GenerateRequest {
            model: config.research_model_id.clone(),
            instructions: self.instructions(),
            messages: vec![Message::user(research_brief)],
            max_output_tokens: config.research_model_max_tokens,
            stop_when: vec![
                StopCondition::ToolCalled(RESEARCH_COMPLETE),
                StopCondition::StepCount(config.supervisor_step_cap()),
            ],
        };

        let result = generate(session.model.as_ref(), &tools, request, &session.cancel, |step| {
            session
                .costs
                .add_llm_cost(&config.research_model_id, step.usage, SUPERVISOR_COST_SOURCE);
        })
        .await;
        // An interrupted step's dispatch event is closed as cancelled.
        drop(tools);

        queue.shutdown().await;
        let findings = queue.resolved();

        match result {
            Ok(output) => {
                info!(steps = output.steps.len(), findings = findings.len(), "supervisor finished");
                Ok(findings)
            }
            Err(ResearchError::Cancelled) if !findings.is_empty() => {
                info!(findings = findings.len(), "supervisor cancelled, returning partial findings");
                Ok(findings)
            }
            Err(err) => Err(err),
        }
    }
}
