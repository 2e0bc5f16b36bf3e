//! Tool-augmented generation loop.
//!
//! Each step is one model call. Tool calls requested in a step are executed
//! together and their results appended in call order before the next step.
//! The loop ends when the model answers without tools or a stop condition
//! matches.

use super::{CompletionRequest, LanguageModel, Message, TokenUsage, ToolCall};
use crate::error::ResearchError;
use crate::tools::ToolHandler;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCondition {
    /// A tool with this name was called in the latest step.
    ToolCalled(&'static str),
    /// This many steps have run.
    StepCount(usize),
}

impl StopCondition {
    fn is_met(&self, steps: &[StepRecord]) -> bool {
        match self {
            StopCondition::ToolCalled(name) => steps
                .last()
                .is_some_and(|step| step.tool_calls.iter().any(|c| c.name == *name)),
            StopCondition::StepCount(n) => steps.len() >= *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub is_error: bool,
}

/// What happened in one model step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// 1-based.
    pub index: usize,
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolOutcome>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub instructions: String,
    pub messages: Vec<Message>,
    pub max_output_tokens: u32,
    pub stop_when: Vec<StopCondition>,
}

#[derive(Debug, Clone)]
pub struct GenerateOutput {
    pub text: String,
    /// Full conversation, starting with the system instructions.
    pub transcript: Vec<Message>,
    pub steps: Vec<StepRecord>,
    pub usage: TokenUsage,
}

/// Runs the loop. `on_step` observes every finished step, including the last.
pub async fn generate<F>(
    model: &dyn LanguageModel,
    tools: &dyn ToolHandler,
    request: GenerateRequest,
    cancel: &CancellationToken,
    mut on_step: F,
) -> Result<GenerateOutput, ResearchError>
where
    F: FnMut(&StepRecord) + Send,
{
    let GenerateRequest {
        model: model_id,
        instructions,
        messages,
        max_output_tokens,
        stop_when,
    } = request;

    let mut transcript = Vec::with_capacity(messages.len() + 1);
    transcript.push(Message::system(instructions));
    transcript.extend(messages);

    let definitions = tools.definitions();
    let mut steps: Vec<StepRecord> = Vec::new();
    let mut usage = TokenUsage::default();

    loop {
        let completion = CompletionRequest {
            model: model_id.clone(),
            messages: transcript.clone(),
            tools: definitions.clone(),
            max_output_tokens,
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            response = model.complete(completion) => response?,
        };
        usage.accumulate(&response.usage);

        let index = steps.len() + 1;
        if response.tool_calls.is_empty() {
            transcript.push(Message::assistant(
                response.content.clone().unwrap_or_default(),
            ));
            let step = StepRecord {
                index,
                text: response.content,
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
                usage: response.usage,
            };
            debug!(model = %model_id, step = index, input_tokens = step.usage.input_tokens, output_tokens = step.usage.output_tokens, "final step");
            on_step(&step);
            steps.push(step);
            break;
        }

        transcript.push(Message::assistant_with_tools(
            response.content.clone().unwrap_or_default(),
            response.tool_calls.clone(),
        ));

        tools.batch_started(index, &response.tool_calls);
        let tool_results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            results = join_all(response.tool_calls.iter().map(|call| run_tool(tools, call))) => results,
        };
        tools.batch_finished(index);
        for outcome in &tool_results {
            transcript.push(Message::tool_result(&outcome.call_id, &outcome.output));
        }

        let step = StepRecord {
            index,
            text: response.content,
            tool_calls: response.tool_calls,
            tool_results,
            usage: response.usage,
        };
        debug!(model = %model_id, step = index, tool_calls = step.tool_calls.len(), input_tokens = step.usage.input_tokens, output_tokens = step.usage.output_tokens, "tool step");
        on_step(&step);
        steps.push(step);

        if stop_when.iter().any(|condition| condition.is_met(&steps)) {
            debug!(model = %model_id, steps = steps.len(), "stop condition reached");
            break;
        }
    }

    let text = steps
        .iter()
        .rev()
        .find_map(|step| step.text.clone())
        .unwrap_or_default();

    Ok(GenerateOutput {
        text,
        transcript,
        steps,
        usage,
    })
}

async fn run_tool(tools: &dyn ToolHandler, call: &ToolCall) -> ToolOutcome {
    match tools.invoke(call).await {
        Ok(output) => ToolOutcome {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error: false,
        },
        Err(err) => {
            warn!(tool = %call.name, call_id = %call.id, error = %err, "tool call failed");
            ToolOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output: format!("Error: {err}"),
                is_error: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::llm::{CompletionResponse, MockLanguageModel, Role, ToolDefinition};
    use crate::tools::ToolHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Tools;

    #[async_trait]
    impl ToolHandler for Tools {
        fn definitions(&self) -> Vec<ToolDefinition> {
            ["lookup", "finish", "broken"]
                .iter()
                .map(|name| ToolDefinition {
                    name: name.to_string(),
                    description: String::new(),
                    parameters: json!({"type": "object"}),
                })
                .collect()
        }

        async fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
            match call.name.as_str() {
                "broken" => Err(ToolError::Execution {
                    name: call.name.clone(),
                    message: "boom".to_string(),
                }),
                _ => Ok(format!("{} ok", call.name)),
            }
        }
    }

    fn request(stop_when: Vec<StopCondition>) -> GenerateRequest {
        GenerateRequest {
            model: "test-model".to_string(),
            instructions: "system".to_string(),
            messages: vec![Message::user("go")],
            max_output_tokens: 100,
            stop_when,
        }
    }

    /// Calls `lookup` forever.
    fn looping_model() -> MockLanguageModel {
        let counter = Arc::new(AtomicUsize::new(0));
        MockLanguageModel::new(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse::tool_calls(vec![ToolCall::new(
                format!("call_{n}"),
                "lookup",
                json!({}),
            )])
            .with_usage(10, 5))
        })
    }

    #[tokio::test]
    async fn test_stops_when_model_answers_without_tools() {
        let counter = Arc::new(AtomicUsize::new(0));
        let model = MockLanguageModel::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(CompletionResponse::tool_calls(vec![ToolCall::new("c1", "lookup", json!({}))]).with_usage(10, 5))
            } else {
                Ok(CompletionResponse::text("done").with_usage(20, 8))
            }
        });

        let mut seen = Vec::new();
        let output = generate(&model, &Tools, request(vec![]), &CancellationToken::new(), |step| {
            seen.push(step.index)
        })
        .await
        .unwrap();

        assert_eq!(output.text, "done");
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(output.usage, TokenUsage::new(30, 13));
        let roles: Vec<Role> = output.transcript.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_step_count_caps_the_loop() {
        let model = looping_model();
        let output = generate(
            &model,
            &Tools,
            request(vec![StopCondition::StepCount(3)]),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(output.steps.len(), 3);
        assert_eq!(model.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_tool_called_stops_after_that_step() {
        let model = MockLanguageModel::new(|_| {
            Ok(CompletionResponse::tool_calls(vec![
                ToolCall::new("a", "lookup", json!({})),
                ToolCall::new("b", "finish", json!({})),
            ]))
        });
        let output = generate(
            &model,
            &Tools,
            request(vec![StopCondition::ToolCalled("finish"), StopCondition::StepCount(10)]),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(output.steps.len(), 1);
        let results: Vec<&str> = output.steps[0].tool_results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(results, vec!["a", "b"]);
    }

    #[derive(Default)]
    struct BatchLog {
        log: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolHandler for BatchLog {
        fn definitions(&self) -> Vec<ToolDefinition> {
            Tools.definitions()
        }

        async fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
            self.log.lock().unwrap().push(format!("invoke {}", call.id));
            Ok("ok".to_string())
        }

        fn batch_started(&self, step: usize, calls: &[ToolCall]) {
            self.log.lock().unwrap().push(format!("start {step} with {}", calls.len()));
        }

        fn batch_finished(&self, step: usize) {
            self.log.lock().unwrap().push(format!("finish {step}"));
        }
    }

    #[tokio::test]
    async fn test_batch_hooks_bracket_tool_calls() {
        let model = MockLanguageModel::new(|_| {
            Ok(CompletionResponse::tool_calls(vec![
                ToolCall::new("a", "lookup", json!({})),
                ToolCall::new("b", "lookup", json!({})),
            ]))
        });
        let tools = BatchLog::default();
        generate(&model, &tools, request(vec![StopCondition::StepCount(1)]), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(
            tools.log.lock().unwrap().clone(),
            vec!["start 1 with 2", "invoke a", "invoke b", "finish 1"]
        );
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_tool_result() {
        let counter = Arc::new(AtomicUsize::new(0));
        let model = MockLanguageModel::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(CompletionResponse::tool_calls(vec![ToolCall::new("x", "broken", json!({}))]))
            } else {
                Ok(CompletionResponse::text("recovered"))
            }
        });
        let output = generate(&model, &Tools, request(vec![]), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        let failed = &output.steps[0].tool_results[0];
        assert!(failed.is_error);
        assert!(failed.output.starts_with("Error:"));
        assert_eq!(output.text, "recovered");
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let model = MockLanguageModel::new(|_| Err(crate::error::LlmError::Other("down".to_string())));
        let err = generate(&model, &Tools, request(vec![]), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Llm(_)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let model = looping_model().with_latency(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = generate(&model, &Tools, request(vec![]), &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
