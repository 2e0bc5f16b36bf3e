//! OpenAI-compatible chat completions client.
//!
//! Works against OpenAI itself and any endpoint that follows the same
//! `/chat/completions` request and response shape (vLLM, Ollama, gateways).

use super::{
    CompletionRequest, CompletionResponse, LanguageModel, Message, Role, TokenUsage, ToolCall,
    DEFAULT_CONTEXT_WINDOW,
};
use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct OpenAiCompatibleModel {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleModel {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Builds a client, reading the key from the variable named in `config`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| LlmError::MissingApiKey {
            provider: "OpenAI-compatible endpoint".to_string(),
            env_var: config.api_key_env.clone(),
        })?;
        Self::new(
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = request_body(&request);
        debug!(model = %request.model, messages = request.messages.len(), tools = request.tools.len(), "chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParse(e.to_string()))?;
        parse_completion(parsed)
    }

    fn context_window(&self, model_id: &str) -> usize {
        known_context_window(model_id).unwrap_or(DEFAULT_CONTEXT_WINDOW)
    }
}

fn known_context_window(model_id: &str) -> Option<usize> {
    let id = model_id.to_lowercase();
    let id = id.rsplit('/').next().unwrap_or(&id);
    match id {
        m if m.starts_with("gpt-4.1") => Some(1_047_576),
        m if m.starts_with("gpt-5") => Some(400_000),
        m if m.starts_with("gpt-4o") || m.starts_with("gpt-4-turbo") => Some(128_000),
        m if m.starts_with("gpt-3.5-turbo") => Some(16_385),
        m if m.starts_with("o3") || m.starts_with("o4") => Some(200_000),
        m if m.starts_with("claude") => Some(200_000),
        m if m.starts_with("gemini") => Some(1_048_576),
        _ => None,
    }
}

fn message_json(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.as_deref().unwrap_or_default(),
            "content": message.content,
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": if message.content.is_empty() { Value::Null } else { Value::String(message.content.clone()) },
                "tool_calls": calls,
            })
        }
        role => json!({ "role": role.as_str(), "content": message.content }),
    }
}

fn request_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
        "max_tokens": request.max_output_tokens,
    });
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_completion(completion: ChatCompletion) -> Result<CompletionResponse, LlmError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ResponseParse("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            // Malformed argument JSON is passed through as a string so the
            // tool can report it back to the model.
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            ToolCall::new(call.id, call.function.name, arguments)
        })
        .collect();

    let usage = completion
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(CompletionResponse {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        usage,
    })
}
