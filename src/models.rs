use crate::config::SessionOverrides;
use crate::cost::CostEntry;
use crate::progress::ProgressEvent;
use serde::{Deserialize, Serialize};

/// What to investigate. Immutable once dispatched.
pub type ResearchBrief = String;

/// Output of one researcher run, handed back to the supervisor.
pub type CompressedBrief = String;

/// A normalized search hit, independent of the provider that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub source: String,
    pub title: String,
    pub url: String,
    pub content: String,
}

impl SearchResult {
    pub fn web(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source: "web".to_string(),
            title: title.into(),
            url: url.into(),
            content: content.into(),
        }
    }
}

/// Final product of a full pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub brief: ResearchBrief,
    pub findings: Vec<CompressedBrief>,
    pub report: String,
    pub total_cost_cents: u64,
    pub cost_entries: Vec<CostEntry>,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub config: Option<SessionOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResearchResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub query: String,
    pub status: SessionStatus,
    pub events: Vec<ProgressEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResearchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilySearchRequest {
    pub query: String,
    pub max_results: usize,
    pub search_depth: String,
    pub include_raw_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilySearchResponse {
    pub results: Vec<TavilyResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilyResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaSearchRequest {
    pub query: String,
    pub num_results: usize,
    #[serde(rename = "type")]
    pub search_type: String,
    pub contents: ExaContents,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaContents {
    pub text: ExaTextConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaTextConfig {
    pub max_characters: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExaSearchResponse {
    pub results: Vec<ExaResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExaResult {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub text: Option<String>,
}
