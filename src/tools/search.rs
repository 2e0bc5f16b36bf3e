//! Web search: the provider seam, the failure-isolating search step, the
//! progress-reporting single-query wrapper, and the `web_search` tool that
//! researchers call.

use super::Tool;
use crate::config::{SearchConfig, SearchDepth};
use crate::cost::CostAccumulator;
use crate::error::{SearchProviderError, ToolError};
use crate::llm::ToolDefinition;
use crate::models::SearchResult;
use crate::progress::{EventKind, InFlight, ProgressSink};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::warn;

pub const WEB_SEARCH: &str = "web_search";
pub const MAX_QUERIES_PER_CALL: usize = 3;
const MAX_CONTENT_CHARS: usize = 4000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub depth: SearchDepth,
    pub include_raw_content: bool,
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            depth: config.search_depth,
            include_raw_content: config.include_raw_content,
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// False when credentials are missing; no network call will be attempted.
    fn is_configured(&self) -> bool;

    /// Flat fee charged per successful query.
    fn cost_per_query_cents(&self) -> i64 {
        0
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchProviderError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    fn failed(error: String) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs one query. Provider failures, including panics, come back as an
/// outcome with an error string; this never fails outward.
pub async fn search_step(
    provider: &dyn SearchProvider,
    query: &str,
    max_results: usize,
    options: &SearchOptions,
) -> SearchOutcome {
    if !provider.is_configured() {
        warn!(query, provider = provider.name(), "search provider not configured");
        return SearchOutcome::failed(format!("{} not configured", provider.name()));
    }

    match AssertUnwindSafe(provider.search(query, max_results, options))
        .catch_unwind()
        .await
    {
        Ok(Ok(results)) => SearchOutcome {
            results,
            error: None,
        },
        Ok(Err(err)) => {
            warn!(query, provider = provider.name(), status = ?err.status(), error = %err, "search failed");
            SearchOutcome::failed(err.to_string())
        }
        Err(_) => {
            warn!(query, provider = provider.name(), "search provider panicked");
            SearchOutcome::failed(format!("{} search failed unexpectedly", provider.name()))
        }
    }
}

/// What a search needs besides the query itself.
#[derive(Clone)]
pub struct SearchContext {
    pub provider: Arc<dyn SearchProvider>,
    pub options: SearchOptions,
    pub max_results: usize,
    pub progress: Arc<dyn ProgressSink>,
    pub costs: Arc<CostAccumulator>,
}

/// Wraps [`search_step`] in a `running` / `completed` web event pair.
///
/// The pair gets its own correlation id, so several queries issued by the
/// same tool call never collide. Errors are returned, not raised.
pub async fn single_query_search(ctx: &SearchContext, tool_call_id: &str, query: &str) -> SearchOutcome {
    let pending = InFlight::start(
        &ctx.progress,
        tool_call_id,
        EventKind::Web,
        "Searching the web",
        query,
        Some(vec![query.to_string()]),
    );

    let outcome = search_step(ctx.provider.as_ref(), query, ctx.max_results, &ctx.options).await;

    match &outcome.error {
        None => {
            ctx.costs
                .add_api_cost(ctx.provider.name(), ctx.provider.cost_per_query_cents());
            pending.complete(
                "Search complete",
                format!("{} results for {query}", outcome.results.len()),
                Some(outcome.results.clone()),
            );
        }
        Some(error) => pending.complete("Search failed", error.clone(), None),
    }
    outcome
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    query: Option<String>,
}

/// The researcher's search tool: up to three queries per call, run together.
pub struct WebSearchTool {
    ctx: SearchContext,
}

impl WebSearchTool {
    pub fn new(ctx: SearchContext) -> Self {
        Self { ctx }
    }

    fn parse_queries(arguments: Value) -> Result<Vec<String>, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            name: WEB_SEARCH.to_string(),
            reason,
        };
        let args: WebSearchArgs =
            serde_json::from_value(arguments).map_err(|e| invalid(e.to_string()))?;

        let queries: Vec<String> = args
            .queries
            .into_iter()
            .chain(args.query)
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        if queries.is_empty() {
            return Err(invalid("at least one query is required".to_string()));
        }
        if queries.len() > MAX_QUERIES_PER_CALL {
            return Err(invalid(format!(
                "at most {MAX_QUERIES_PER_CALL} queries per call, got {}",
                queries.len()
            )));
        }
        Ok(queries)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: WEB_SEARCH.to_string(),
            description: "Search the web. Pass one to three focused queries; each returns titles, URLs and page content.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "queries": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "maxItems": MAX_QUERIES_PER_CALL,
                        "description": "Search queries to run"
                    }
                },
                "required": ["queries"]
            }),
        }
    }

    async fn call(&self, call_id: &str, arguments: Value) -> Result<String, ToolError> {
        let queries = Self::parse_queries(arguments)?;
        let outcomes = join_all(
            queries
                .iter()
                .map(|query| single_query_search(&self.ctx, call_id, query)),
        )
        .await;

        Ok(queries
            .iter()
            .zip(&outcomes)
            .map(|(query, outcome)| format_outcome(query, outcome))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

fn format_outcome(query: &str, outcome: &SearchOutcome) -> String {
    if let Some(error) = &outcome.error {
        return format!("Query: {query}\nSearch failed: {error}");
    }
    if outcome.results.is_empty() {
        return format!("Query: {query}\nNo results.");
    }
    let results = outcome
        .results
        .iter()
        .map(|r| {
            let content: String = r.content.chars().take(MAX_CONTENT_CHARS).collect();
            format!("Title: {}\nURL: {}\nContent: {}\n", r.title, r.url, content)
        })
        .collect::<Vec<_>>()
        .join("\n---\n");
    format!("Query: {query}\n{results}")
}
