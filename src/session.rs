//! Dependencies shared by every agent in one research request.

use crate::config::AgentSessionConfig;
use crate::cost::CostAccumulator;
use crate::llm::LanguageModel;
use crate::progress::{NullSink, ProgressSink};
use crate::tools::{SearchContext, SearchOptions, SearchProvider, Tool};
use crate::truncate::{CharEstimateCounter, TokenCounter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Explicitly constructed collaborators for one request. Cloning is cheap
/// and every clone shares the same cost ledger, progress sink and
/// cancellation token.
#[derive(Clone)]
pub struct ResearchSession {
    pub config: Arc<AgentSessionConfig>,
    pub model: Arc<dyn LanguageModel>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub search_options: SearchOptions,
    /// Extra researcher tools such as MCP-backed connectors.
    pub connectors: Vec<Arc<dyn Tool>>,
    pub costs: Arc<CostAccumulator>,
    pub progress: Arc<dyn ProgressSink>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub cancel: CancellationToken,
}

impl ResearchSession {
    pub fn new(config: AgentSessionConfig, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            config: Arc::new(config),
            model,
            search: None,
            search_options: SearchOptions::default(),
            connectors: Vec::new(),
            costs: Arc::new(CostAccumulator::default()),
            progress: Arc::new(NullSink),
            token_counter: Arc::new(CharEstimateCounter),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>, options: SearchOptions) -> Self {
        self.search = Some(provider);
        self.search_options = options;
        self
    }

    pub fn with_connector(mut self, tool: Arc<dyn Tool>) -> Self {
        self.connectors.push(tool);
        self
    }

    pub fn with_costs(mut self, costs: Arc<CostAccumulator>) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = counter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Search wiring for the researcher, present only when the provider has
    /// credentials.
    pub fn search_context(&self) -> Option<SearchContext> {
        let provider = self.search.as_ref().filter(|p| p.is_configured())?;
        Some(SearchContext {
            provider: Arc::clone(provider),
            options: self.search_options.clone(),
            max_results: self.config.search_max_results,
            progress: Arc::clone(&self.progress),
            costs: Arc::clone(&self.costs),
        })
    }
}
