//! HTTP surface: start, observe and cancel research sessions.

use crate::config::{AppConfig, SearchConfig, SearchProviderKind};
use crate::cost::{CostAccumulator, PricingLookup, StaticPricing};
use crate::error::ResearchError;
use crate::llm::LanguageModel;
use crate::models::{
    ResearchOutcome, ResearchRequest, SessionStatus, SessionView, StartResearchResponse,
};
use crate::pipeline::DeepResearch;
use crate::progress::MemorySink;
use crate::session::ResearchSession;
use crate::tools::{ExaProvider, SearchOptions, SearchProvider, TavilyProvider};
use crate::truncate::{CharEstimateCounter, TokenCounter};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

#[derive(Debug)]
struct RunState {
    status: SessionStatus,
    outcome: Option<ResearchOutcome>,
    error: Option<String>,
    finished_at: Option<Instant>,
}

/// One research run tracked by the server.
pub struct SessionEntry {
    query: String,
    cancel: CancellationToken,
    events: Arc<MemorySink>,
    state: Mutex<RunState>,
}

impl SessionEntry {
    fn new(query: String) -> Self {
        Self {
            query,
            cancel: CancellationToken::new(),
            events: Arc::new(MemorySink::new()),
            state: Mutex::new(RunState {
                status: SessionStatus::Running,
                outcome: None,
                error: None,
                finished_at: None,
            }),
        }
    }

    fn finish(&self, result: Result<ResearchOutcome, ResearchError>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.finished_at = Some(Instant::now());
        match result {
            Ok(outcome) => {
                state.status = if self.cancel.is_cancelled() {
                    SessionStatus::Cancelled
                } else {
                    SessionStatus::Completed
                };
                state.outcome = Some(outcome);
            }
            Err(ResearchError::Cancelled) => state.status = SessionStatus::Cancelled,
            Err(err) => {
                state.status = SessionStatus::Failed;
                state.error = Some(err.to_string());
            }
        }
    }

    /// Finished more than `ttl` ago. Running sessions never expire.
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .finished_at
            .is_some_and(|at| now.saturating_duration_since(at) > ttl)
    }

    fn view(&self, session_id: &str) -> SessionView {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        SessionView {
            session_id: session_id.to_string(),
            query: self.query.clone(),
            status: state.status,
            events: self.events.snapshot(),
            outcome: state.outcome.clone(),
            error: state.error.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
    pricing: Arc<dyn PricingLookup>,
    token_counter: Arc<dyn TokenCounter>,
    sessions: Arc<DashMap<String, Arc<SessionEntry>>>,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(config: AppConfig, model: Arc<dyn LanguageModel>, search: Arc<dyn SearchProvider>) -> Self {
        let session_ttl = Duration::from_secs(config.server.session_ttl_secs);
        Self {
            config: Arc::new(config),
            model,
            search,
            pricing: Arc::new(StaticPricing),
            token_counter: Arc::new(CharEstimateCounter),
            sessions: Arc::new(DashMap::new()),
            session_ttl,
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingLookup>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = counter;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Drops sessions that finished longer than the TTL ago.
    fn evict_expired(&self) {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| !entry.is_expired(now, self.session_ttl));
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "evicted finished sessions");
        }
    }
}

/// Picks the configured search backend. A missing key yields an
/// unconfigured provider rather than an error; research then relies on
/// connector tools alone.
pub fn build_search_provider(config: &SearchConfig) -> Arc<dyn SearchProvider> {
    match config.provider {
        SearchProviderKind::Tavily => Arc::new(TavilyProvider::from_env(config.key_env())),
        SearchProviderKind::Exa => Arc::new(ExaProvider::from_env(config.key_env())),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/research", post(start_research))
        .route("/research/:id", get(get_research).delete(cancel_research))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[instrument(skip(state, req), fields(query_len = req.query.len()))]
async fn start_research(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<(StatusCode, Json<StartResearchResponse>), (StatusCode, String)> {
    state.evict_expired();
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query must not be empty".to_string()));
    }

    let config = match &req.config {
        Some(overrides) => overrides.apply(&state.config.session),
        None => state.config.session.clone(),
    };
    config
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let session_id = Uuid::new_v4().to_string();
    let entry = Arc::new(SessionEntry::new(query.clone()));
    state.sessions.insert(session_id.clone(), Arc::clone(&entry));

    let session = ResearchSession::new(config, Arc::clone(&state.model))
        .with_search(Arc::clone(&state.search), SearchOptions::from(&state.config.search))
        .with_costs(Arc::new(CostAccumulator::new(Arc::clone(&state.pricing))))
        .with_progress(entry.events.clone())
        .with_token_counter(Arc::clone(&state.token_counter))
        .with_cancellation(entry.cancel.clone());

    info!(%session_id, "starting research session");
    let id = session_id.clone();
    tokio::spawn(async move {
        let result = DeepResearch::new(session).run(&query).await;
        if let Err(err) = &result {
            if !err.is_cancelled() {
                error!(session_id = %id, error = %err, "research session failed");
            }
        }
        entry.finish(result);
    });

    Ok((StatusCode::ACCEPTED, Json(StartResearchResponse { session_id })))
}

#[instrument(skip(state))]
async fn get_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, StatusCode> {
    state.evict_expired();
    let entry = state
        .sessions
        .get(&id)
        .map(|e| Arc::clone(e.value()))
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(entry.view(&id)))
}

#[instrument(skip(state))]
async fn cancel_research(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.evict_expired();
    match state.sessions.get(&id) {
        Some(entry) => {
            entry.cancel.cancel();
            info!("research session cancelled");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_provider_follows_config() {
        let config = SearchConfig {
            provider: SearchProviderKind::Exa,
            api_key_env: Some("DEEP_RESEARCH_TEST_UNSET_KEY".to_string()),
            ..Default::default()
        };
        let provider = build_search_provider(&config);
        assert_eq!(provider.name(), "exa");
        assert!(!provider.is_configured());
    }

    #[test]
    fn test_finish_marks_failures() {
        let entry = SessionEntry::new("q".to_string());
        entry.finish(Err(ResearchError::NoToolsAvailable));
        let view = entry.view("id");
        assert_eq!(view.status, SessionStatus::Failed);
        assert!(view.error.unwrap().contains("no tools available"));

        let cancelled = SessionEntry::new("q".to_string());
        cancelled.finish(Err(ResearchError::Cancelled));
        assert_eq!(cancelled.view("id").status, SessionStatus::Cancelled);
    }

    #[test]
    fn test_only_finished_sessions_expire() {
        let entry = SessionEntry::new("q".to_string());
        let later = Instant::now() + Duration::from_secs(60);
        assert!(!entry.is_expired(later, Duration::ZERO));

        entry.finish(Err(ResearchError::Cancelled));
        assert!(!entry.is_expired(Instant::now(), Duration::from_secs(30)));
        assert!(entry.is_expired(later, Duration::from_secs(30)));
    }
}
