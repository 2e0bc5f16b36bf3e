use anyhow::Result;
use deep_research_engine::config::AppConfig;
use deep_research_engine::llm::OpenAiCompatibleModel;
use deep_research_engine::server::{build_router, build_search_provider, AppState};
use deep_research_engine::truncate::{CharEstimateCounter, TiktokenCounter, TokenCounter};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deep_research_engine=debug,tower_http=info")),
        )
        .init();

    let config = AppConfig::load()?;
    let model = Arc::new(OpenAiCompatibleModel::from_config(&config.llm)?);
    let search = build_search_provider(&config.search);
    if !search.is_configured() {
        warn!(provider = search.name(), env_var = config.search.key_env(), "search provider not configured");
    }

    let token_counter: Arc<dyn TokenCounter> = match TiktokenCounter::new() {
        Ok(counter) => Arc::new(counter),
        Err(err) => {
            warn!(error = %err, "falling back to character-based token estimates");
            Arc::new(CharEstimateCounter)
        }
    };

    let bind = config.server.bind.clone();
    let state = AppState::new(config, model, search).with_token_counter(token_counter);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Deep research server running on http://{bind}");

    axum::serve(listener, app).await?;
    Ok(())
}
