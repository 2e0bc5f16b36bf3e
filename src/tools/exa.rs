use super::search::{SearchOptions, SearchProvider};
use crate::config::SearchDepth;
use crate::error::SearchProviderError;
use crate::models::{ExaContents, ExaSearchRequest, ExaSearchResponse, ExaTextConfig, SearchResult};
use async_trait::async_trait;

const EXA_ENDPOINT: &str = "https://api.exa.ai/search";

/// Exa neural search API.
#[derive(Debug, Clone)]
pub struct ExaProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl ExaProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: EXA_ENDPOINT.to_string(),
        }
    }

    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request(query: &str, max_results: usize, options: &SearchOptions) -> ExaSearchRequest {
        let max_characters = match (options.depth, options.include_raw_content) {
            (_, true) => 8000,
            (SearchDepth::Advanced, false) => 4000,
            (SearchDepth::Basic, false) => 2000,
        };
        ExaSearchRequest {
            query: query.to_string(),
            num_results: max_results.clamp(1, 10),
            search_type: "auto".to_string(),
            contents: ExaContents {
                text: ExaTextConfig { max_characters },
            },
        }
    }
}

#[async_trait]
impl SearchProvider for ExaProvider {
    fn name(&self) -> &str {
        "exa"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn cost_per_query_cents(&self) -> i64 {
        1
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SearchProviderError::NotConfigured {
                provider: self.name().to_string(),
            })?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .json(&Self::request(query, max_results, options))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: ExaSearchResponse = response
            .json()
            .await
            .map_err(|e| SearchProviderError::Decode(e.to_string()))?;

        Ok(data
            .results
            .into_iter()
            .map(|r| {
                let title = r.title.unwrap_or_else(|| r.url.clone());
                SearchResult::web(title, r.url, r.text.unwrap_or_default())
            })
            .collect())
    }
}
