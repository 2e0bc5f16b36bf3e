use super::search::{SearchOptions, SearchProvider};
use crate::error::SearchProviderError;
use crate::models::{SearchResult, TavilySearchRequest, TavilySearchResponse};
use async_trait::async_trait;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Tavily search API.
#[derive(Debug, Clone)]
pub struct TavilyProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl TavilyProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: TAVILY_ENDPOINT.to_string(),
        }
    }

    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
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

        let request = TavilySearchRequest {
            query: query.to_string(),
            max_results,
            search_depth: options.depth.as_str().to_string(),
            include_raw_content: options.include_raw_content,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
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

        let search_response: TavilySearchResponse = response
            .json()
            .await
            .map_err(|e| SearchProviderError::Decode(e.to_string()))?;

        Ok(search_response
            .results
            .into_iter()
            .map(|r| {
                let content = match r.raw_content {
                    Some(raw) if options.include_raw_content && !raw.is_empty() => raw,
                    _ => r.content,
                };
                SearchResult::web(r.title, r.url, content)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_key_is_not_configured() {
        assert!(!TavilyProvider::new(Some("  ".to_string())).is_configured());
        assert!(!TavilyProvider::new(None).is_configured());
        assert!(TavilyProvider::new(Some("tvly-123".to_string())).is_configured());
    }

    #[tokio::test]
    async fn test_search_without_key_fails_before_network() {
        let err = TavilyProvider::new(None)
            .search("q", 5, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchProviderError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        let provider = TavilyProvider::new(Some("k".to_string()))
            .with_endpoint("http://127.0.0.1:9/search");
        let err = provider
            .search("q", 5, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchProviderError::Transport(_)));
    }
}
