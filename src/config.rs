//! Layered configuration.
//!
//! Values are resolved as: built-in defaults, then an optional TOML file
//! (`deep-research.toml`, or the path in `DEEP_RESEARCH_CONFIG`), then
//! environment variables prefixed `DEEP_RESEARCH_` using `__` for nesting,
//! e.g. `DEEP_RESEARCH_SESSION__MAX_RESEARCHER_ITERATIONS=3`.

use crate::error::ResearchError;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "deep-research.toml";
pub const CONFIG_PATH_ENV: &str = "DEEP_RESEARCH_CONFIG";
pub const ENV_PREFIX: &str = "DEEP_RESEARCH_";
/// Upper bound accepted for `max_researcher_iterations`.
pub const MAX_RESEARCHER_ITERATIONS: usize = 100;

/// Immutable settings for one supervised research session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSessionConfig {
    pub research_model_id: String,
    pub compression_model_id: String,
    /// Supervisor tool-use steps before a forced stop. One extra step is
    /// always reserved for the completion signal.
    pub max_researcher_iterations: usize,
    /// Advisory hint for the supervisor; researcher runs stay serialized.
    pub max_concurrent_research_units: usize,
    pub research_model_max_tokens: u32,
    pub compression_model_max_tokens: u32,
    pub mcp_prompt_fragment: Option<String>,
    /// Upper bound on a single researcher's tool loop.
    pub researcher_max_steps: usize,
    pub search_max_results: usize,
}

impl Default for AgentSessionConfig {
    fn default() -> Self {
        Self {
            research_model_id: "gpt-4o-mini".to_string(),
            compression_model_id: "gpt-4o-mini".to_string(),
            max_researcher_iterations: 6,
            max_concurrent_research_units: 3,
            research_model_max_tokens: 4096,
            compression_model_max_tokens: 8192,
            mcp_prompt_fragment: None,
            researcher_max_steps: 12,
            search_max_results: 5,
        }
    }
}

impl AgentSessionConfig {
    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.max_researcher_iterations > MAX_RESEARCHER_ITERATIONS {
            return Err(ResearchError::Config(format!(
                "max_researcher_iterations must be at most {MAX_RESEARCHER_ITERATIONS}"
            )));
        }
        if self.max_concurrent_research_units == 0 {
            return Err(ResearchError::Config(
                "max_concurrent_research_units must be at least 1".to_string(),
            ));
        }
        if self.researcher_max_steps == 0 {
            return Err(ResearchError::Config(
                "researcher_max_steps must be at least 1".to_string(),
            ));
        }
        if self.research_model_id.trim().is_empty() || self.compression_model_id.trim().is_empty()
        {
            return Err(ResearchError::Config("model ids must not be empty".to_string()));
        }
        Ok(())
    }

    /// Total supervisor steps allowed, including the reserved completion step.
    pub fn supervisor_step_cap(&self) -> usize {
        self.max_researcher_iterations.saturating_add(1)
    }
}

/// Per-request overrides accepted by the HTTP API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub research_model_id: Option<String>,
    pub compression_model_id: Option<String>,
    pub max_researcher_iterations: Option<usize>,
    pub max_concurrent_research_units: Option<usize>,
    pub research_model_max_tokens: Option<u32>,
    pub compression_model_max_tokens: Option<u32>,
    pub mcp_prompt_fragment: Option<String>,
}

impl SessionOverrides {
    pub fn apply(&self, base: &AgentSessionConfig) -> AgentSessionConfig {
        let mut config = base.clone();
        if let Some(model) = &self.research_model_id {
            config.research_model_id = model.clone();
        }
        if let Some(model) = &self.compression_model_id {
            config.compression_model_id = model.clone();
        }
        if let Some(n) = self.max_researcher_iterations {
            config.max_researcher_iterations = n;
        }
        if let Some(n) = self.max_concurrent_research_units {
            config.max_concurrent_research_units = n;
        }
        if let Some(n) = self.research_model_max_tokens {
            config.research_model_max_tokens = n;
        }
        if let Some(n) = self.compression_model_max_tokens {
            config.compression_model_max_tokens = n;
        }
        if let Some(fragment) = &self.mcp_prompt_fragment {
            config.mcp_prompt_fragment = Some(fragment.clone());
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// How long a finished session stays readable before it is evicted.
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            session_ttl_secs: 3600,
        }
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProviderKind {
    #[default]
    Tavily,
    Exa,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub provider: SearchProviderKind,
    /// Overrides the provider's default key variable (`TAVILY_API_KEY`, `EXA_API_KEY`).
    pub api_key_env: Option<String>,
    pub search_depth: SearchDepth,
    pub include_raw_content: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: SearchProviderKind::Tavily,
            api_key_env: None,
            search_depth: SearchDepth::Advanced,
            include_raw_content: false,
        }
    }
}

impl SearchConfig {
    pub fn key_env(&self) -> &str {
        match (&self.api_key_env, self.provider) {
            (Some(var), _) => var,
            (None, SearchProviderKind::Tavily) => "TAVILY_API_KEY",
            (None, SearchProviderKind::Exa) => "EXA_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub session: AgentSessionConfig,
}

impl AppConfig {
    /// Load using the default file location (or `DEEP_RESEARCH_CONFIG`).
    pub fn load() -> Result<Self, ResearchError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(Some(&path))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, ResearchError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ResearchError::Config(e.to_string()))?;
        config.session.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_session_defaults_are_valid() {
        let config = AgentSessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.supervisor_step_cap(), 7);
    }

    #[test]
    fn test_zero_concurrency_hint_is_rejected() {
        let config = AgentSessionConfig {
            max_concurrent_research_units: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ResearchError::Config(_))));
    }

    #[test]
    fn test_step_cap_with_zero_iterations() {
        let config = AgentSessionConfig {
            max_researcher_iterations: 0,
            ..Default::default()
        };
        assert_eq!(config.supervisor_step_cap(), 1);
    }

    #[test]
    fn test_huge_iteration_override_is_rejected() {
        let merged = SessionOverrides {
            max_researcher_iterations: Some(usize::MAX),
            ..Default::default()
        }
        .apply(&AgentSessionConfig::default());

        assert!(matches!(merged.validate(), Err(ResearchError::Config(_))));
        assert_eq!(merged.supervisor_step_cap(), usize::MAX);

        let at_limit = AgentSessionConfig {
            max_researcher_iterations: MAX_RESEARCHER_ITERATIONS,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_overrides_only_touch_given_fields() {
        let base = AgentSessionConfig::default();
        let overrides = SessionOverrides {
            max_researcher_iterations: Some(2),
            mcp_prompt_fragment: Some("Use the wiki connector.".to_string()),
            ..Default::default()
        };
        let merged = overrides.apply(&base);
        assert_eq!(merged.max_researcher_iterations, 2);
        assert_eq!(
            merged.mcp_prompt_fragment.as_deref(),
            Some("Use the wiki connector.")
        );
        assert_eq!(merged.research_model_id, base.research_model_id);
    }

    #[test]
    fn test_search_key_env_defaults_per_provider() {
        let mut search = SearchConfig::default();
        assert_eq!(search.key_env(), "TAVILY_API_KEY");
        search.provider = SearchProviderKind::Exa;
        assert_eq!(search.key_env(), "EXA_API_KEY");
        search.api_key_env = Some("MY_KEY".to_string());
        assert_eq!(search.key_env(), "MY_KEY");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind = "127.0.0.1:8080"
session_ttl_secs = 600

[search]
provider = "exa"
search_depth = "basic"

[session]
research_model_id = "gpt-4.1-mini"
max_researcher_iterations = 2
"#
        )
        .unwrap();

        let config = AppConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.session_ttl_secs, 600);
        assert_eq!(config.search.provider, SearchProviderKind::Exa);
        assert_eq!(config.search.search_depth, SearchDepth::Basic);
        assert_eq!(config.session.research_model_id, "gpt-4.1-mini");
        assert_eq!(config.session.max_researcher_iterations, 2);
        assert_eq!(config.session.compression_model_id, "gpt-4o-mini");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            AppConfig::load_from(Some(Path::new("/nonexistent/deep-research.toml"))).unwrap();
        assert_eq!(config.llm, LlmConfig::default());
    }
}
