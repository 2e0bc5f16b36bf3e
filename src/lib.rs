pub mod config;
pub mod cost;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod session;
pub mod tasks;
pub mod tools;
pub mod truncate;

pub use config::{AgentSessionConfig, AppConfig};
pub use error::ResearchError;
pub use pipeline::DeepResearch;
pub use session::ResearchSession;
