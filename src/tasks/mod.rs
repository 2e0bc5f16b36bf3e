mod brief;
mod compressor;
mod queue;
mod reporter;
mod researcher;
mod supervisor;

pub use brief::{write_research_brief, BRIEF_COST_SOURCE};
pub use compressor::{compress_research, COMPRESSION_COST_SOURCE};
pub use queue::{ResearchQueue, ResearchTicket, TopicResearcher};
pub use reporter::{write_final_report, REPORT_COST_SOURCE};
pub use researcher::{ResearcherAgent, RESEARCHER_COST_SOURCE};
pub use supervisor::{
    SupervisorAgent, ToolInvocation, CONDUCT_RESEARCH, RESEARCH_COMPLETE, SUPERVISOR_COST_SOURCE,
};
