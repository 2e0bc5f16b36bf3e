//! End-to-end research run: brief, supervised research, report.

use crate::error::ResearchError;
use crate::models::ResearchOutcome;
use crate::session::ResearchSession;
use crate::tasks::{write_final_report, write_research_brief, SupervisorAgent, TopicResearcher};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub const NO_FINDINGS_REPORT: &str = "No findings were gathered for this request, so no report was written.";
pub const CANCELLED_REPORT: &str = "Research was cancelled before the report was written.";

pub struct DeepResearch {
    session: ResearchSession,
    researcher: Option<Arc<dyn TopicResearcher>>,
}

impl DeepResearch {
    pub fn new(session: ResearchSession) -> Self {
        Self {
            session,
            researcher: None,
        }
    }

    /// Replaces the researcher the supervisor delegates topics to.
    pub fn with_researcher(mut self, researcher: Arc<dyn TopicResearcher>) -> Self {
        self.researcher = Some(researcher);
        self
    }

    pub fn session(&self) -> &ResearchSession {
        &self.session
    }

    #[instrument(skip(self))]
    pub async fn run(&self, query: &str) -> Result<ResearchOutcome, ResearchError> {
        let start_time = Instant::now();
        let session = &self.session;

        let brief = write_research_brief(session, query).await?;

        let supervisor = match &self.researcher {
            Some(researcher) => SupervisorAgent::with_researcher(session.clone(), Arc::clone(researcher)),
            None => SupervisorAgent::new(session.clone()),
        };
        let findings = supervisor.run(&brief).await?;

        let report = if findings.is_empty() {
            warn!("supervisor returned no findings, skipping report");
            NO_FINDINGS_REPORT.to_string()
        } else if session.cancel.is_cancelled() {
            warn!(findings = findings.len(), "cancelled with partial findings, skipping report");
            CANCELLED_REPORT.to_string()
        } else {
            write_final_report(session, &brief, &findings).await?
        };

        let total_time_ms = start_time.elapsed().as_millis() as u64;
        let outcome = ResearchOutcome {
            brief,
            findings,
            report,
            total_cost_cents: session.costs.total_cost_cents(),
            cost_entries: session.costs.entries(),
            total_time_ms,
        };
        info!(
            findings = outcome.findings.len(),
            cost_cents = outcome.total_cost_cents,
            total_time_ms,
            "research run finished"
        );
        Ok(outcome)
    }
}
