//! Per-session serial executor for researcher runs.
//!
//! Every enqueued topic becomes a work item on one channel drained by a
//! single task, so researcher runs of a session never overlap no matter how
//! many topics are requested at once. Each caller gets its own ticket, and a
//! failed topic does not affect the ones queued after it. Successful briefs
//! are also kept in enqueue order, so they survive callers that stopped
//! waiting on their ticket.

use crate::error::ResearchError;
use crate::models::CompressedBrief;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Something that can research one topic.
#[async_trait]
pub trait TopicResearcher: Send + Sync {
    async fn research(&self, topic: &str, tool_call_id: &str) -> Result<CompressedBrief, ResearchError>;
}

type Reply = oneshot::Sender<Result<CompressedBrief, ResearchError>>;

struct QueuedTopic {
    slot: usize,
    topic: String,
    tool_call_id: String,
    reply: Reply,
}

/// Resolves when the queued topic's turn has finished.
pub struct ResearchTicket {
    receiver: oneshot::Receiver<Result<CompressedBrief, ResearchError>>,
}

impl ResearchTicket {
    pub async fn wait(self) -> Result<CompressedBrief, ResearchError> {
        self.receiver.await.unwrap_or(Err(ResearchError::QueueClosed))
    }
}

type Resolved = Arc<Mutex<Vec<Option<CompressedBrief>>>>;

pub struct ResearchQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedTopic>>>,
    drainer: Mutex<Option<JoinHandle<()>>>,
    resolved: Resolved,
}

impl ResearchQueue {
    /// Spawns the drainer. Must be called inside a Tokio runtime.
    pub fn start(researcher: Arc<dyn TopicResearcher>, cancel: CancellationToken) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedTopic>();
        let resolved: Resolved = Arc::new(Mutex::new(Vec::new()));
        let slots = Arc::clone(&resolved);

        let drainer = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if cancel.is_cancelled() {
                    debug!(topic = %job.topic, "skipping queued topic after cancellation");
                    let _ = job.reply.send(Err(ResearchError::Cancelled));
                    continue;
                }

                debug!(topic = %job.topic, tool_call_id = %job.tool_call_id, "running queued topic");
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ResearchError::Cancelled),
                    outcome = researcher.research(&job.topic, &job.tool_call_id) => outcome,
                };
                match &outcome {
                    Ok(brief) => lock(&slots)[job.slot] = Some(brief.clone()),
                    Err(err) => warn!(topic = %job.topic, error = %err, "queued research failed"),
                }
                // The caller may have stopped waiting; that is not our concern.
                let _ = job.reply.send(outcome);
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            drainer: Mutex::new(Some(drainer)),
            resolved,
        }
    }

    /// Appends a topic behind everything already queued.
    pub fn enqueue(&self, topic: impl Into<String>, tool_call_id: impl Into<String>) -> ResearchTicket {
        let (reply, receiver) = oneshot::channel();
        let sender = lock(&self.sender);
        let slot = {
            let mut resolved = lock(&self.resolved);
            resolved.push(None);
            resolved.len() - 1
        };
        let job = QueuedTopic {
            slot,
            topic: topic.into(),
            tool_call_id: tool_call_id.into(),
            reply,
        };

        match sender.as_ref() {
            Some(tx) => {
                if let Err(mpsc::error::SendError(job)) = tx.send(job) {
                    let _ = job.reply.send(Err(ResearchError::QueueClosed));
                }
            }
            None => {
                let _ = job.reply.send(Err(ResearchError::QueueClosed));
            }
        }
        ResearchTicket { receiver }
    }

    /// Stops accepting topics and waits until everything already queued has
    /// been drained.
    pub async fn shutdown(&self) {
        lock(&self.sender).take();
        let drainer = lock(&self.drainer).take();
        if let Some(drainer) = drainer {
            if let Err(err) = drainer.await {
                warn!(error = %err, "research queue drainer ended abnormally");
            }
        }
    }

    /// Briefs that completed successfully so far, in enqueue order.
    pub fn resolved(&self) -> Vec<CompressedBrief> {
        lock(&self.resolved).iter().flatten().cloned().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
