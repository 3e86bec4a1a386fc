//! Background match update worker
//!
//! Update requests triggered at sign-in are fire-and-forget from the
//! caller's perspective: they go through a bounded queue to a worker task.
//! Worker failures are logged and never surfaced to the sign-in caller.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::index::FaceIndex;
use crate::storage::MatchStorage;

use super::match_service::MatchService;
use super::types::MatchEvent;

/// A queued match update request
#[derive(Debug, Clone)]
pub struct UpdateJob {
    pub user_id: String,
}

/// Sending half of the update queue
#[derive(Clone)]
pub struct UpdateHandle {
    tx: mpsc::Sender<UpdateJob>,
}

impl UpdateHandle {
    /// Enqueue a job without waiting. Jobs are dropped and logged when the
    /// queue is full or the worker is gone.
    pub fn enqueue(&self, job: UpdateJob) {
        if let Err(e) = self.tx.try_send(job) {
            warn!("Dropping match update job: {}", e);
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(tx: mpsc::Sender<UpdateJob>) -> Self {
        Self { tx }
    }
}

/// Worker task draining the update queue
pub struct UpdateWorker<S: MatchStorage, I: FaceIndex> {
    service: Arc<MatchService<S, I>>,
    rx: mpsc::Receiver<UpdateJob>,
    events: broadcast::Sender<MatchEvent>,
    shutdown: Arc<Notify>,
}

impl<S: MatchStorage, I: FaceIndex> UpdateWorker<S, I> {
    pub fn new(
        service: Arc<MatchService<S, I>>,
        events: broadcast::Sender<MatchEvent>,
        shutdown: Arc<Notify>,
        queue_depth: usize,
    ) -> (UpdateHandle, Self) {
        let (tx, rx) = mpsc::channel(queue_depth);
        (
            UpdateHandle { tx },
            Self {
                service,
                rx,
                events,
                shutdown,
            },
        )
    }

    /// Run until the queue closes or shutdown is signalled
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                job = self.rx.recv() => {
                    match job {
                        Some(job) => self.process(job).await,
                        None => break,
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Match update worker shutting down");
                    break;
                }
            }
        }
    }

    async fn process(&self, job: UpdateJob) {
        debug!("Processing match update for user {}", job.user_id);

        match self.service.update_matches(&job.user_id).await {
            Ok(report) => {
                if report.matches_added > 0 {
                    info!(
                        "Added {} new matches for user {}",
                        report.matches_added, job.user_id
                    );
                    let _ = self.events.send(MatchEvent::UpdateCompleted {
                        user_id: job.user_id.clone(),
                        matches_added: report.matches_added,
                        total_matches: report.total_matches,
                    });
                }
            }
            Err(e) => {
                error!("Error updating matches for user {}: {:#}", job.user_id, e);
            }
        }
    }
}
