//! Sequential, rate-limited execution of many proposals.
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, RelocationFailure};
use crate::policy::BatchLimits;
use crate::relocate::{MoveResult, ProposedMove, Relocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
}

/// Emitted when a submission exceeds the batch cap. Proposals past the cap are dropped unrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationNotice {
    pub submitted: usize,
    pub accepted: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per processed proposal, in submission order.
    pub results: Vec<MoveResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<TruncationNotice>,
    pub cancelled: bool,
    /// Accepted proposals left unrun because of cancellation.
    pub not_processed: usize,
    pub state: BatchState,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    relocator: Arc<Relocator>,
    limits: BatchLimits,
    move_timeout: Duration,
}

impl BatchCoordinator {
    pub fn new(relocator: Arc<Relocator>) -> Self {
        let limits = relocator.policy().batch.clone();
        let move_timeout = relocator.policy().io.timeout();
        Self {
            relocator,
            limits,
            move_timeout,
        }
    }

    pub fn relocator(&self) -> &Arc<Relocator> {
        &self.relocator
    }

    /// Accept up to `max_batch_size` proposals. The rest are dropped and reported.
    pub fn begin(&self, mut proposals: Vec<ProposedMove>) -> Batch {
        let submitted = proposals.len();
        let truncation = (submitted > self.limits.max_batch_size).then(|| {
            proposals.truncate(self.limits.max_batch_size);
            let notice = TruncationNotice {
                submitted,
                accepted: proposals.len(),
                dropped: submitted - proposals.len(),
            };
            warn!(
                submitted,
                accepted = notice.accepted,
                dropped = notice.dropped,
                "batch truncated"
            );
            notice
        });
        Batch {
            coordinator: self.clone(),
            proposals,
            truncation,
            state: BatchState::Idle,
        }
    }

    /// Run every proposal without external cancellation.
    pub async fn move_all(&self, proposals: Vec<ProposedMove>) -> BatchReport {
        self.begin(proposals).run(&CancellationToken::new()).await
    }

    /// Run one proposal on the blocking pool under the per-move timeout.
    ///
    /// A worker that overruns the timeout cannot be aborted; it is awaited before the batch moves
    /// on, so only one pipeline is ever in flight. A late success is reported as a success and
    /// any other overrun as a timeout.
    async fn run_one(&self, proposal: ProposedMove) -> MoveResult {
        let relocator = Arc::clone(&self.relocator);
        let source_path = proposal.source_path.clone();
        let mut task = tokio::task::spawn_blocking(move || relocator.relocate(&proposal));
        let joined = match tokio::time::timeout(self.move_timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    timeout_ms = self.move_timeout.as_millis() as u64,
                    "move timed out; waiting for the worker to settle"
                );
                match task.await {
                    Ok(result) if result.is_success() => {
                        warn!("move completed after its timeout");
                        return result;
                    }
                    Ok(_) => return MoveResult::failed(source_path, &Error::Timeout("move")),
                    Err(join_err) => Err(join_err),
                }
            }
        };
        match joined {
            Ok(result) => result,
            Err(join_err) => {
                warn!(error = %join_err, "move worker did not complete");
                MoveResult::failed(
                    source_path,
                    &Error::Relocation(RelocationFailure::OperationFailed(
                        "move worker did not complete".to_string(),
                    )),
                )
            }
        }
    }
}

/// An accepted batch, not yet run.
#[derive(Debug)]
pub struct Batch {
    coordinator: BatchCoordinator,
    proposals: Vec<ProposedMove>,
    truncation: Option<TruncationNotice>,
    state: BatchState,
}

impl Batch {
    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn truncation(&self) -> Option<TruncationNotice> {
        self.truncation
    }

    /// Process proposals strictly one after another, pausing `operation_delay` between moves.
    ///
    /// `cancel` is observed between proposals and during the pause, never mid-move.
    pub async fn run(mut self, cancel: &CancellationToken) -> BatchReport {
        self.state = BatchState::Running;
        let delay = self.coordinator.limits.operation_delay();
        let total = self.proposals.len();
        info!(total, delay_ms = delay.as_millis() as u64, "batch started");

        let mut results = Vec::with_capacity(total);
        let mut cancelled = false;
        for (index, proposal) in std::mem::take(&mut self.proposals).into_iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            results.push(self.coordinator.run_one(proposal).await);

            if index + 1 < total && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        self.state = BatchState::Completed;
        let report = BatchReport {
            not_processed: total - results.len(),
            results,
            truncation: self.truncation,
            cancelled,
            state: self.state,
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            not_processed = report.not_processed,
            cancelled,
            "batch finished"
        );
        report
    }
}
