//! Waiting for a queued job to finish.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::errors::{Result, Step, TripoSrError};
use crate::models::{JobHandle, JobStatus, RunEvent, RunOptions};

/// Races every suspension point of a run against its cancellation token and
/// deadline.
pub(crate) struct RunGuard {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    limit: Duration,
}

impl RunGuard {
    pub(crate) fn new(opts: &RunOptions) -> Self {
        Self {
            cancel: opts.cancel.clone().unwrap_or_else(CancellationToken::new),
            // A deadline past the clock's range means no deadline.
            deadline: opts.timeout.and_then(|t| Instant::now().checked_add(t)),
            limit: opts.timeout.unwrap_or_default(),
        }
    }

    /// Never cancelled, never expires.
    pub(crate) fn unbounded() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            limit: Duration::ZERO,
        }
    }

    /// Drive `fut` to completion unless the run is cancelled or expires
    /// first. `fut` is dropped, not polled, once either fires.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        let expiry = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TripoSrError::Cancelled),
            _ = expiry => Err(TripoSrError::Timeout(self.limit)),
            out = fut => Ok(out),
        }
    }
}

/// Tracks how long the job has sat on one status so odd or stuck tokens get
/// logged for follow-up.
#[derive(Default)]
struct StatusStreak {
    last: Option<JobStatus>,
    count: u32,
}

impl StatusStreak {
    fn observe(&mut self, status: &JobStatus, stale_after: u32) {
        if self.last.as_ref() == Some(status) {
            self.count += 1;
        } else {
            if !status.is_known() {
                warn!(%status, "unrecognized job status, treating as pending");
            }
            self.last = Some(status.clone());
            self.count = 1;
        }

        if stale_after > 0 && self.count == stale_after {
            warn!(%status, polls = self.count, "job status unchanged");
        }
    }
}

/// Sleep, check, repeat until the job reports `COMPLETED`.
pub(crate) struct PollLoop<'a> {
    pub(crate) client: &'a Client,
    pub(crate) opts: &'a RunOptions,
    pub(crate) guard: &'a RunGuard,
}

impl PollLoop<'_> {
    /// Returns the response URL reported alongside the terminal status.
    pub(crate) async fn until_done(&self, handle: &JobHandle) -> Result<String> {
        let mut streak = StatusStreak::default();
        let mut attempt: u32 = 0;

        loop {
            self.guard
                .run(tokio::time::sleep(self.opts.poll_interval))
                .await?;

            attempt += 1;
            let report = self.client.check_status(handle, self.guard).await?;
            debug!(
                request_id = %handle.request_id,
                attempt,
                status = %report.status,
                queue_position = ?report.queue_position,
                "status checked"
            );
            self.opts.emit(RunEvent::StatusChecked {
                attempt,
                status: report.status.clone(),
                queue_position: report.queue_position,
            });

            if report.status.is_completed() {
                return report.response_url.ok_or_else(|| {
                    TripoSrError::malformed(Step::Poll, "COMPLETED status without response_url")
                });
            }

            if self.opts.is_failure(&report.status) {
                return Err(TripoSrError::JobFailed {
                    request_id: handle.request_id.clone(),
                    status: report.status.to_string(),
                });
            }

            streak.observe(&report.status, self.opts.stale_after);

            if let Some(max) = self.opts.max_attempts {
                if attempt >= max {
                    return Err(TripoSrError::PollAttemptsExhausted { attempts: attempt });
                }
            }
        }
    }
}
