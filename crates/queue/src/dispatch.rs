//! Dispatch loop: claim a bounded batch, run each job, acknowledge it.
//!
//! Jobs run one after another. A failing or panicking job is acknowledged as
//! failed and the loop moves on; only a failed claim aborts the invocation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::handlers::{HandlerOutcome, JobRunner};
use crate::jobs::{ClaimedJob, JobType, UnknownJobType};
use crate::store::{JobStore, StoreError};

/// Upper bound on jobs claimed by one invocation.
pub const MAX_JOBS_PER_INVOCATION: u32 = 10;

/// Errors that abort a whole invocation.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to claim jobs: {0}")]
    Claim(#[source] StoreError),

    #[error(transparent)]
    InvalidJobType(#[from] UnknownJobType),
}

/// Parameters of one invocation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub max_jobs: Option<u32>,
    /// Only claim these job types.
    #[serde(default)]
    pub job_types: Option<Vec<String>>,
}

/// Result of one job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub success: bool,
    pub job_id: Uuid,
    pub job_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<u64>,
}

/// Result of one invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// True whenever the claim succeeded, even if jobs failed.
    pub success: bool,
    pub jobs_processed: usize,
    pub results: Vec<JobExecution>,
    pub execution_time_ms: u64,
}

/// Claims jobs from a [`JobStore`] and runs them through a [`JobRunner`].
#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
    worker_id: String,
}

impl Dispatcher {
    /// `worker_id` is used when a request does not name one.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        runner: Arc<dyn JobRunner>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            runner,
            worker_id: worker_id.into(),
        }
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run one invocation.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();

        let job_types = request
            .job_types
            .as_deref()
            .map(|names| {
                names
                    .iter()
                    .map(|name| name.parse::<JobType>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        let limit = request
            .max_jobs
            .unwrap_or(MAX_JOBS_PER_INVOCATION)
            .clamp(1, MAX_JOBS_PER_INVOCATION);
        let worker_id = request
            .worker_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&self.worker_id);

        let claimed = self
            .jobs
            .claim(worker_id, job_types.as_deref(), limit)
            .await
            .map_err(|e| {
                error!(worker_id, error = %e, "Failed to claim jobs");
                DispatchError::Claim(e)
            })?;

        if claimed.is_empty() {
            return Ok(DispatchReport {
                success: true,
                jobs_processed: 0,
                results: Vec::new(),
                execution_time_ms: elapsed_ms(started),
            });
        }
        info!(worker_id, count = claimed.len(), "Claimed jobs");

        let mut results = Vec::with_capacity(claimed.len());
        for job in claimed {
            results.push(self.process(job).await);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            worker_id,
            processed = results.len(),
            failed,
            "Dispatch finished"
        );

        Ok(DispatchReport {
            success: true,
            jobs_processed: results.len(),
            results,
            execution_time_ms: elapsed_ms(started),
        })
    }

    async fn process(&self, job: ClaimedJob) -> JobExecution {
        let started = Instant::now();
        let outcome = self.execute(&job).await;

        if outcome.success {
            match self.jobs.acknowledge_complete(job.job_id).await {
                Ok(true) => {}
                Ok(false) => warn!(job_id = %job.job_id, "Job was no longer running at completion"),
                Err(e) => error!(job_id = %job.job_id, error = %e, "Failed to acknowledge completion"),
            }
        } else {
            let message = outcome.error.as_deref().unwrap_or("Unknown error");
            match self.jobs.acknowledge_failure(job.job_id, message).await {
                Ok(status) => warn!(
                    job_id = %job.job_id,
                    job_type = %job.job_type,
                    attempt = job.attempt_count + 1,
                    status = ?status,
                    error = %message,
                    "Job failed"
                ),
                Err(e) => error!(job_id = %job.job_id, error = %e, "Failed to acknowledge failure"),
            }
        }

        JobExecution {
            success: outcome.success,
            job_id: job.job_id,
            job_type: job.job_type,
            items_processed: outcome.success.then_some(outcome.items_processed),
            error: outcome.error,
            execution_time_ms: elapsed_ms(started),
        }
    }

    async fn execute(&self, job: &ClaimedJob) -> HandlerOutcome {
        let job_type = match job.job_type.parse::<JobType>() {
            Ok(job_type) => job_type,
            Err(e) => return HandlerOutcome::failure(e.to_string()),
        };

        AssertUnwindSafe(self.runner.run(job_type, &job.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                error!(job_id = %job.job_id, job_type = %job_type, "Handler panicked");
                HandlerOutcome::failure(format!("Handler panicked: {}", panic_message(&*panic)))
            })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
