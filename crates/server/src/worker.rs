//! In-process dispatch loop for deployments without an external trigger.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};
use tubewatch_queue::{DispatchRequest, Dispatcher};

/// Run one dispatch per `period` until the runtime shuts down.
pub fn spawn(dispatcher: Dispatcher, period: Duration, max_jobs: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            worker_id = dispatcher.worker_id(),
            period_secs = period.as_secs(),
            max_jobs,
            "Worker loop started"
        );

        loop {
            ticker.tick().await;

            let request = DispatchRequest {
                max_jobs: Some(max_jobs),
                ..DispatchRequest::default()
            };
            match dispatcher.dispatch(request).await {
                Ok(report) if report.jobs_processed > 0 => {
                    let failed = report.results.iter().filter(|r| !r.success).count();
                    info!(
                        jobs_processed = report.jobs_processed,
                        failed,
                        execution_time_ms = report.execution_time_ms,
                        "Dispatch finished"
                    );
                }
                Ok(_) => debug!("No jobs ready"),
                Err(e) => error!(error = %e, "Dispatch failed"),
            }
        }
    })
}
