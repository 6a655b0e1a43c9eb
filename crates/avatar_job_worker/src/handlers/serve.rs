//! Worker loop: take jobs from a [`JobQueue`], run them, report results.

use std::time::Duration;

use serde_json::Value;

use crate::adapters::job_queue::{JobPoll, JobQueue};
use crate::context::WorkerContext;
use crate::handlers::job::handle_job_event;

/// Job id used when an envelope carries none, as for a local test input.
pub const LOCAL_JOB_ID: &str = "local_test";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeOptions {
    /// Pause after an empty or failed poll.
    pub idle_delay: Duration,
    /// Stop after this many jobs. `None` serves until the queue closes.
    pub max_jobs: Option<usize>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_secs(1),
            max_jobs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl ServeSummary {
    pub fn handled(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs jobs one at a time until the queue closes or `max_jobs` is reached.
/// Poll and report failures are logged and never stop the loop.
pub fn serve_jobs(queue: &dyn JobQueue, ctx: &WorkerContext, options: ServeOptions) -> ServeSummary {
    let mut summary = ServeSummary::default();

    loop {
        if options
            .max_jobs
            .is_some_and(|max_jobs| summary.handled() >= max_jobs)
        {
            break;
        }

        let event = match queue.next_job() {
            Ok(JobPoll::Job(event)) => event,
            Ok(JobPoll::Idle) => {
                std::thread::sleep(options.idle_delay);
                continue;
            }
            Ok(JobPoll::Closed) => break,
            Err(error) => {
                tracing::warn!(%error, "failed to fetch next job");
                std::thread::sleep(options.idle_delay);
                continue;
            }
        };

        let job_id = envelope_job_id(&event);
        let result = handle_job_event(event, &job_id, ctx);
        if result.is_success() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }

        if let Err(error) = queue.complete(&job_id, &result) {
            tracing::error!(job_id = %job_id, %error, "failed to report job result");
        }
    }

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "job queue closed"
    );
    summary
}

fn envelope_job_id(event: &Value) -> String {
    event
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(LOCAL_JOB_ID)
        .to_string()
}
