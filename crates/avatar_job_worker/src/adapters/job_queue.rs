use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;

use crate::runtime::contract::GenerationResult;

/// Result of asking the platform for work.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    /// Raw job envelope, `{ "id": ..., "input": ... }`.
    Job(Value),
    /// Nothing queued right now; ask again later.
    Idle,
    /// The source is exhausted and the worker should stop.
    Closed,
}

/// Source of jobs and sink for their results.
pub trait JobQueue: Send + Sync {
    fn next_job(&self) -> Result<JobPoll, String>;

    fn complete(&self, job_id: &str, result: &GenerationResult) -> Result<(), String>;
}

/// Runs a single job read from a local JSON file, then closes. The result is
/// printed to stdout.
#[derive(Debug)]
pub struct LocalJobQueue {
    pending: Mutex<Option<Value>>,
}

impl LocalJobQueue {
    pub fn new(event: Value) -> Self {
        Self {
            pending: Mutex::new(Some(event)),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
        let event = serde_json::from_str(&raw)
            .map_err(|error| format!("failed to parse {}: {error}", path.display()))?;
        Ok(Self::new(event))
    }
}

impl JobQueue for LocalJobQueue {
    fn next_job(&self) -> Result<JobPoll, String> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| "local job queue lock poisoned".to_string())?;
        Ok(pending.take().map_or(JobPoll::Closed, JobPoll::Job))
    }

    fn complete(&self, job_id: &str, result: &GenerationResult) -> Result<(), String> {
        let body = serde_json::to_string_pretty(result)
            .map_err(|error| format!("failed to serialize result for {job_id}: {error}"))?;
        println!("{body}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    #[test]
    fn local_queue_yields_one_job_then_closes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test_input.json");
        fs::write(&path, r#"{"input": {"prompt": "a cat"}}"#).expect("write");

        let queue = LocalJobQueue::from_file(&path).expect("queue loads");

        assert_eq!(
            queue.next_job().expect("poll"),
            JobPoll::Job(json!({"input": {"prompt": "a cat"}}))
        );
        assert_eq!(queue.next_job().expect("poll"), JobPoll::Closed);
    }

    #[test]
    fn local_queue_reports_unparsable_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test_input.json");
        fs::write(&path, "{not json").expect("write");

        let error = LocalJobQueue::from_file(&path).expect_err("should fail");

        assert!(error.contains("failed to parse"));
    }
}
