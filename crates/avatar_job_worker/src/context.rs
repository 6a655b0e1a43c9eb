use std::sync::{Mutex, PoisonError};

use crate::adapters::object_store::BlobStore;
use crate::adapters::process::ProcessRunner;
use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::handlers::weights::{resolve_weights, ResolvedWeights};

/// State shared by every job handled by one worker process.
pub struct WorkerContext {
    config: WorkerConfig,
    store: Option<Box<dyn BlobStore>>,
    runner: Box<dyn ProcessRunner>,
    weights: Mutex<Option<ResolvedWeights>>,
}

impl WorkerContext {
    /// `store` is `None` when the network volume is not configured or could
    /// not be reached at startup; every storage step is then skipped.
    pub fn new(
        config: WorkerConfig,
        store: Option<Box<dyn BlobStore>>,
        runner: Box<dyn ProcessRunner>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            weights: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&dyn BlobStore> {
        self.store.as_deref()
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    /// Resolves the model weights once per process. Failures are not cached,
    /// so the next job retries resolution.
    pub fn ensure_weights(&self) -> Result<ResolvedWeights, JobError> {
        let mut cached = self.weights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(weights) = cached.as_ref() {
            return Ok(weights.clone());
        }

        let weights = resolve_weights(&self.config, self.store(), self.runner())?;
        *cached = Some(weights.clone());
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::handlers::weights::WeightSource;
    use crate::testing::{test_config, ScriptedRunner};

    #[test]
    fn resolves_weights_once_and_reuses_them() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        fs::create_dir_all(config.container_weights_dir.join("ckpts/model")).expect("mkdir");
        let context = WorkerContext::new(config, None, Box::new(ScriptedRunner::succeeding()));

        let first = context.ensure_weights().expect("first resolution");
        fs::remove_dir_all(&first.root).expect("remove weights");
        let second = context.ensure_weights().expect("cached resolution");

        assert_eq!(first, second);
        assert_eq!(second.source, WeightSource::Container);
    }

    #[test]
    fn failed_resolution_is_retried_on_next_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let container_ckpts = config.container_weights_dir.join("ckpts/model");
        let context = WorkerContext::new(config, None, Box::new(ScriptedRunner::exiting_with(1)));

        assert!(context.ensure_weights().is_err());

        fs::create_dir_all(container_ckpts).expect("mkdir");
        let weights = context.ensure_weights().expect("second attempt succeeds");
        assert_eq!(weights.source, WeightSource::Container);
    }
}
