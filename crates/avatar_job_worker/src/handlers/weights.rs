//! Locating model weights before the first generation.
//!
//! Sources are tried in order, stopping at the first usable one:
//! the network volume's S3 store, the mounted volume, the weights baked into
//! the container image, and finally a download of the model repository.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::adapters::object_store::BlobStore;
use crate::adapters::process::{CommandSpec, ProcessRunner};
use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::runtime::storage_keys::{
    checkpoint_object_key, CHECKPOINTS_DIR, CHECKPOINT_RELATIVE_PATH, WEIGHTS_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    BlobStore,
    NetworkVolume,
    Container,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWeights {
    pub root: PathBuf,
    pub source: WeightSource,
    /// Names of the directories under `root/ckpts`, sorted.
    pub checkpoint_dirs: Vec<String>,
}

impl ResolvedWeights {
    pub fn checkpoint_file(&self) -> PathBuf {
        self.root.join(CHECKPOINT_RELATIVE_PATH)
    }
}

pub fn resolve_weights(
    config: &WorkerConfig,
    store: Option<&dyn BlobStore>,
    runner: &dyn ProcessRunner,
) -> Result<ResolvedWeights, JobError> {
    let (root, source) = if let Some(root) = store.and_then(|store| fetch_from_store(config, store)) {
        (root, WeightSource::BlobStore)
    } else if let Some(local) = locate_local(config) {
        local
    } else {
        let root = download_from_network(config, store, runner)?;
        (root, WeightSource::Download)
    };

    let checkpoint_dirs = list_checkpoint_dirs(&root)?;
    tracing::info!(
        root = %root.display(),
        source = ?source,
        checkpoint_dirs = ?checkpoint_dirs,
        "model weights resolved"
    );
    Ok(ResolvedWeights {
        root,
        source,
        checkpoint_dirs,
    })
}

fn fetch_from_store(config: &WorkerConfig, store: &dyn BlobStore) -> Option<PathBuf> {
    let key = checkpoint_object_key();
    if !store.exists(&key) {
        tracing::info!(key = %key, "checkpoint not cached in S3 storage");
        return None;
    }

    tracing::info!(key = %key, "checkpoint found in S3 storage");
    let root = config.weights_staging_dir.clone();
    if store.download_file(&key, &root.join(CHECKPOINT_RELATIVE_PATH)) {
        Some(root)
    } else {
        tracing::warn!(key = %key, "failed to download checkpoint from S3, trying other sources");
        None
    }
}

fn locate_local(config: &WorkerConfig) -> Option<(PathBuf, WeightSource)> {
    [
        (&config.network_volume_weights_dir, WeightSource::NetworkVolume),
        (&config.container_weights_dir, WeightSource::Container),
    ]
    .into_iter()
    .find(|(dir, _)| has_checkpoints(dir))
    .map(|(dir, source)| {
        tracing::info!(root = %dir.display(), source = ?source, "using local model weights");
        (dir.clone(), source)
    })
}

fn download_from_network(
    config: &WorkerConfig,
    store: Option<&dyn BlobStore>,
    runner: &dyn ProcessRunner,
) -> Result<PathBuf, JobError> {
    let root = config.weights_staging_dir.clone();
    fs::create_dir_all(&root).map_err(|error| {
        JobError::WeightsUnavailable(format!("failed to create {}: {error}", root.display()))
    })?;

    let command = CommandSpec::new(&config.hf_cli)
        .arg("download")
        .arg(&config.model_repo_id)
        .arg("--local-dir")
        .arg(root.display().to_string());
    tracing::info!(command = %command.display(), "model weights not found locally, downloading");

    let exit = runner
        .run(&command, &mut |line: &str| {
            tracing::info!(stream = "download", "{line}");
        })
        .map_err(|error| JobError::WeightsUnavailable(format!("model download failed: {error}")))?;
    if !exit.success() {
        return Err(JobError::WeightsUnavailable(format!(
            "model download failed with return code {}",
            exit.code
        )));
    }
    tracing::info!(root = %root.display(), "model download completed");

    if let Some(store) = store {
        tracing::info!("uploading models to S3 for future use");
        if store.upload_directory(&root, WEIGHTS_PREFIX) {
            tracing::info!("models uploaded to S3");
        } else {
            tracing::warn!("failed to upload some model files to S3");
        }
    }

    Ok(root)
}

fn has_checkpoints(dir: &Path) -> bool {
    dir.join(CHECKPOINTS_DIR).is_dir()
}

fn list_checkpoint_dirs(root: &Path) -> Result<Vec<String>, JobError> {
    let checkpoints = root.join(CHECKPOINTS_DIR);
    if !checkpoints.is_dir() {
        return Err(JobError::WeightsUnavailable(format!(
            "model checkpoints not found in {}",
            checkpoints.display()
        )));
    }

    let entries = fs::read_dir(&checkpoints)
        .map_err(|error| JobError::io_at("read", &checkpoints, error))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| JobError::io_at("read", &checkpoints, error))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
