use std::path::PathBuf;

use avatar_job_worker::adapters::job_queue::LocalJobQueue;
use avatar_job_worker::adapters::object_store::BlobStore;
use avatar_job_worker::adapters::process::TokioProcessRunner;
use avatar_job_worker::adapters::runpod::{RunPodEndpoints, RunPodJobQueue};
use avatar_job_worker::adapters::s3::S3BlobStore;
use avatar_job_worker::config::WorkerConfig;
use avatar_job_worker::context::WorkerContext;
use avatar_job_worker::handlers::serve::{serve_jobs, ServeOptions};
use avatar_job_worker::runtime::storage_config::StorageConfig;
use avatar_job_worker::telemetry;

type Error = Box<dyn std::error::Error + Send + Sync>;

const TEST_INPUT_VAR: &str = "RUNPOD_TEST_INPUT";
const DEFAULT_TEST_INPUT: &str = "test_input.json";

/// Storage is optional: jobs still run without it, they just skip the
/// weight cache and result uploads.
async fn connect_store(report_storage_info: bool) -> Option<Box<dyn BlobStore>> {
    let storage_config = match StorageConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, "S3 storage not configured, continuing without it");
            return None;
        }
    };

    match S3BlobStore::connect(storage_config).await {
        Ok(store) => {
            if report_storage_info {
                if let Some(info) = store.storage_info() {
                    tracing::info!(
                        datacenter = %info.datacenter,
                        network_volume = %info.network_volume_id,
                        total_files = info.total_files,
                        total_size_gb = info.total_size_gb,
                        "network volume contents"
                    );
                }
            }
            Some(Box::new(store))
        }
        Err(error) => {
            tracing::warn!(%error, "S3 storage unavailable, continuing without it");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = WorkerConfig::from_env();
    tracing::info!(?config, "starting avatar worker");
    let store = connect_store(config.report_storage_info).await;
    let ctx = WorkerContext::new(config, store, Box::new(TokioProcessRunner));

    match RunPodEndpoints::from_env()? {
        Some(endpoints) => {
            tracing::info!(?endpoints, "serving RunPod jobs");
            let queue = RunPodJobQueue::new(endpoints)?;
            let heartbeat = queue.spawn_heartbeat();
            tokio::task::block_in_place(|| serve_jobs(&queue, &ctx, ServeOptions::default()));
            if let Some(heartbeat) = heartbeat {
                heartbeat.abort();
            }
        }
        None => {
            let path = std::env::var(TEST_INPUT_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_TEST_INPUT));
            tracing::info!(path = %path.display(), "no RunPod job endpoint, running local test input");
            let queue = LocalJobQueue::from_file(&path)?;
            let options = ServeOptions {
                max_jobs: Some(1),
                ..ServeOptions::default()
            };
            tokio::task::block_in_place(|| serve_jobs(&queue, &ctx, options));
        }
    }

    Ok(())
}
