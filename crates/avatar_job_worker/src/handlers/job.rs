//! Orchestration of one generation job, from the platform envelope to the
//! response returned to the platform.

use std::fs;
use std::path::Path;
use std::time::Instant;

use serde_json::Value;

use crate::context::WorkerContext;
use crate::error::JobError;
use crate::handlers::inference::{build_inference_command, locate_artifact, write_input_descriptor};
use crate::runtime::contract::{normalize_request, GenerationInput, GenerationResult, JobEvent};
use crate::runtime::storage_keys::{job_directory_name, result_object_key};

/// Decodes a raw platform event and runs the job it carries.
///
/// `fallback_job_id` is used when the envelope has no `id`. Every failure is
/// folded into a `status = "error"` result.
pub fn handle_job_event(event: Value, fallback_job_id: &str, ctx: &WorkerContext) -> GenerationResult {
    let event: JobEvent = match serde_json::from_value(event) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(event = "job_rejected", %error, "failed to decode job envelope");
            return GenerationResult::error(format!("Handler error: {error}"));
        }
    };

    let job_id = event
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| fallback_job_id.to_string());
    handle_job(&job_id, event.input.unwrap_or_default(), ctx)
}

pub fn handle_job(job_id: &str, input: GenerationInput, ctx: &WorkerContext) -> GenerationResult {
    let started = Instant::now();
    tracing::info!(
        event = "job_started",
        job_id,
        started_at = %chrono::Utc::now().to_rfc3339(),
        "processing job"
    );

    match run_job(job_id, input, ctx) {
        Ok(result) => {
            tracing::info!(
                event = "job_completed",
                job_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job completed"
            );
            result
        }
        Err(error) => {
            tracing::error!(
                event = "job_failed",
                job_id,
                code = error.code(),
                %error,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job failed"
            );
            GenerationResult::error(error.to_string())
        }
    }
}

fn run_job(
    job_id: &str,
    input: GenerationInput,
    ctx: &WorkerContext,
) -> Result<GenerationResult, JobError> {
    let request = normalize_request(job_id, input)?;
    let weights = ctx.ensure_weights()?;
    tracing::info!(
        event = "weights_resolved",
        job_id = %request.job_id,
        root = %weights.root.display(),
        source = ?weights.source,
        "model weights ready"
    );

    let output_dir = ctx
        .config()
        .results_dir
        .join(job_directory_name(&request.job_id));
    fs::create_dir_all(&output_dir).map_err(|error| JobError::io_at("create", &output_dir, error))?;
    let input_path = write_input_descriptor(&output_dir, &request)?;

    let command = build_inference_command(ctx.config(), &request, &weights, &input_path, &output_dir);
    tracing::info!(
        event = "process_started",
        job_id = %request.job_id,
        prompt = %request.prompt,
        frames = request.frame_count(),
        image_size = request.image_size(),
        output_dir = %output_dir.display(),
        command = %command.display(),
        "starting inference"
    );

    let exit = ctx
        .runner()
        .run(&command, &mut |line: &str| {
            tracing::info!(stream = "inference", "{line}");
        })
        .map_err(JobError::Launch)?;
    if !exit.success() {
        return Err(JobError::Execution {
            exit_code: exit.code,
        });
    }

    let artifact = locate_artifact(&output_dir)?;
    tracing::info!(
        event = "artifact_located",
        job_id = %request.job_id,
        artifact = %artifact.display(),
        "video generated"
    );
    let s3_url = upload_artifact(ctx, &request.job_id, &artifact);

    Ok(GenerationResult::Success {
        output_url: artifact.display().to_string(),
        s3_url,
        metadata: request.metadata(),
    })
}

/// Best-effort; a failed upload leaves the job successful without `s3_url`.
fn upload_artifact(ctx: &WorkerContext, job_id: &str, artifact: &Path) -> Option<String> {
    let store = ctx.store()?;
    let file_name = artifact.file_name()?.to_string_lossy();
    let key = result_object_key(job_id, &file_name);

    if store.upload_file(artifact, &key) {
        let url = store.reference_url(&key);
        tracing::info!(url = %url, "video uploaded to S3");
        Some(url)
    } else {
        tracing::warn!(key = %key, "failed to upload video to S3");
        None
    }
}
