//! Inputs and outputs of the external inference script.

use std::fs;
use std::path::{Path, PathBuf};

use crate::adapters::process::CommandSpec;
use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::handlers::weights::ResolvedWeights;
use crate::runtime::contract::GenerationRequest;

pub const INPUT_DESCRIPTOR_FILE: &str = "input.csv";
pub const ARTIFACT_EXTENSION: &str = "mp4";

const USE_DEEPCACHE: &str = "1";
const FLOW_SHIFT_EVAL_VIDEO: &str = "5.0";

/// Writes the `prompt,seed` descriptor read by the inference script.
pub fn write_input_descriptor(
    output_dir: &Path,
    request: &GenerationRequest,
) -> Result<PathBuf, JobError> {
    let path = output_dir.join(INPUT_DESCRIPTOR_FILE);
    let file = fs::File::create(&path).map_err(|error| JobError::io_at("create", &path, error))?;

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(file);
    let seed = request.seed.to_string();
    for record in [["prompt", "seed"], [request.prompt.as_str(), seed.as_str()]] {
        writer
            .write_record(record)
            .map_err(|error| JobError::io_at("write", &path, std::io::Error::other(error)))?;
    }
    writer
        .flush()
        .map_err(|error| JobError::io_at("flush", &path, error))?;

    Ok(path)
}

pub fn build_inference_command(
    config: &WorkerConfig,
    request: &GenerationRequest,
    weights: &ResolvedWeights,
    input_path: &Path,
    output_dir: &Path,
) -> CommandSpec {
    CommandSpec::new(&config.inference_python)
        .arg(&config.inference_script)
        .arg("--input")
        .arg(input_path.display().to_string())
        .arg("--ckpt")
        .arg(weights.checkpoint_file().display().to_string())
        .arg("--sample-n-frames")
        .arg(request.frame_count().to_string())
        .arg("--seed")
        .arg(request.seed.to_string())
        .arg("--image-size")
        .arg(request.image_size().to_string())
        .arg("--cfg-scale")
        .arg(format_decimal(request.cfg_scale))
        .arg("--infer-steps")
        .arg(request.infer_steps.to_string())
        .arg("--use-deepcache")
        .arg(USE_DEEPCACHE)
        .arg("--flow-shift-eval-video")
        .arg(FLOW_SHIFT_EVAL_VIDEO)
        .arg("--save-path")
        .arg(output_dir.display().to_string())
        .arg("--use-fp8")
        .arg("--infer-min")
        .current_dir(&config.workspace_dir)
        .env("PYTHONPATH", config.workspace_dir.display().to_string())
        .env("MODEL_BASE", weights.root.display().to_string())
        .env("DISABLE_SP", "1")
        .env("CUDA_VISIBLE_DEVICES", "0")
}

/// Finds the generated video in `output_dir`, not descending into
/// subdirectories. With several candidates the lexicographically first
/// file name wins.
pub fn locate_artifact(output_dir: &Path) -> Result<PathBuf, JobError> {
    let entries = fs::read_dir(output_dir).map_err(|error| JobError::io_at("read", output_dir, error))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|error| JobError::io_at("read", output_dir, error))?
            .path();
        let is_video = path
            .extension()
            .is_some_and(|extension| extension == ARTIFACT_EXTENSION);
        if is_video && path.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();

    if let [chosen, ignored @ ..] = candidates.as_slice() {
        if !ignored.is_empty() {
            tracing::warn!(
                output_dir = %output_dir.display(),
                chosen = %chosen.display(),
                ignored = ?ignored,
                "multiple video files produced, using the first by name"
            );
        }
    }
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| JobError::ArtifactNotFound(output_dir.to_path_buf()))
}

/// Keeps a fractional part on whole numbers (`7.0`, not `7`).
fn format_decimal(value: f64) -> String {
    format!("{value:?}")
}
