use std::path::{Component, Path};

/// Prefix under which model weights are cached in the network volume.
pub const WEIGHTS_PREFIX: &str = "weights/";
/// Directory that must exist under any usable weights root.
pub const CHECKPOINTS_DIR: &str = "ckpts";
/// Checkpoint file handed to the inference script, relative to a weights root.
pub const CHECKPOINT_RELATIVE_PATH: &str =
    "ckpts/hunyuan-video-t2v-720p/transformers/mp_rank_00_model_states_fp8.pt";
pub const RESULTS_PREFIX: &str = "results";

/// Object key whose presence marks the weights as cached in the store.
pub fn checkpoint_object_key() -> String {
    format!("{WEIGHTS_PREFIX}{CHECKPOINT_RELATIVE_PATH}")
}

pub fn job_directory_name(job_id: &str) -> String {
    format!("job_{job_id}")
}

pub fn result_object_key(job_id: &str, file_name: &str) -> String {
    format!(
        "{RESULTS_PREFIX}/{}/{file_name}",
        job_directory_name(job_id)
    )
}

/// Key for a file uploaded as part of a directory: `prefix` followed by the
/// file's path relative to the uploaded directory, always `/`-separated.
pub fn directory_object_key(prefix: &str, relative_path: &Path) -> String {
    let relative = relative_path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("{prefix}{relative}")
}

pub fn reference_url(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn builds_checkpoint_key_under_weights_prefix() {
        assert_eq!(
            checkpoint_object_key(),
            "weights/ckpts/hunyuan-video-t2v-720p/transformers/mp_rank_00_model_states_fp8.pt"
        );
    }

    #[test]
    fn builds_result_key_per_job() {
        assert_eq!(
            result_object_key("abc-123", "sample.mp4"),
            "results/job_abc-123/sample.mp4"
        );
    }

    #[test]
    fn directory_key_joins_relative_components_with_slashes() {
        let relative: PathBuf = ["ckpts", "llava", "config.json"].iter().collect();
        assert_eq!(
            directory_object_key(WEIGHTS_PREFIX, &relative),
            "weights/ckpts/llava/config.json"
        );
        assert_eq!(
            directory_object_key("", Path::new("README.md")),
            "README.md"
        );
    }

    #[test]
    fn reference_url_is_bucket_scoped() {
        assert_eq!(
            reference_url("vol-1", "results/job_1/out.mp4"),
            "s3://vol-1/results/job_1/out.mp4"
        );
    }
}
