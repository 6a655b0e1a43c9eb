use std::path::PathBuf;

pub const DEFAULT_WORKSPACE_DIR: &str = "/workspace";
pub const DEFAULT_WEIGHTS_STAGING_DIR: &str = "/workspace/weights";
pub const DEFAULT_NETWORK_VOLUME_WEIGHTS_DIR: &str = "/runpod-volume/weights";
pub const DEFAULT_CONTAINER_WEIGHTS_DIR: &str = "/workspace/HunyuanVideo-Avatar/weights";
pub const DEFAULT_RESULTS_DIR: &str = "/workspace/results";
pub const DEFAULT_INFERENCE_PYTHON: &str = "python3";
pub const DEFAULT_INFERENCE_SCRIPT: &str = "hymm_sp/sample_gpu_poor.py";
pub const DEFAULT_MODEL_REPO_ID: &str = "tencent/HunyuanVideo-Avatar";
pub const DEFAULT_HF_CLI: &str = "huggingface-cli";

/// Filesystem layout and external tools used by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Working directory of the inference process; also its `PYTHONPATH`.
    pub workspace_dir: PathBuf,
    /// Where weights fetched from the store or the network are placed.
    pub weights_staging_dir: PathBuf,
    pub network_volume_weights_dir: PathBuf,
    pub container_weights_dir: PathBuf,
    pub results_dir: PathBuf,
    pub inference_python: String,
    pub inference_script: String,
    pub model_repo_id: String,
    pub hf_cli: String,
    /// Log object counts and total size of the network volume at startup.
    pub report_storage_info: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            weights_staging_dir: PathBuf::from(DEFAULT_WEIGHTS_STAGING_DIR),
            network_volume_weights_dir: PathBuf::from(DEFAULT_NETWORK_VOLUME_WEIGHTS_DIR),
            container_weights_dir: PathBuf::from(DEFAULT_CONTAINER_WEIGHTS_DIR),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            inference_python: DEFAULT_INFERENCE_PYTHON.to_string(),
            inference_script: DEFAULT_INFERENCE_SCRIPT.to_string(),
            model_repo_id: DEFAULT_MODEL_REPO_ID.to_string(),
            hf_cli: DEFAULT_HF_CLI.to_string(),
            report_storage_info: false,
        }
    }
}

impl WorkerConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        Self {
            workspace_dir: read("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
            weights_staging_dir: read("WEIGHTS_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.weights_staging_dir),
            network_volume_weights_dir: read("NETWORK_VOLUME_WEIGHTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.network_volume_weights_dir),
            container_weights_dir: read("CONTAINER_WEIGHTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.container_weights_dir),
            results_dir: read("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            inference_python: read("INFERENCE_PYTHON").unwrap_or(defaults.inference_python),
            inference_script: read("INFERENCE_SCRIPT").unwrap_or(defaults.inference_script),
            model_repo_id: read("MODEL_REPO_ID").unwrap_or(defaults.model_repo_id),
            hf_cli: read("HF_CLI").unwrap_or(defaults.hf_cli),
            report_storage_info: read("REPORT_STORAGE_INFO")
                .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.report_storage_info),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}
