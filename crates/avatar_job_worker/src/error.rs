use std::path::{Path, PathBuf};

use crate::runtime::contract::ValidationError;

/// Reasons a job ends in `status = "error"`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid job input: {0}")]
    Validation(#[from] ValidationError),

    #[error("model weights unavailable: {0}")]
    WeightsUnavailable(String),

    #[error("inference process could not be run: {0}")]
    Launch(String),

    #[error("inference failed with return code {exit_code}")]
    Execution { exit_code: i32 },

    #[error("No video files found in {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("failed to {action} {}", path.display()), source)
    }

    /// Stable identifier for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::WeightsUnavailable(_) => "weights_unavailable",
            Self::Launch(_) => "launch_error",
            Self::Execution { .. } => "execution_error",
            Self::ArtifactNotFound(_) => "artifact_not_found",
            Self::Io { .. } => "io_error",
        }
    }
}
