use serde::{Deserialize, Serialize};

pub const DEFAULT_PROMPT: &str = "";
pub const DEFAULT_DURATION_SECONDS: f64 = 5.0;
pub const DEFAULT_FPS: f64 = 24.0;
pub const DEFAULT_RESOLUTION: &str = "704x704";
pub const DEFAULT_SEED: i64 = 128;
pub const DEFAULT_CFG_SCALE: f64 = 7.5;
pub const DEFAULT_INFER_STEPS: u32 = 50;
/// Image size used when `resolution` is not a `WxH` pair.
pub const FALLBACK_IMAGE_SIZE: u32 = 704;

/// Envelope delivered by the hosting platform for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Option<GenerationInput>,
}

/// Raw job input. Every field is optional; defaults are applied by
/// [`normalize_request`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationInput {
    pub prompt: Option<String>,
    pub duration: Option<f64>,
    pub fps: Option<f64>,
    pub resolution: Option<String>,
    pub seed: Option<i64>,
    pub cfg_scale: Option<f64>,
    pub infer_steps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub job_id: String,
    pub prompt: String,
    pub duration: f64,
    pub fps: f64,
    pub resolution: String,
    pub seed: i64,
    pub cfg_scale: f64,
    pub infer_steps: u32,
}

impl GenerationRequest {
    pub fn frame_count(&self) -> u32 {
        frame_count(self.duration, self.fps)
    }

    pub fn image_size(&self) -> u32 {
        image_size_for_resolution(&self.resolution)
    }

    pub fn metadata(&self) -> GenerationMetadata {
        GenerationMetadata {
            prompt: self.prompt.clone(),
            duration: self.duration,
            fps: self.fps,
            resolution: self.resolution.clone(),
            seed: self.seed,
            cfg_scale: self.cfg_scale,
            infer_steps: self.infer_steps,
            frames: self.frame_count(),
            image_size: self.image_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationMetadata {
    pub prompt: String,
    pub duration: f64,
    pub fps: f64,
    pub resolution: String,
    pub seed: i64,
    pub cfg_scale: f64,
    pub infer_steps: u32,
    pub frames: u32,
    pub image_size: u32,
}

/// Job response returned to the hosting platform.
///
/// Serialized with a `status` tag, so a success never carries an `error`
/// field and a failure never carries output fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationResult {
    Success {
        output_url: String,
        s3_url: Option<String>,
        metadata: GenerationMetadata,
    },
    Error {
        error: String,
    },
}

impl GenerationResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Error { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// `duration × fps`, truncated toward zero. Saturates at the `u32` bounds.
pub fn frame_count(duration: f64, fps: f64) -> u32 {
    (duration * fps).trunc() as u32
}

/// Parses a `WxH` resolution. Both sides must be positive integers.
pub fn parse_resolution(resolution: &str) -> Option<(u32, u32)> {
    let (width, height) = resolution.trim().split_once('x')?;
    let width: u32 = width.trim().parse().ok()?;
    let height: u32 = height.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

pub fn image_size_for_resolution(resolution: &str) -> u32 {
    parse_resolution(resolution)
        .map(|(width, height)| width.max(height))
        .unwrap_or(FALLBACK_IMAGE_SIZE)
}

pub fn normalize_request(
    job_id: &str,
    input: GenerationInput,
) -> Result<GenerationRequest, ValidationError> {
    let job_id = job_id.trim().to_string();
    if job_id.is_empty() {
        return Err(ValidationError::new("job id cannot be empty"));
    }
    if job_id == "." || job_id == ".." || job_id.contains(['/', '\\']) {
        return Err(ValidationError::new(format!(
            "job id '{job_id}' cannot be used as a directory name"
        )));
    }

    let duration = input.duration.unwrap_or(DEFAULT_DURATION_SECONDS);
    if !duration.is_finite() || duration <= 0.0 {
        return Err(ValidationError::new("duration must be a positive number"));
    }

    let fps = input.fps.unwrap_or(DEFAULT_FPS);
    if !fps.is_finite() || fps <= 0.0 {
        return Err(ValidationError::new("fps must be a positive number"));
    }

    let cfg_scale = input.cfg_scale.unwrap_or(DEFAULT_CFG_SCALE);
    if !cfg_scale.is_finite() {
        return Err(ValidationError::new("cfg_scale must be a finite number"));
    }

    let infer_steps = input.infer_steps.unwrap_or(DEFAULT_INFER_STEPS);
    if infer_steps == 0 {
        return Err(ValidationError::new(
            "infer_steps must be a positive integer",
        ));
    }

    if frame_count(duration, fps) == 0 {
        return Err(ValidationError::new(format!(
            "duration {duration}s at {fps} fps produces no frames"
        )));
    }

    Ok(GenerationRequest {
        job_id,
        prompt: input.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        duration,
        fps,
        resolution: input
            .resolution
            .unwrap_or_else(|| DEFAULT_RESOLUTION.to_string()),
        seed: input.seed.unwrap_or(DEFAULT_SEED),
        cfg_scale,
        infer_steps,
    })
}
