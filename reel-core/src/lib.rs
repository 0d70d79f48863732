pub mod admission;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod procedural;
pub mod service;

pub use admission::{AdmissionController, AdmissionPermit, Overloaded};
pub use config::ServiceConfig;
pub use error::{InferError, LoadError, ServiceError};
pub use model::{ModelHandle, ModelStatus};
pub use pipeline::{Frame, MotionPipeline, PipelineDescriptor, PipelineLoader};
pub use procedural::{ProceduralLoader, ProceduralPipeline};
pub use service::{GenerationResult, GenerationService};

use serde::{Deserialize, Serialize};

/// Raw caller-supplied generation parameters, before validation and
/// defaulting. This is the wire shape of `POST /generate`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: Option<String>,
    pub guidance_scale: Option<f64>,
    pub num_inference_steps: Option<u32>,
    pub num_frames: Option<u32>,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            guidance_scale: None,
            num_inference_steps: None,
            num_frames: None,
        }
    }
}

/// A fully validated request with every field resolved against the service
/// defaults. Constructed per inbound call, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub job_id: String,
    pub prompt: String,
    pub guidance_scale: f64,
    pub num_inference_steps: u32,
    pub num_frames: u32,
}

impl GenerationRequest {
    /// Validates `params` and fills in defaults from `config`. Rejects empty
    /// prompts and non-positive numeric overrides.
    pub fn resolve(params: GenerationParams, config: &ServiceConfig) -> Result<Self, ServiceError> {
        let prompt = params.prompt.as_deref().unwrap_or("").trim().to_owned();
        if prompt.is_empty() {
            return Err(ServiceError::Validation(
                "prompt is required and must not be empty".into(),
            ));
        }

        let guidance_scale = params.guidance_scale.unwrap_or(config.default_guidance_scale);
        let num_inference_steps = params
            .num_inference_steps
            .unwrap_or(config.default_inference_steps);
        let num_frames = params.num_frames.unwrap_or(config.default_frames);

        if !(guidance_scale > 0.0) {
            return Err(ServiceError::Validation(format!(
                "guidance_scale must be positive, got {guidance_scale}"
            )));
        }
        if num_inference_steps == 0 {
            return Err(ServiceError::Validation(
                "num_inference_steps must be positive".into(),
            ));
        }
        if num_frames == 0 {
            return Err(ServiceError::Validation("num_frames must be positive".into()));
        }

        Ok(Self {
            job_id: new_job_id(),
            prompt,
            guidance_scale,
            num_inference_steps,
            num_frames,
        })
    }
}

/// Timestamp plus a short random fragment, so two requests landing within
/// the same second still get distinct artifact names.
fn new_job_id() -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}_{}", &nonce[..8])
}
