use std::path::PathBuf;

use serde::Serialize;

/// Recognized service options. The server binary builds this from its CLI
/// arguments; tests construct it directly.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfig {
    /// Upper bound on simultaneously executing inferences.
    pub max_concurrent: usize,
    /// Upper bound on requests waiting for an inference slot. Arrivals past
    /// this bound are rejected outright.
    pub max_queued: usize,
    pub default_guidance_scale: f64,
    pub default_inference_steps: u32,
    pub default_frames: u32,
    pub output_format: String,
    pub output_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queued: 8,
            default_guidance_scale: 1.0,
            default_inference_steps: 4,
            default_frames: 32,
            output_format: "gif".into(),
            output_dir: PathBuf::from("output/animations"),
        }
    }
}
