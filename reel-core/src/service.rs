use std::fs;
use std::path::PathBuf;

use crate::admission::AdmissionController;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::export;
use crate::model::{ModelHandle, ModelStatus};
use crate::pipeline::PipelineLoader;
use crate::{GenerationParams, GenerationRequest, PipelineDescriptor};

/// One finished generation. The caller owns both the bytes and the artifact;
/// the service keeps no reference to either.
#[derive(Debug)]
pub struct GenerationResult {
    pub bytes: Vec<u8>,
    pub output_path: PathBuf,
}

/// Per-request orchestration: validate, make the model ready, pass admission
/// control, run inference inside the admitted scope, persist the artifact,
/// and always release transient model state before returning.
pub struct GenerationService {
    config: ServiceConfig,
    model: ModelHandle,
    admission: AdmissionController,
}

impl GenerationService {
    pub fn new(config: ServiceConfig, loader: Box<dyn PipelineLoader>) -> anyhow::Result<Self> {
        fs::create_dir_all(&config.output_dir)?;
        let admission = AdmissionController::new(config.max_concurrent, config.max_queued);
        Ok(Self {
            config,
            model: ModelHandle::new(loader),
            admission,
        })
    }

    /// Eagerly attempt the first model load. Startup tolerates a failure
    /// here: the handle remembers it and the next request retries.
    pub async fn warm_up(&self) -> Result<(), ServiceError> {
        self.model.ensure_ready().await?;
        Ok(())
    }

    pub async fn generate(
        &self,
        params: GenerationParams,
    ) -> Result<GenerationResult, ServiceError> {
        let request = GenerationRequest::resolve(params, &self.config)?;

        self.model.ensure_ready().await?;

        let _permit = self.admission.admit().await?;
        tracing::info!(
            job_id = %request.job_id,
            prompt = %request.prompt,
            steps = request.num_inference_steps,
            frames = request.num_frames,
            "starting generation"
        );

        // Everything past admission is synchronous, so the cleanup below and
        // the permit release both run no matter how the inference went.
        let outcome = self.run_admitted(&request);
        self.model.release_transients();

        match &outcome {
            Ok(result) => {
                tracing::info!(job_id = %request.job_id, path = %result.output_path.display(), "generation complete")
            }
            Err(err) => tracing::error!(job_id = %request.job_id, error = %err, "generation failed"),
        }
        outcome
    }

    fn run_admitted(&self, request: &GenerationRequest) -> Result<GenerationResult, ServiceError> {
        let frames = self.model.infer(request)?;

        let output_path = self
            .config
            .output_dir
            .join(format!("animation_{}.gif", request.job_id));
        let bytes =
            export::write_gif(&frames, &output_path).map_err(ServiceError::persistence)?;

        Ok(GenerationResult { bytes, output_path })
    }

    pub fn model_status(&self) -> ModelStatus {
        self.model.status()
    }

    pub fn pipeline_descriptor(&self) -> Option<PipelineDescriptor> {
        self.model.descriptor()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn in_flight(&self) -> usize {
        self.admission.in_flight()
    }

    pub fn queued(&self) -> usize {
        self.admission.queued()
    }
}
