use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::GenerationRequest;

/// A single animation frame.
pub type Frame = image::RgbImage;

/// Reported through `/info` so clients can see what is actually serving.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineDescriptor {
    pub model_type: String,
    pub device: String,
}

/// The opaque inference capability. Implementations wrap whatever model
/// library actually does the sampling; the serving layer never looks inside.
///
/// `generate` must treat the pipeline as read-only: the handle may run up to
/// `max_concurrent` calls against the same instance. Backends that cannot
/// tolerate that should be served with `max_concurrent = 1`.
pub trait MotionPipeline: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Vec<Frame>>;

    /// Drop transient buffers kept from the previous inference. Invoked once
    /// per admitted request, whether or not the inference succeeded.
    fn release_transients(&self) {}

    fn descriptor(&self) -> PipelineDescriptor;
}

/// Builds the pipeline. Loading is assumed expensive (weight download,
/// device placement) and is only ever attempted by `ModelHandle`.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<Arc<dyn MotionPipeline>>;
}
