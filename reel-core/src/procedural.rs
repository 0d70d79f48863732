use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use crate::pipeline::{Frame, MotionPipeline, PipelineDescriptor, PipelineLoader};
use crate::GenerationRequest;

/// CPU-only stand-in backend: renders a prompt-seeded drifting color field.
///
/// It exists so the serving stack runs end-to-end without model weights;
/// real diffusion backends implement the same `MotionPipeline` trait. The
/// output is deterministic for a given request, which the tests rely on.
pub struct ProceduralPipeline {
    width: u32,
    height: u32,
}

impl ProceduralPipeline {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn seed(prompt: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        hasher.finish()
    }

    fn render_frame(&self, seed: u64, index: u32, total: u32, contrast: f64) -> Frame {
        let phase = f64::from(index) / f64::from(total.max(1));
        let base_r = (seed & 0xff) as f64;
        let base_g = ((seed >> 8) & 0xff) as f64;
        let base_b = ((seed >> 16) & 0xff) as f64;

        Frame::from_fn(self.width, self.height, |x, y| {
            let fx = f64::from(x) / f64::from(self.width);
            let fy = f64::from(y) / f64::from(self.height);
            let wave = ((fx + phase) * std::f64::consts::TAU).sin()
                * ((fy - phase) * std::f64::consts::TAU).cos();
            let lift = wave * 127.0 * contrast.min(4.0) / 4.0;
            let channel = |base: f64| (base + lift).clamp(0.0, 255.0) as u8;
            image::Rgb([channel(base_r), channel(base_g), channel(base_b)])
        })
    }
}

impl MotionPipeline for ProceduralPipeline {
    fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Vec<Frame>> {
        let seed = Self::seed(&request.prompt);
        let frames = (0..request.num_frames)
            .map(|index| {
                self.render_frame(seed, index, request.num_frames, request.guidance_scale)
            })
            .collect();
        Ok(frames)
    }

    fn descriptor(&self) -> PipelineDescriptor {
        PipelineDescriptor {
            model_type: "procedural".into(),
            device: "cpu".into(),
        }
    }
}

/// Loader for the built-in backend. Construction is instantaneous, but it
/// still goes through `ModelHandle` like any expensive loader would.
pub struct ProceduralLoader {
    pub width: u32,
    pub height: u32,
}

impl Default for ProceduralLoader {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
        }
    }
}

#[async_trait]
impl PipelineLoader for ProceduralLoader {
    async fn load(&self) -> anyhow::Result<Arc<dyn MotionPipeline>> {
        Ok(Arc::new(ProceduralPipeline::new(self.width, self.height)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            job_id: "job".into(),
            prompt: prompt.into(),
            guidance_scale: 1.0,
            num_inference_steps: 4,
            num_frames: 3,
        }
    }

    #[test]
    fn output_is_deterministic_per_prompt() {
        let pipeline = ProceduralPipeline::new(16, 16);
        let first = pipeline.generate(&request("a red circle")).unwrap();
        let second = pipeline.generate(&request("a red circle")).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].as_raw(), second[0].as_raw());
    }

    #[test]
    fn different_prompts_produce_different_frames() {
        let pipeline = ProceduralPipeline::new(16, 16);
        let circle = pipeline.generate(&request("a red circle")).unwrap();
        let square = pipeline.generate(&request("a blue square")).unwrap();
        assert_ne!(circle[0].as_raw(), square[0].as_raw());
    }

    #[test]
    fn honors_the_requested_frame_count() {
        let pipeline = ProceduralPipeline::new(8, 8);
        let mut req = request("waves");
        req.num_frames = 7;
        assert_eq!(pipeline.generate(&req).unwrap().len(), 7);
    }
}
