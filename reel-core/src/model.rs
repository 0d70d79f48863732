use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{InferError, LoadError};
use crate::pipeline::{Frame, MotionPipeline, PipelineLoader};
use crate::GenerationRequest;

/// Point-in-time view of the model lifecycle, for `/health` and `/info`.
/// Reading it never mutates the handle.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub is_loaded: bool,
    pub error: Option<String>,
    pub error_time: Option<DateTime<Utc>>,
}

enum LoadState {
    Unloaded,
    Loading,
    Ready(Arc<dyn MotionPipeline>),
    Failed { error: String, at: DateTime<Utc> },
}

/// Owns the singleton pipeline: lazy load on first use, failure memory, and
/// retry on the next request that observes the failure. The pipeline handle
/// never leaves this type.
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<Inner>,
}

struct Inner {
    loader: Box<dyn PipelineLoader>,
    state: Mutex<LoadState>,
    // Bumped whenever a load attempt settles, waking ensure_ready waiters.
    settled: watch::Sender<u64>,
}

impl ModelHandle {
    pub fn new(loader: Box<dyn PipelineLoader>) -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                loader,
                state: Mutex::new(LoadState::Unloaded),
                settled,
            }),
        }
    }

    /// Make the pipeline available, loading it if necessary.
    ///
    /// At most one load attempt runs at a time. A caller that finds an
    /// attempt already in flight suspends and shares that attempt's outcome;
    /// a caller that finds `Unloaded` or `Failed` claims a fresh attempt.
    pub async fn ensure_ready(&self) -> Result<(), LoadError> {
        let mut settled = self.inner.settled.subscribe();
        loop {
            let claimed = {
                let mut state = self.inner.lock_state();
                match &*state {
                    LoadState::Ready(_) => return Ok(()),
                    LoadState::Loading => false,
                    LoadState::Unloaded | LoadState::Failed { .. } => {
                        *state = LoadState::Loading;
                        true
                    }
                }
            };

            if claimed {
                // The attempt runs on its own task so an abandoned request
                // cannot leave the handle stuck in `Loading`.
                let inner = self.inner.clone();
                let attempt = tokio::spawn(async move { inner.run_load().await });
                return match attempt.await {
                    Ok(outcome) => outcome.map(|_| ()),
                    Err(join_err) => Err(LoadError(format!("load task failed: {join_err}"))),
                };
            }

            // Someone else owns the attempt; wait for it to settle and take
            // whatever outcome it produced.
            if settled.changed().await.is_err() {
                return Err(LoadError("model handle shut down during load".into()));
            }
            let outcome = {
                let state = self.inner.lock_state();
                match &*state {
                    LoadState::Ready(_) => Some(Ok(())),
                    LoadState::Failed { error, .. } => Some(Err(LoadError(error.clone()))),
                    // A newer attempt was already claimed; wait again.
                    LoadState::Loading | LoadState::Unloaded => None,
                }
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    /// Run one inference. Requires a prior successful `ensure_ready`; a
    /// failing request leaves the lifecycle state untouched.
    pub fn infer(&self, request: &GenerationRequest) -> Result<Vec<Frame>, InferError> {
        let pipeline = self
            .pipeline()
            .ok_or_else(|| InferError("model is not loaded".into()))?;
        pipeline
            .generate(request)
            .map_err(|err| InferError(format!("{err:#}")))
    }

    /// Ask the pipeline to drop per-request scratch state. No-op while the
    /// model is not loaded.
    pub fn release_transients(&self) {
        if let Some(pipeline) = self.pipeline() {
            pipeline.release_transients();
        }
    }

    pub fn status(&self) -> ModelStatus {
        match &*self.inner.lock_state() {
            LoadState::Ready(_) => ModelStatus {
                is_loaded: true,
                error: None,
                error_time: None,
            },
            LoadState::Failed { error, at } => ModelStatus {
                is_loaded: false,
                error: Some(error.clone()),
                error_time: Some(*at),
            },
            LoadState::Unloaded | LoadState::Loading => ModelStatus {
                is_loaded: false,
                error: None,
                error_time: None,
            },
        }
    }

    pub fn descriptor(&self) -> Option<crate::PipelineDescriptor> {
        self.pipeline().map(|p| p.descriptor())
    }

    fn pipeline(&self) -> Option<Arc<dyn MotionPipeline>> {
        match &*self.inner.lock_state() {
            LoadState::Ready(pipeline) => Some(pipeline.clone()),
            _ => None,
        }
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoadState> {
        self.state.lock().expect("model state lock poisoned")
    }

    async fn run_load(&self) -> Result<Arc<dyn MotionPipeline>, LoadError> {
        tracing::info!("loading motion pipeline");
        let started = Instant::now();
        let result = self.loader.load().await;

        let outcome = {
            let mut state = self.lock_state();
            match result {
                Ok(pipeline) => {
                    tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "motion pipeline loaded"
                    );
                    *state = LoadState::Ready(pipeline.clone());
                    Ok(pipeline)
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    tracing::error!(error = %reason, "motion pipeline load failed");
                    *state = LoadState::Failed {
                        error: reason.clone(),
                        at: Utc::now(),
                    };
                    Err(LoadError(reason))
                }
            }
        };
        self.settled.send_modify(|generation| *generation += 1);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    use crate::pipeline::PipelineDescriptor;

    struct NullPipeline;

    impl MotionPipeline for NullPipeline {
        fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<Vec<Frame>> {
            Ok(vec![Frame::new(4, 4)])
        }

        fn descriptor(&self) -> PipelineDescriptor {
            PipelineDescriptor {
                model_type: "null".into(),
                device: "cpu".into(),
            }
        }
    }

    /// Counts attempts and how many loads overlap, and can be told to fail.
    struct ProbeLoader {
        attempts: AtomicUsize,
        concurrent: AtomicUsize,
        peak_concurrent: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl ProbeLoader {
        fn new(fail: bool, delay: Duration) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                peak_concurrent: AtomicUsize::new(0),
                fail: AtomicBool::new(fail),
                delay,
            }
        }
    }

    #[async_trait]
    impl PipelineLoader for Arc<ProbeLoader> {
        async fn load(&self) -> anyhow::Result<Arc<dyn MotionPipeline>> {
            self.attempts.fetch_add(1, Ordering::AcqRel);
            let running = self.concurrent.fetch_add(1, Ordering::AcqRel) + 1;
            self.peak_concurrent.fetch_max(running, Ordering::AcqRel);
            sleep(self.delay).await;
            self.concurrent.fetch_sub(1, Ordering::AcqRel);
            if self.fail.load(Ordering::Acquire) {
                anyhow::bail!("weights checkpoint is corrupt")
            }
            Ok(Arc::new(NullPipeline))
        }
    }

    fn handle_with(loader: &Arc<ProbeLoader>) -> ModelHandle {
        ModelHandle::new(Box::new(loader.clone()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_first_requests_share_one_load() {
        let loader = Arc::new(ProbeLoader::new(false, Duration::from_millis(50)));
        let handle = handle_with(&loader);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.ensure_ready().await }));
        }
        for task in tasks {
            task.await.expect("task completed").expect("load succeeded");
        }

        assert_eq!(loader.attempts.load(Ordering::Acquire), 1);
        assert_eq!(loader.peak_concurrent.load(Ordering::Acquire), 1);
        assert!(handle.status().is_loaded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn waiters_share_the_failure_of_the_inflight_attempt() {
        let loader = Arc::new(ProbeLoader::new(true, Duration::from_millis(50)));
        let handle = handle_with(&loader);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.ensure_ready().await }));
        }
        for task in tasks {
            let err = task.await.expect("task completed").unwrap_err();
            assert!(err.0.contains("corrupt"));
        }
        assert_eq!(loader.attempts.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn failure_is_remembered_and_retried_on_next_use() {
        let loader = Arc::new(ProbeLoader::new(true, Duration::ZERO));
        let handle = handle_with(&loader);

        assert!(handle.ensure_ready().await.is_err());
        let status = handle.status();
        assert!(!status.is_loaded);
        assert!(status.error.as_deref().unwrap_or("").contains("corrupt"));
        assert!(status.error_time.is_some());

        // Next use triggers exactly one fresh attempt, which now succeeds.
        loader.fail.store(false, Ordering::Release);
        handle.ensure_ready().await.expect("retry succeeded");
        assert_eq!(loader.attempts.load(Ordering::Acquire), 2);
        let status = handle.status();
        assert!(status.is_loaded);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn ready_handle_is_a_no_op_and_status_reads_are_pure() {
        let loader = Arc::new(ProbeLoader::new(false, Duration::ZERO));
        let handle = handle_with(&loader);

        handle.ensure_ready().await.expect("loaded");
        handle.ensure_ready().await.expect("no-op");
        assert_eq!(loader.attempts.load(Ordering::Acquire), 1);

        for _ in 0..10 {
            let status = handle.status();
            assert!(status.is_loaded);
        }
        assert_eq!(loader.attempts.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn infer_without_load_reports_not_loaded() {
        let loader = Arc::new(ProbeLoader::new(false, Duration::ZERO));
        let handle = handle_with(&loader);
        let request = GenerationRequest {
            job_id: "job".into(),
            prompt: "a red circle".into(),
            guidance_scale: 1.0,
            num_inference_steps: 4,
            num_frames: 2,
        };
        let err = handle.infer(&request).unwrap_err();
        assert!(err.0.contains("not loaded"));
    }
}
