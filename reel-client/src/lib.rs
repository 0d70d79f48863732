use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {detail}")]
    Api {
        status: reqwest::StatusCode,
        detail: String,
    },

    #[error("failed to save animation: {0}")]
    Io(#[from] std::io::Error),
}

/// Optional per-request overrides; anything left `None` falls back to the
/// server's configured defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_frames: Option<u32>,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    #[serde(flatten)]
    options: &'a GenerationOptions,
}

/// Thin HTTP client for the animation server. Cheap to clone; clones share
/// the underlying connection pool.
#[derive(Clone)]
pub struct AnimationClient {
    http: reqwest::Client,
    base_url: String,
    output_dir: Option<PathBuf>,
}

impl AnimationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            http: reqwest::Client::new(),
            base_url,
            output_dir: None,
        }
    }

    /// Save every generated animation under `dir` in addition to returning
    /// the bytes.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub async fn check_health(&self) -> Result<serde_json::Value, ClientError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(Self::expect_ok(response).await?.json().await?)
    }

    pub async fn get_info(&self) -> Result<serde_json::Value, ClientError> {
        let response = self
            .http
            .get(format!("{}/info", self.base_url))
            .send()
            .await?;
        Ok(Self::expect_ok(response).await?.json().await?)
    }

    /// Request one animation. Returns the encoded GIF bytes and, when an
    /// output directory is configured, also writes them to a timestamped
    /// file named after the prompt.
    pub async fn generate_animation(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Vec<u8>, ClientError> {
        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&GenerateBody { prompt, options })
            .send()
            .await?;
        let bytes = Self::expect_ok(response).await?.bytes().await?.to_vec();

        if let Some(dir) = &self.output_dir {
            let path = dir.join(animation_filename(prompt));
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &bytes).await?;
            tracing::info!(path = %path.display(), "animation saved");
        }

        Ok(bytes)
    }

    /// Fan out independent generation requests over a bounded worker pool.
    ///
    /// At most `max_workers` requests are in flight at a time; as soon as one
    /// finishes the next queued prompt starts. Failures stay per-prompt: one
    /// bad generation never cancels the rest. The result map holds exactly
    /// one entry per distinct prompt (duplicates collapse, last write wins).
    pub async fn batch_generate(
        &self,
        prompts: &[String],
        max_workers: usize,
    ) -> HashMap<String, Result<Vec<u8>, ClientError>> {
        let workers = Arc::new(Semaphore::new(max_workers.max(1)));
        let jobs = prompts.iter().cloned().map(|prompt| {
            let client = self.clone();
            let workers = workers.clone();
            async move {
                // The pool semaphore is local to this call and never closed.
                let _slot = workers
                    .acquire_owned()
                    .await
                    .expect("worker pool semaphore closed");
                let outcome = client
                    .generate_animation(&prompt, &GenerationOptions::default())
                    .await;
                if let Err(err) = &outcome {
                    tracing::error!(prompt = %prompt, error = %err, "batch item failed");
                }
                (prompt, outcome)
            }
        });
        futures::future::join_all(jobs).await.into_iter().collect()
    }

    async fn expect_ok(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(ClientError::Api { status, detail })
    }
}

/// `animation_YYYYmmdd_HHMMSS_<prompt fragment>.gif`, matching what gallery
/// tooling expects to parse back out of the name.
fn animation_filename(prompt: &str) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let fragment: String = prompt
        .chars()
        .take(30)
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("animation_{stamp}_{fragment}.gif")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Json,
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
        Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(serde::Deserialize)]
    struct FakeParams {
        prompt: String,
    }

    /// Serves a fake animation endpoint that fails for prompts containing
    /// "unstable" and tracks peak request concurrency.
    async fn spawn_fake_server() -> (String, Arc<AtomicUsize>) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let peak_for_handler = peak.clone();
        let in_flight_for_handler = in_flight.clone();

        let app = Router::new()
            .route(
                "/health",
                get(|| async { Json(serde_json::json!({"status": "healthy", "error": null})) }),
            )
            .route(
                "/generate",
                post(move |Json(params): Json<FakeParams>| {
                    let in_flight = in_flight_for_handler.clone();
                    let peak = peak_for_handler.clone();
                    async move {
                        let running = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                        peak.fetch_max(running, Ordering::AcqRel);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::AcqRel);
                        if params.prompt.contains("unstable") {
                            (StatusCode::INTERNAL_SERVER_ERROR, "sampler diverged").into_response()
                        } else {
                            (StatusCode::OK, b"GIF89a-fake".to_vec()).into_response()
                        }
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), peak)
    }

    #[tokio::test]
    async fn health_round_trip() {
        let (base_url, _) = spawn_fake_server().await;
        let client = AnimationClient::new(base_url);
        let health = client.check_health().await.unwrap();
        assert_eq!(health["status"], "healthy");
    }

    #[tokio::test]
    async fn single_generation_saves_when_configured() {
        let (base_url, _) = spawn_fake_server().await;
        let dir = tempfile::tempdir().unwrap();
        let client = AnimationClient::new(base_url).with_output_dir(dir.path());

        let bytes = client
            .generate_animation("a red circle", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(bytes, b"GIF89a-fake");

        let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(saved.len(), 1);
        let name = saved[0].as_ref().unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(name.starts_with("animation_"));
        assert!(name.ends_with("_a_red_circle.gif"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_isolates_failures_and_bounds_workers() {
        let (base_url, peak) = spawn_fake_server().await;
        let client = AnimationClient::new(base_url);

        let prompts: Vec<String> = vec![
            "ocean waves".into(),
            "a cat".into(),
            "unstable gradients".into(),
            "a dragon".into(),
            "northern lights".into(),
        ];
        let results = client.batch_generate(&prompts, 2).await;

        assert_eq!(results.len(), 5);
        assert!(results["unstable gradients"].is_err());
        for prompt in ["ocean waves", "a cat", "a dragon", "northern lights"] {
            assert_eq!(results[prompt].as_deref().unwrap(), b"GIF89a-fake");
        }
        assert!(peak.load(Ordering::Acquire) <= 2);
    }

    #[tokio::test]
    async fn duplicate_prompts_collapse_to_one_entry() {
        let (base_url, _) = spawn_fake_server().await;
        let client = AnimationClient::new(base_url);
        let prompts: Vec<String> = vec!["a cat".into(), "a cat".into(), "a dog".into()];
        let results = client.batch_generate(&prompts, 2).await;
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn filenames_keep_a_sanitized_prompt_fragment() {
        let name = animation_filename("flowing liquid metal, rainbow!");
        assert!(name.starts_with("animation_"));
        assert!(name.ends_with("flowing_liquid_metal__rainbow_.gif"));
    }
}
