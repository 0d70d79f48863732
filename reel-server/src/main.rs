use anyhow::Result;
use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use reel_core::{GenerationParams, GenerationService, ProceduralLoader, ServiceConfig, ServiceError};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reel animation generation server")]
struct Args {
    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Maximum simultaneously executing generations
    #[arg(long, default_value_t = 2)]
    max_concurrent: usize,

    /// Maximum requests queued for a slot before rejection
    #[arg(long, default_value_t = 8)]
    max_queued: usize,

    /// Default guidance scale when the request omits it
    #[arg(long, default_value_t = 1.0)]
    guidance_scale: f64,

    /// Default inference step count when the request omits it
    #[arg(long, default_value_t = 4)]
    steps: u32,

    /// Default frame count when the request omits it
    #[arg(long, default_value_t = 32)]
    frames: u32,

    /// Directory animations are written to
    #[arg(long, default_value = "output/animations")]
    output_dir: PathBuf,
}

impl Args {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_concurrent: self.max_concurrent,
            max_queued: self.max_queued,
            default_guidance_scale: self.guidance_scale,
            default_inference_steps: self.steps,
            default_frames: self.frames,
            output_format: "gif".into(),
            output_dir: self.output_dir.clone(),
        }
    }
}

struct AppState {
    service: GenerationService,
    system: Mutex<System>,
}

impl AppState {
    fn memory_usage(&self) -> serde_json::Value {
        let mut system = self.system.lock().expect("system probe lock poisoned");
        system.refresh_memory();
        let used = system.used_memory();
        let total = system.total_memory();
        let percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        json!({
            "used_bytes": used,
            "total_bytes": total,
            "used_percent": percent,
        })
    }

    fn cpu_usage(&self) -> f32 {
        let mut system = self.system.lock().expect("system probe lock poisoned");
        system.refresh_cpu_usage();
        system.global_cpu_usage()
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.service.model_status();
    Json(json!({
        "status": if status.is_loaded { "healthy" } else { "unhealthy" },
        "error": status.error,
        "memory_usage": state.memory_usage(),
    }))
}

async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.service.model_status();
    Json(json!({
        "model_status": {
            "is_loaded": status.is_loaded,
            "error": status.error,
            "error_time": status.error_time,
            "config": state.service.config(),
            "pipeline": state.service.pipeline_descriptor(),
        },
        "system_info": {
            "cpu_percent": state.cpu_usage(),
            "memory_usage": state.memory_usage(),
            "load": {
                "in_flight": state.service.in_flight(),
                "queued": state.service.queued(),
            },
        },
    }))
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(params): Json<GenerationParams>,
) -> Response {
    match state.service.generate(params).await {
        Ok(result) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/gif")],
            result.bytes,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: ServiceError) -> Response {
    let (status, kind) = match &err {
        ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        ServiceError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        ServiceError::Overloaded => (StatusCode::TOO_MANY_REQUESTS, "overloaded"),
        ServiceError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "inference_failed"),
        ServiceError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_failed"),
    };
    let body = Json(json!({ "error": kind, "detail": err.to_string() }));
    (status, body).into_response()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let service = GenerationService::new(args.service_config(), Box::<ProceduralLoader>::default())?;

    // Eager first load, same as serving cold would do lazily. A failure is
    // remembered and retried by the first request.
    if let Err(err) = service.warm_up().await {
        tracing::warn!(error = %err, "model warm-up failed, will retry on first request");
    }

    let state = Arc::new(AppState {
        service,
        system: Mutex::new(System::new()),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/generate", post(generate_handler))
        .with_state(state);

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "started server");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
