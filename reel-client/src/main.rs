use anyhow::Result;
use clap::Parser;
use reel_client::{AnimationClient, GenerationOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reel animation client")]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8000")]
    server: String,

    /// Directory generated animations are saved to
    #[arg(long, default_value = "generated_animations")]
    output_dir: PathBuf,

    /// Worker bound for batch generation
    #[arg(long, default_value_t = 3)]
    max_workers: usize,

    /// Prompts to generate; a small sample set is used when omitted
    prompts: Vec<String>,
}

fn sample_prompts() -> Vec<String> {
    [
        "a cherry blossom tree swaying in the wind, anime style",
        "ocean waves crashing on a beach at sunset",
        "a cat playing with a ball of yarn, cartoon style",
        "northern lights dancing in the night sky",
        "a space station orbiting a nebula",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let client = AnimationClient::new(&args.server).with_output_dir(&args.output_dir);

    let health = client.check_health().await?;
    tracing::info!(health = %health, "server health");

    let info = client.get_info().await?;
    tracing::info!(info = %info, "server info");

    let prompts = if args.prompts.is_empty() {
        sample_prompts()
    } else {
        args.prompts.clone()
    };

    // Exercise the single-request path first, then fan the rest out.
    let first = &prompts[0];
    let bytes = client
        .generate_animation(first, &GenerationOptions::default())
        .await?;
    tracing::info!(prompt = %first, bytes = bytes.len(), "single generation complete");

    let results = client.batch_generate(&prompts, args.max_workers).await;
    let succeeded = results.values().filter(|r| r.is_ok()).count();
    tracing::info!(
        succeeded,
        total = results.len(),
        "batch generation complete"
    );

    Ok(())
}
