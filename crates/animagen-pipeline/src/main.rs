//! Batch pipeline daemon binary.
//!
//! Recovers incomplete jobs from the checkpoint directory and keeps the
//! pipeline running until interrupted. Live jobs are driven entirely by the
//! in-process queues; the (external) API layer talks to the same
//! `BatchPipeline` handle.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use animagen_pipeline::{BatchPipeline, FileJobStore, PipelineConfig, StageRunner};
use animagen_providers::{GenerationProvider, HttpProvider, MockProvider};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("animagen=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting animagend");

    let config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let provider: Arc<dyn GenerationProvider> = match std::env::var("ANIMAGEN_PROVIDER").as_deref()
    {
        Ok("mock") | Err(_) => {
            info!("Using mock provider (set ANIMAGEN_PROVIDER=http for a real endpoint)");
            Arc::new(MockProvider::new())
        }
        Ok(_) => match HttpProvider::from_env() {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                error!("Failed to configure HTTP provider: {}", e);
                std::process::exit(1);
            }
        },
    };

    let mut runner = StageRunner::new(provider, config.poll);
    if let Some(dir) = &config.artifact_dir {
        runner = runner.with_artifact_dir(dir);
    }
    let store = Arc::new(FileJobStore::new(&config.checkpoint_dir));

    let pipeline = BatchPipeline::new(Arc::new(runner), store, &config.concurrency);

    match pipeline.recover().await {
        Ok(count) => info!(count, "startup recovery finished"),
        Err(e) => {
            error!("Recovery failed: {}", e);
            std::process::exit(1);
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    pipeline.shutdown();
    info!("Pipeline shutdown complete");
}
