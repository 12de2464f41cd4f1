//! `genbridge-worker` -- serverless generation worker.
//!
//! Bridges a queue-based invocation host to a locally running
//! ComfyUI-compatible generation server: stages inline inputs, submits
//! workflows, polls for completion, and returns the produced artifact
//! inline as base64.
//!
//! # Environment variables
//!
//! | Variable                               | Required | Default                 |
//! |----------------------------------------|----------|-------------------------|
//! | `QUEUE_URL`                            | yes      | --                      |
//! | `COMFYUI_URL`                          | no       | `http://127.0.0.1:8188` |
//! | `OUTPUT_IMAGE_FORMAT`                  | no       | `JPEG`                  |
//! | `OUTPUT_IMAGE_QUALITY`                 | no       | `82`                    |
//! | `COMFY_INPUT_DIR`                      | no       | `/comfyui/input`        |
//! | `COMFY_OUTPUT_DIR`                     | no       | `/comfyui/output`       |
//! | `OUTPUT_CLEANUP_MAX_AGE_SECONDS`       | no       | `3600`                  |
//! | `OUTPUT_CLEANUP_MIN_INTERVAL_SECONDS`  | no       | `300`                   |
//! | `INPUT_IMAGE_MAX_BYTES`                | no       | `15728640`              |
//! | `EXPECTED_MODEL_PATHS`                 | no       | (empty)                 |

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genbridge_comfyui::api::ComfyUIApi;
use genbridge_comfyui::probe::{wait_until_ready, DEFAULT_READY_ATTEMPTS, DEFAULT_READY_DELAY};
use genbridge_worker::config::WorkerConfig;
use genbridge_worker::diagnostics::{
    check_expected_models, log_startup_summary, MODEL_ROOT_CANDIDATES,
};
use genbridge_worker::handler::Worker;
use genbridge_worker::host::{self, HostQueue};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genbridge_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let queue_url = std::env::var("QUEUE_URL").unwrap_or_else(|_| {
        tracing::error!("QUEUE_URL environment variable is required");
        std::process::exit(1);
    });

    let config = WorkerConfig::from_env();
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        queue_url = %queue_url,
        output_format = ?config.output_format,
        "Starting genbridge-worker",
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let api = ComfyUIApi::new(config.comfyui_url.clone());

    if !wait_until_ready(&api, DEFAULT_READY_ATTEMPTS, DEFAULT_READY_DELAY, &cancel).await {
        if cancel.is_cancelled() {
            return;
        }
        tracing::warn!("ComfyUI did not become ready before worker start");
    }

    let roots: Vec<&Path> = MODEL_ROOT_CANDIDATES.iter().map(|p| Path::new(p)).collect();
    let model_check = check_expected_models(&roots, &config.expected_model_paths);
    log_startup_summary(&config.input_dir, &config.output_dir, &model_check);

    let mut worker = Worker::new(api, config);
    worker.force_cleanup();

    let queue = HostQueue::new(queue_url);
    host::run(&queue, &mut worker, &cancel).await;
}
