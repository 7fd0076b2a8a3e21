//! Line OCR - document image recognition server.

mod config;
mod engine;
mod error;
mod normalize;
mod ocr;
mod orchestrator;
mod schema;
mod segment;
mod vocab;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::OcrConfig;
use engine::RecognitionEngine;
use error::OcrError;
use normalize::Normalizer;
use ocr::{sidecar::SidecarDetector, NoDetector, SequenceScorer, TextDetector};
use orchestrator::{EngineFactory, EnginePool, Orchestrator};
use schema::{
    BatchRequest, BatchResponse, ErrorResponse, ModelInfo, MultipleTextRequest,
    MultipleTextResponse, SingleTextRequest, SingleTextResponse,
};
use segment::LineGrouper;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vocab::Vocabulary;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    model_info: Arc<ModelInfo>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "line_ocr=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OcrConfig::from_env()?;
    let vocab = Arc::new(config.vocabulary());
    info!(
        "Canvas {}x{}, max_len {}, vocabulary of {} tokens",
        config.canvas_width,
        config.canvas_height,
        config.max_len,
        vocab.len()
    );

    let detector: Arc<dyn TextDetector> = match &config.detector_url {
        Some(url) => {
            info!("Using detector sidecar at {}", url);
            Arc::new(SidecarDetector::new(url.clone(), reqwest::Client::new()))
        }
        None => {
            warn!("DETECTOR_URL not set, recognizing whole images only");
            Arc::new(NoDetector)
        }
    };

    let engines = EnginePool::new(config.worker_count(), engine_factory(&config, &vocab))?;
    info!("Engine pool ready with {} engines", engines.size());

    let orchestrator = Orchestrator::new(
        Arc::clone(&detector),
        engines,
        LineGrouper::new(config.line_threshold),
        config.worker_timeout(),
    );

    let model_info = ModelInfo {
        model_type: "ONNX OCR Model".to_string(),
        model_path: config.model_path.display().to_string(),
        image_width: config.canvas_width,
        image_height: config.canvas_height,
        max_len: config.max_len,
        vocab_size: vocab.len(),
        workers: orchestrator.workers(),
        detector: detector.name().to_string(),
    };

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        model_info: Arc::new(model_info),
    };

    let app = Router::new()
        .route("/", get(hello))
        .route("/health", get(health))
        .route("/get_model_info", get(get_model_info))
        .route("/api/extract_single_text", post(extract_single_text))
        .route("/api/extract_multiple_text", post(extract_multiple_text))
        .route("/api/recognize_batch", post(recognize_batch))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024)) // 100MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str()).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Each call builds an engine around a freshly loaded scorer session.
fn engine_factory(config: &OcrConfig, vocab: &Arc<Vocabulary>) -> EngineFactory {
    let normalizer = Normalizer::new(config.canvas_width, config.canvas_height);
    let model_path = config.model_path.clone();
    let intra_threads = config.intra_threads;
    let max_len = config.max_len;
    let vocab = Arc::clone(vocab);

    Arc::new(move || -> anyhow::Result<RecognitionEngine> {
        let scorer = load_scorer(&model_path, intra_threads)?;
        Ok(RecognitionEngine::new(
            scorer,
            Arc::clone(&vocab),
            normalizer,
            max_len,
        ))
    })
}

#[cfg(feature = "onnx")]
fn load_scorer(model_path: &Path, intra_threads: usize) -> anyhow::Result<Box<dyn SequenceScorer>> {
    let scorer = ocr::onnx::OnnxScorer::from_file(model_path, intra_threads)?;
    Ok(Box::new(scorer))
}

#[cfg(not(feature = "onnx"))]
fn load_scorer(_model_path: &Path, _intra_threads: usize) -> anyhow::Result<Box<dyn SequenceScorer>> {
    anyhow::bail!("No scoring backend compiled in; rebuild with `--features onnx`")
}

// ============================================================================
// Handlers
// ============================================================================

async fn hello() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Hello" }))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

async fn get_model_info(State(state): State<AppState>) -> Json<ModelInfo> {
    Json((*state.model_info).clone())
}

/// Recognize one base64 image; `text` is the lines joined by spaces.
async fn extract_single_text(
    State(state): State<AppState>,
    Json(request): Json<SingleTextRequest>,
) -> Result<Json<SingleTextResponse>, ApiError> {
    let encoded = request
        .image_bytes
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| bad_request("No image provided"))?;

    let item = schema::job_item(uuid::Uuid::new_v4().to_string(), &encoded);
    let results = state
        .orchestrator
        .recognize_batch(vec![item])
        .await
        .map_err(api_error)?;

    let lines = results
        .first()
        .map(|r| schema::split_lines(&r.text))
        .unwrap_or_default();

    Ok(Json(SingleTextResponse {
        success: true,
        text: lines.join(" "),
        lines,
    }))
}

/// Recognize a list of base64 images in parallel.
async fn extract_multiple_text(
    State(state): State<AppState>,
    Json(request): Json<MultipleTextRequest>,
) -> Result<Json<MultipleTextResponse>, ApiError> {
    info!("extract_multiple_text: received {} images", request.image_bytes_list.len());
    if request.image_bytes_list.is_empty() {
        return Err(bad_request("No images provided"));
    }

    let items = request
        .image_bytes_list
        .iter()
        .enumerate()
        .map(|(idx, encoded)| schema::job_item(format!("image_{}", idx + 1), encoded))
        .collect();

    let results = state
        .orchestrator
        .recognize_batch(items)
        .await
        .map_err(api_error)?;

    let lines_arrays: Vec<Vec<String>> = results
        .iter()
        .map(|r| schema::split_lines(&r.text))
        .collect();
    let texts = lines_arrays.iter().map(|lines| lines.join(" ")).collect();

    Ok(Json(MultipleTextResponse {
        success: true,
        texts,
        lines_arrays,
    }))
}

/// Recognize caller-identified items; results keep submission order.
async fn recognize_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let items = request
        .items
        .into_iter()
        .map(|item| schema::job_item(item.id, &item.image_bytes))
        .collect();

    let results = state
        .orchestrator
        .recognize_batch(items)
        .await
        .map_err(api_error)?;

    Ok(Json(BatchResponse {
        success: true,
        results,
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

fn api_error(err: OcrError) -> ApiError {
    match err {
        OcrError::EmptyBatch => bad_request("No images provided"),
        other => {
            error!("Recognition failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(other.to_string())),
            )
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, starting graceful shutdown...");
}
