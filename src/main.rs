// Main entry point for the phone number scanning workflow

use phone_scan::{
    core::{Config, types::WorkItem},
    orchestration::{LogObserver, ScanOrchestrator},
    services::{archive, export, GeminiClient},
    utils::{metrics::Metrics, mime},
    ScanReport,
};

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<ScanOrchestrator>,
    metrics: Metrics,
    /// One scan at a time; concurrent submissions get a 409.
    scan_in_flight: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "phone_scan={}",
        match config.server.log_level {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== PHONE NUMBER SCANNER ===");
    info!(
        "Config: keys={} model={} batch_size={} retry_rounds={}",
        config.api.api_keys.len(),
        config.api.model,
        config.batch.batch_size,
        config.batch.retry_rounds,
    );

    // Initialize metrics
    let metrics = Metrics::new();

    // Initialize scan orchestrator
    let extractor = Arc::new(GeminiClient::new(config.api.model.clone())?);
    let orchestrator = Arc::new(ScanOrchestrator::new(
        config.clone(),
        extractor,
        metrics.clone(),
    )?);
    let state = AppState {
        config: config.clone(),
        orchestrator,
        metrics,
        scan_in_flight: Arc::new(AtomicBool::new(false)),
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create router with monitoring endpoints
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/keys", get(health_keys))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/scan", post(scan_images))
        .with_state(state)
        .layer(DefaultBodyLimit::max(200 * 1024 * 1024)) // 200MB for large uploads
        .layer(cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /            - Root endpoint");
    info!("  GET  /health      - Health check");
    info!("  GET  /health/keys - API key pool status");
    info!("  GET  /metrics     - Prometheus metrics");
    info!("  GET  /stats       - Detailed statistics");
    info!("  POST /scan        - Scan images (multipart/form-data)");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root(State(state): State<AppState>) -> &'static str {
    state.metrics.record_endpoint_request("/");
    "Phone Number Scanning Workflow"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/health");
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API key pool status endpoint
async fn health_keys(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/health/keys");
    let stats = state.orchestrator.key_stats();
    let limited = stats.iter().filter(|s| s.limited).count();
    Json(serde_json::json!({
        "status": if limited < stats.len() { "healthy" } else { "exhausted" },
        "total_keys": stats.len(),
        "limited_keys": limited,
        "keys": stats,
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.record_endpoint_request("/metrics");
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state.metrics.record_endpoint_request("/stats");
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

#[derive(Serialize)]
struct ScanResponse {
    report: ScanReport,
    exported_count: usize,
    export: String,
}

/// Clears the in-flight flag when the handler exits, on any path.
struct ScanGuard(Arc<AtomicBool>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scan images endpoint
///
/// # Request Format:
/// - multipart/form-data
/// - Field "images": image files (JPEG/PNG/WebP/GIF/BMP)
/// - Field "archives": ZIP archives, expanded to their contained images
/// - Field "prompt" (optional): overrides the configured extraction prompt
/// - Field "format" (optional): export format, "text" (default) or "table"
///
/// # Response:
/// - ScanResponse JSON with the full report and the export payload
async fn scan_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ScanResponse>, (StatusCode, String)> {
    state.metrics.record_endpoint_request("/scan");

    if state
        .scan_in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        state.metrics.record_scan_rejected();
        return Err((
            StatusCode::CONFLICT,
            "A scan is already running; retry after it finishes".to_string(),
        ));
    }
    let _guard = ScanGuard(state.scan_in_flight.clone());

    info!("Received scan request");

    let mut items: Vec<WorkItem> = Vec::new();
    let mut prompt_override: Option<String> = None;
    let mut format = export::ExportFormat::Text;

    // Parse multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "images" => {
                let filename = field.file_name().unwrap_or("unknown.jpg").to_string();
                let declared = field.content_type().map(str::to_string);

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;

                let mime_type = declared
                    .filter(|ct| ct.starts_with("image/"))
                    .unwrap_or_else(|| mime::from_name(&filename).to_string());
                if !mime_type.starts_with("image/") {
                    warn!(file = %filename, "Skipping upload that is not an image");
                    continue;
                }

                items.push(WorkItem::new(filename, mime_type, data.to_vec()));
            }
            "archives" => {
                let filename = field.file_name().unwrap_or("archive.zip").to_string();

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;

                if archive::is_zip_name(&filename) {
                    items.extend(archive::expand_zip(&filename, &data));
                } else if archive::is_rar_name(&filename) {
                    warn!(file = %filename, "RAR archives are not supported, skipping");
                } else {
                    warn!(file = %filename, "Unrecognized archive type, skipping");
                }
            }
            "prompt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
                if !text.trim().is_empty() {
                    prompt_override = Some(text);
                }
            }
            "format" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
                format = export::ExportFormat::parse(&text).ok_or((
                    StatusCode::BAD_REQUEST,
                    format!("Unknown export format '{}'", text.trim()),
                ))?;
            }
            _ => {}
        }
    }

    if items.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "No scannable images in request".to_string(),
        ));
    }

    info!(items = items.len(), "Starting scan");
    let report = state
        .orchestrator
        .scan(items, prompt_override.as_deref(), &LogObserver)
        .await;

    let exported = export::filter_valid(&report.extractions);
    let exported_count = exported.len();
    let export = export::render(&report.extractions, format);

    info!(
        extracted = report.extractions.len(),
        exported = exported_count,
        failed = report.failed.len(),
        "Scan finished"
    );

    Ok(Json(ScanResponse {
        report,
        exported_count,
        export,
    }))
}
