use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    batch::{BatchProcessor, list_supported_files},
    error::PipelineError,
    models::{BatchReport, BatchRequest},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<BatchProcessor>,
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub folder: String,
}

pub fn create_app(processor: BatchProcessor) -> Router {
    let app_state = AppState {
        processor: Arc::new(processor),
    };
    build_router(app_state)
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/process", post(process_batch))
        .route("/files", get(list_files))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Medical Records Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Turns scanned medical documents into CSV tables ready for database import",
        "endpoints": {
            "POST /process": "Process selected files for a patient",
            "GET /files?folder=<dir>": "List supported documents in a folder",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn process_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<BatchReport> {
    info!(
        "Processing {} files for patient {}",
        request.selected_files.len(),
        request.patient_id
    );

    match state.processor.process(&request).await {
        Ok(report) => Ok(Json(report)),
        Err(e @ PipelineError::Validation(_)) => Err(bad_request_error(&e.to_string())),
        Err(e) => {
            error!("Batch processing failed: {}", e);
            Err(internal_error("Batch processing failed", &e.to_string()))
        }
    }
}

async fn list_files(Query(query): Query<FilesQuery>) -> ApiResult<Value> {
    let folder = Path::new(query.folder.trim());
    if query.folder.trim().is_empty() || !folder.is_dir() {
        return Err(bad_request_error("Folder does not exist"));
    }

    let files = list_supported_files(folder).map_err(|e| {
        error!("Failed to list {}: {}", folder.display(), e);
        internal_error("Failed to list files", &e.to_string())
    })?;

    Ok(Json(json!({
        "folder": folder.display().to_string(),
        "files": files
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{StructuredExtractionService, StructuredExtractor, TextRecognizer};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    struct Offline;

    #[async_trait]
    impl StructuredExtractionService for Offline {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("offline")
        }
    }

    #[async_trait]
    impl TextRecognizer for Offline {
        async fn recognize(&self, _path: &Path) -> anyhow::Result<String> {
            Ok("Phone 555-123-4567".to_string())
        }
    }

    fn app() -> Router {
        create_app(BatchProcessor::new(
            Arc::new(Offline),
            StructuredExtractor::new(Arc::new(Offline)),
        ))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_invalid_batch_is_bad_request() {
        let body = json!({
            "patient_id": "not valid!",
            "output_folder": "",
            "selected_files": []
        });
        let response = app()
            .oneshot(
                Request::post("/process")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = body_json(response).await["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("Processing requirements not met: "));
    }

    #[tokio::test]
    async fn test_process_returns_report() {
        let dir = tempfile::tempdir().unwrap();
        let scan = dir.path().join("scan.png");
        std::fs::write(&scan, b"png").unwrap();

        let body = json!({
            "patient_id": "patient-001",
            "output_folder": dir.path().display().to_string(),
            "selected_files": [scan.display().to_string()]
        });
        let response = app()
            .oneshot(
                Request::post("/process")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["processed_files"], 1);
        assert_eq!(report["csv_files_created"], json!(["patients_registration.csv"]));
    }

    #[tokio::test]
    async fn test_files_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scan.jpg"), b"jpg").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"md").unwrap();

        let uri = format!("/files?folder={}", dir.path().display());
        let response = app()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing["files"].as_array().unwrap().len(), 1);
        assert_eq!(listing["files"][0]["name"], "scan.jpg");

        let response = app()
            .oneshot(
                Request::get("/files?folder=/definitely/not/here")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
