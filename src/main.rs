//! Structured OCR - upload a document, get back OCR text plus an LLM-structured record.

mod config;
mod error;
mod extractor;
mod languages;
mod mistral;
mod ocr;
mod schema;
#[cfg(test)]
mod testing;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config::ServiceConfig;
use error::OcrError;
use extractor::Extractor;
use mistral::MistralClient;
use schema::StructuredResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const API_KEY_HEADER: &str = "x-api-key";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    extractor: Extractor,
    temp_root: Option<Arc<PathBuf>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "structured_ocr=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    if config.default_api_key.is_none() {
        warn!("MISTRAL_API_KEY not set; requests must send an X-API-Key header");
    }

    info!("Language table ready: {} languages", languages::count());

    let mistral = MistralClient::new(reqwest::Client::new(), config.api_url.clone());
    info!("Mistral client initialized ({})", config.api_url);

    let state = AppState {
        extractor: Extractor::new(
            Arc::new(mistral),
            config.models.clone(),
            config.default_api_key.clone(),
        ),
        temp_root: config.temp_root.clone().map(Arc::new),
    };

    let app = router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/structured-ocr", post(structured_ocr))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    api: &'static str,
}

/// Health check endpoint. Never touches the provider.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        api: "Structured OCR Service",
    })
}

/// Error body returned to clients: `{"detail": "..."}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

/// Keeps the multipart status, so an over-limit body is 413 rather than 400.
impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            detail: format!("Multipart error: {}", err.body_text()),
        }
    }
}

impl From<OcrError> for ApiError {
    fn from(err: OcrError) -> Self {
        Self {
            status: err.status_code(),
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

/// Upload a document and return its structured OCR record.
async fn structured_ocr(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<StructuredResult>, ApiError> {
    let mut multipart = multipart?;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = upload_file_name(field.file_name());
            let data = field.bytes().await?;
            upload = Some((filename, data.to_vec()));
            break;
        }
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("structured_ocr", %request_id, file = %filename);

    process_upload(&state, &filename, &data, api_key)
        .instrument(span)
        .await
        .map(Json)
}

/// Save the upload, run the pipeline, and always remove the temp files.
async fn process_upload(
    state: &AppState,
    filename: &str,
    data: &[u8],
    api_key: Option<&str>,
) -> Result<StructuredResult, ApiError> {
    info!("Received file: {} ({} bytes)", filename, data.len());

    let temp_root = state.temp_root.as_deref().map(PathBuf::as_path);
    let saved = SavedUpload::write(temp_root, filename, data)
        .await
        .map_err(|e| {
            error!(kind = e.kind(), "Failed to save upload: {}", e);
            ApiError::from(e)
        })?;

    let result = state.extractor.extract(saved.path(), api_key).await;
    saved.close();

    match result {
        Ok(structured) => {
            info!("Structured OCR complete: {} topics", structured.topics.len());
            Ok(structured)
        }
        Err(e) => {
            error!(kind = e.kind(), "Structured OCR failed: {}", e);
            Err(e.into())
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Keep only the final path component of a client-supplied file name.
fn upload_file_name(raw: Option<&str>) -> String {
    raw.and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// Upload written into its own temp directory; both are removed on close or drop.
struct SavedUpload {
    dir: TempDir,
    path: PathBuf,
}

impl SavedUpload {
    async fn write(root: Option<&Path>, filename: &str, data: &[u8]) -> Result<Self, OcrError> {
        let dir = match root {
            Some(root) => TempDir::new_in(root)?,
            None => TempDir::new()?,
        };
        let path = dir.path().join(filename);
        tokio::fs::write(&path, data).await?;
        Ok(Self { dir, path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn close(self) {
        let dir = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove temp dir {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Models;
    use crate::testing::{FakeMistral, PNG_BYTES};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOUNDARY: &str = "structured-ocr-test-boundary";

    struct Harness {
        app: Router,
        fake: Arc<FakeMistral>,
        temp_root: TempDir,
    }

    fn harness(fake: FakeMistral, env_key: Option<&str>) -> Harness {
        harness_with_limit(fake, env_key, 10 * 1024 * 1024)
    }

    fn harness_with_limit(fake: FakeMistral, env_key: Option<&str>, max_upload_bytes: usize) -> Harness {
        let fake = Arc::new(fake);
        let temp_root = tempfile::tempdir().unwrap();
        let state = AppState {
            extractor: Extractor::new(fake.clone(), Models::default(), env_key.map(String::from)),
            temp_root: Some(Arc::new(temp_root.path().to_path_buf())),
        };
        Harness {
            app: router(state, max_upload_bytes),
            fake,
            temp_root,
        }
    }

    impl Harness {
        fn temp_entries(&self) -> usize {
            std::fs::read_dir(self.temp_root.path()).unwrap().count()
        }
    }

    fn upload_request(field: &str, filename: &str, data: &[u8], api_key: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/structured-ocr")
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY));
        if let Some(key) = api_key {
            builder = builder.header("X-API-Key", key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(FakeMistral::new(), None);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy", "api": "Structured OCR Service"}));
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_image_upload_succeeds_and_cleans_up() {
        let h = harness(FakeMistral::new(), None);
        let request = upload_request("file", "x.png", PNG_BYTES, Some("sk-header"));

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "file_name": "x.png",
                "topics": ["greeting"],
                "languages": ["English"],
                "ocr_contents": {"greeting": "Hello World"},
                "raw_markdown": "Hello World"
            })
        );
        assert_eq!(h.temp_entries(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_400() {
        let h = harness(FakeMistral::new(), Some("sk-env"));
        let request = upload_request("attachment", "x.png", PNG_BYTES, None);

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "No file provided");
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_json_400() {
        let h = harness(FakeMistral::new(), Some("sk-env"));
        let request = Request::builder()
            .method("POST")
            .uri("/api/structured-ocr")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"file":"x.png"}"#))
            .unwrap();

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body["detail"].as_str().unwrap().is_empty());
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_json_413() {
        let h = harness_with_limit(FakeMistral::new(), Some("sk-env"), 1024);
        let request = upload_request("file", "big.png", &[0u8; 4096], None);

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["detail"].as_str().unwrap().starts_with("Multipart error"));
        assert!(h.fake.calls().is_empty());
        assert_eq!(h.temp_entries(), 0);
    }

    #[tokio::test]
    async fn test_missing_key_is_401_without_network() {
        let h = harness(FakeMistral::new(), None);
        let request = upload_request("file", "x.png", PNG_BYTES, None);

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Mistral API key not provided");
        assert!(h.fake.calls().is_empty());
        assert_eq!(h.temp_entries(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_format_is_500() {
        let h = harness(FakeMistral::new(), Some("sk-env"));
        let request = upload_request("file", "notes.txt", b"plain text", None);

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Unsupported file format: .txt");
        assert!(h.fake.calls().is_empty());
        assert_eq!(h.temp_entries(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_500_and_cleans_up() {
        let h = harness(FakeMistral::new().failing_upload(), Some("sk-env"));
        let request = upload_request("file", "report.pdf", b"%PDF-1.4", None);

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("file upload"));
        assert_eq!(h.temp_entries(), 0);
    }

    #[tokio::test]
    async fn test_pdf_upload_joins_pages() {
        let fake = FakeMistral::new().with_pages(&["A", "B"]);
        let h = harness(fake, Some("sk-env"));
        let request = upload_request("file", "two-pages.pdf", b"%PDF-1.4", None);

        let (status, body) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["raw_markdown"], "A\n\nB");
        assert_eq!(h.temp_entries(), 0);
    }

    #[tokio::test]
    async fn test_traversal_in_filename_stays_in_temp_dir() {
        let h = harness(FakeMistral::new(), Some("sk-env"));
        let request = upload_request("file", "../../escape.png", PNG_BYTES, None);

        let (status, _) = send(h.app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.temp_entries(), 0);
        assert!(!h.temp_root.path().parent().unwrap().join("escape.png").exists());
    }

    #[test]
    fn test_upload_file_name() {
        assert_eq!(upload_file_name(Some("scan.png")), "scan.png");
        assert_eq!(upload_file_name(Some("/etc/passwd")), "passwd");
        assert_eq!(upload_file_name(Some("../")), "upload");
        assert_eq!(upload_file_name(None), "upload");
    }
}
