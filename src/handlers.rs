//! HTTP surface: one handler per capability plus static file serving.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::codec::{decode_data_url, encode_data_url, mime_type};
use crate::config::{Config, BODY_LIMIT_BYTES};
use crate::enhance;
use crate::error::{AppError, Result};
use crate::ocr::{self, EnginePool, OcrResult};
use crate::pdf::{self, PdfOptions};
use crate::temp_file::with_temp_file;
use crate::uploads::{self, UploadRecord};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ocr: Arc<EnginePool>,
}

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    let public = ServeDir::new(&state.config.public_dir);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/upload", post(upload))
        .route("/api/ocr", post(ocr_image))
        .route("/api/pdf", post(create_pdf))
        .route("/api/enhance", post(enhance_image))
        .route("/api/batch", post(batch_ocr))
        .nest_service("/uploads", uploads)
        .fallback_service(public)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Request / response bodies
// ============================================================================

/// JSON body extractor whose failures go through [`AppError`].
///
/// A body sent without a JSON content type is read as an empty object, so the
/// handler reports the missing field instead of a media-type error.
struct AppJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(JsonRejection::MissingJsonContentType(_)) => {
                serde_json::from_value(Value::Object(Default::default()))
                    .map(AppJson)
                    .map_err(|e| AppError::Body(e.to_string()))
            }
            Err(rejection) => Err(rejection.into()),
        }
    }
}

#[derive(Deserialize)]
struct ImageRequest {
    image: Option<String>,
}

#[derive(Deserialize)]
struct ImagesRequest {
    images: Option<Vec<String>>,
    #[serde(default)]
    options: Option<Value>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    file: UploadRecord,
}

#[derive(Serialize)]
struct OcrResponse {
    success: bool,
    #[serde(flatten)]
    result: OcrResult,
}

#[derive(Serialize)]
struct EnhanceResponse {
    success: bool,
    image: String,
}

#[derive(Serialize)]
struct BatchItem {
    index: usize,
    text: String,
}

#[derive(Serialize)]
struct BatchResponse {
    success: bool,
    results: Vec<BatchItem>,
}

fn require_image(image: Option<String>) -> Result<String> {
    image
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::validation("No image provided"))
}

fn require_images(images: Option<Vec<String>>) -> Result<Vec<String>> {
    images
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::validation("No images provided"))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        message: "RiCPDF Backend is running",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

/// Store a multipart `image` field under the upload directory.
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let mut received = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("image") {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::validation(format!("Failed to read file: {}", e)))?;
            received = Some((filename, data));
            break;
        }
    }

    // A zero-byte part is still an upload
    let (filename, file_data) = received.ok_or_else(|| AppError::validation("No file uploaded"))?;

    let file = uploads::save_upload(&state.config.upload_dir, &filename, &file_data).await?;
    Ok(Json(UploadResponse {
        success: true,
        file,
    }))
}

/// Recognize one image, written to a scoped temp file for the engine.
async fn recognize_data_url(state: &AppState, data_url: &str, index: usize) -> Result<OcrResult> {
    let bytes = decode_data_url(data_url)?;
    let pool = state.ocr.clone();
    with_temp_file(&state.config.temp_dir, "temp", index, &bytes, |path| async move {
        ocr::recognize(&pool, &path).await
    })
    .await
}

async fn ocr_image(State(state): State<AppState>, AppJson(req): AppJson<ImageRequest>) -> Result<Json<OcrResponse>> {
    let image = require_image(req.image)?;
    debug!("OCR request: {}", mime_type(&image).unwrap_or("untyped payload"));
    let result = recognize_data_url(&state, &image, 0).await?;

    info!("OCR complete: {} chars", result.text.chars().count());
    Ok(Json(OcrResponse {
        success: true,
        result,
    }))
}

async fn create_pdf(State(state): State<AppState>, AppJson(req): AppJson<ImagesRequest>) -> Result<Response> {
    let images = require_images(req.images)?;
    let options = PdfOptions::from_json(req.options.as_ref());

    let body = pdf::assemble(&images, &options, &state.config.temp_dir).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (header::CONTENT_DISPOSITION, "attachment; filename=document.pdf"),
        ],
        body,
    )
        .into_response())
}

async fn enhance_image(AppJson(req): AppJson<ImageRequest>) -> Result<Json<EnhanceResponse>> {
    let image = require_image(req.image)?;
    let bytes = decode_data_url(&image)?;

    let enhanced = tokio::task::spawn_blocking(move || enhance::enhance(&bytes)).await??;

    Ok(Json(EnhanceResponse {
        success: true,
        image: encode_data_url(&enhanced, "image/jpeg"),
    }))
}

/// OCR every image in order. The first failure fails the whole batch.
async fn batch_ocr(State(state): State<AppState>, AppJson(req): AppJson<ImagesRequest>) -> Result<Json<BatchResponse>> {
    let images = req
        .images
        .ok_or_else(|| AppError::validation("No images provided"))?;

    let mut results = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let result = recognize_data_url(&state, image, index).await?;
        results.push(BatchItem {
            index,
            text: result.text,
        });
    }

    info!("Batch OCR complete: {} image(s)", results.len());
    Ok(Json(BatchResponse {
        success: true,
        results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::FakeFactory;
    use axum::body::{to_bytes, Body, Bytes};
    use axum::http::{Request, StatusCode};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        dir: TempDir,
    }

    fn test_app(factory: FakeFactory) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.temp_dir = dir.path().join("tmp");
        config.upload_dir = dir.path().join("uploads");
        config.public_dir = dir.path().join("public");
        std::fs::create_dir_all(&config.temp_dir).unwrap();

        let state = AppState {
            config: Arc::new(config),
            ocr: Arc::new(EnginePool::new(Arc::new(factory), "ind", 1)),
        };
        TestApp {
            router: router(state),
            dir,
        }
    }

    fn jpeg_data_url(width: u32, height: u32, color: [u8; 3]) -> String {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg).unwrap();
        encode_data_url(&buf, "image/jpeg")
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Response<Body>) {
        let resp = router.clone().oneshot(req).await.unwrap();
        (resp.status(), resp)
    }

    async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, resp) = send(router, req).await;
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn post_raw(router: &Router, uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut req = Request::post(uri);
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        let (status, resp) = send(router, req.body(Body::from(body.to_string())).unwrap()).await;
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn temp_files_left(app: &TestApp) -> usize {
        std::fs::read_dir(app.dir.path().join("tmp")).unwrap().count()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(FakeFactory::default());
        let (status, resp) = send(&app.router, Request::get("/api/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let body: Value = serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["status"], "OK");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_ocr_blank_pixel() {
        let app = test_app(FakeFactory {
            text: Some(String::new()),
            ..Default::default()
        });
        let (status, body) = post_json(
            &app.router,
            "/api/ocr",
            json!({ "image": jpeg_data_url(1, 1, [0, 0, 0]) }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "text": "", "confidence": "high" }));
        assert_eq!(temp_files_left(&app), 0);
    }

    #[tokio::test]
    async fn test_ocr_missing_image() {
        let app = test_app(FakeFactory::default());
        let (status, body) = post_json(&app.router, "/api/ocr", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "No image provided" }));
    }

    #[tokio::test]
    async fn test_ocr_without_content_type_reports_missing_image() {
        let app = test_app(FakeFactory::default());
        let (status, body) = post_raw(&app.router, "/api/ocr", None, "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "No image provided" }));
    }

    #[tokio::test]
    async fn test_ocr_wrong_field_type_is_json_error() {
        let app = test_app(FakeFactory::default());
        let (status, body) = post_raw(&app.router, "/api/ocr", Some("application/json"), r#"{"image":5}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Invalid request body");
        assert!(body["message"].as_str().unwrap().contains("invalid type"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_json_error() {
        let app = test_app(FakeFactory::default());
        for uri in ["/api/ocr", "/api/pdf", "/api/enhance", "/api/batch"] {
            let (status, body) = post_raw(&app.router, uri, Some("application/json"), "{not json").await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{}", uri);
            assert_eq!(body["error"], "Invalid request body", "{}", uri);
            assert!(body["message"].is_string(), "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_ocr_engine_failure_is_500() {
        let app = test_app(FakeFactory::default());
        let fail = encode_data_url(b"FAIL: engine should reject this", "image/jpeg");
        let (status, body) = post_json(&app.router, "/api/ocr", json!({ "image": fail })).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "OCR failed");
        assert!(body["message"].as_str().unwrap().contains("fake engine rejected"));
        assert_eq!(temp_files_left(&app), 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let app = test_app(FakeFactory::default());
        let images: Vec<String> = (1..=4)
            .map(|n| encode_data_url(&vec![b'x'; n], "image/png"))
            .collect();
        let (status, body) = post_json(&app.router, "/api/batch", json!({ "images": images })).await;

        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 4);
        for (i, item) in results.iter().enumerate() {
            assert_eq!(item["index"], i);
            assert_eq!(item["text"], format!("{} bytes", i + 1));
        }
    }

    #[tokio::test]
    async fn test_batch_single_bad_image_fails_everything() {
        // Known limitation: one malformed image aborts the batch, no partial results.
        let app = test_app(FakeFactory::default());
        let good = jpeg_data_url(4, 4, [255, 255, 255]);
        let images = json!([good, good, "data:image/jpeg;base64,%%%corrupt%%%", good]);
        let (status, body) = post_json(&app.router, "/api/batch", json!({ "images": images })).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("results").is_none());
        assert_eq!(body["error"], "Invalid image data");
        assert_eq!(temp_files_left(&app), 0);
    }

    #[tokio::test]
    async fn test_batch_missing_images() {
        let app = test_app(FakeFactory::default());
        let (status, body) = post_json(&app.router, "/api/batch", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No images provided");
    }

    #[tokio::test]
    async fn test_enhance_returns_jpeg_data_url() {
        let app = test_app(FakeFactory::default());
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb([20, 200, 90])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let (status, body) = post_json(
            &app.router,
            "/api/enhance",
            json!({ "image": encode_data_url(&png, "image/png") }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let url = body["image"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let bytes = decode_data_url(url).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_pdf_two_pages_default_options() {
        let app = test_app(FakeFactory::default());
        let images = json!([jpeg_data_url(40, 60, [0, 0, 0]), jpeg_data_url(60, 40, [255, 0, 0])]);
        let req = Request::post("/api/pdf")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "images": images }).to_string()))
            .unwrap();

        let (status, resp) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=document.pdf"
        );

        let pdf = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let boxes = crate::pdf::tests::media_boxes(&pdf);
        assert_eq!(boxes.len(), 2);
        for b in &boxes {
            assert!((b[2] - 595.28).abs() < 0.01 && (b[3] - 841.89).abs() < 0.01);
        }

        // Each image sits in the 500x700 box at the default 50pt margin
        let transforms = crate::pdf::tests::image_transforms(&pdf);
        assert_eq!(transforms.len(), 2);
        for t in &transforms {
            let (w, h, x, y) = (t[0], t[3], t[4], t[5]);
            assert!((x - (50.0 + (500.0 - w) / 2.0)).abs() < 0.01, "x = {}", x);
            let top = 841.89 - (y + h);
            assert!((top - (50.0 + (700.0 - h) / 2.0)).abs() < 0.01, "top = {}", top);
        }
        // 40x60 fills the box height; 60x40 fills its width
        assert!((transforms[0][3] - 700.0).abs() < 0.01);
        assert!((transforms[1][0] - 500.0).abs() < 0.01);
        assert!((transforms[1][4] - 50.0).abs() < 0.01);
        assert_eq!(temp_files_left(&app), 0);
    }

    #[tokio::test]
    async fn test_pdf_requires_images() {
        let app = test_app(FakeFactory::default());
        let (status, body) = post_json(&app.router, "/api/pdf", json!({ "images": [] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No images provided");
    }

    #[tokio::test]
    async fn test_pdf_bad_image_is_json_error_not_truncated_pdf() {
        let app = test_app(FakeFactory::default());
        let images = json!([jpeg_data_url(10, 10, [1, 2, 3]), "data:image/png;base64,AAAA"]);
        let (status, body) = post_json(&app.router, "/api/pdf", json!({ "images": images })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Image processing failed");
    }

    fn multipart_request(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let boundary = "ricpdf-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                b = boundary
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_serve() {
        let app = test_app(FakeFactory::default());
        let (status, resp) = send(&app.router, multipart_request("image", "page.jpg", b"scanned")).await;
        assert_eq!(status, StatusCode::OK);

        let body: Value = serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["file"]["size"], 7);
        let filename = body["file"]["filename"].as_str().unwrap().to_string();
        assert!(filename.ends_with(".jpg"));

        let req = Request::get(format!("/uploads/{}", filename))
            .body(Body::empty())
            .unwrap();
        let (status, resp) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::OK);
        let served: Bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&served[..], b"scanned");
    }

    #[tokio::test]
    async fn test_upload_empty_file_is_stored() {
        let app = test_app(FakeFactory::default());
        let (status, resp) = send(&app.router, multipart_request("image", "e.jpg", b"")).await;
        assert_eq!(status, StatusCode::OK);

        let body: Value = serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["file"]["size"], 0);
        let path = body["file"]["path"].as_str().unwrap();
        assert_eq!(std::fs::metadata(path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_upload_wrong_field() {
        let app = test_app(FakeFactory::default());
        let (status, resp) = send(&app.router, multipart_request("document", "page.jpg", b"scanned")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body: Value = serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["error"], "No file uploaded");
    }
}
