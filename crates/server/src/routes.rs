use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use posegate_core::pipeline::pose_service::PoseService;
use posegate_core::shared::request::{ClickPoint, RenderFlags, RequestVariant};

use crate::error::ApiError;

const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PoseService>,
    pub use_etag: bool,
    /// Largest accepted `/process-frame` body.
    pub max_upload_bytes: usize,
}

/// Query string of `/process-frame`. Flags are 0/1 integers.
#[derive(Debug, Deserialize)]
pub struct FrameQuery {
    #[serde(default = "enabled")]
    image: u8,
    #[serde(default = "enabled")]
    draw: u8,
    #[serde(default = "enabled")]
    overlay: u8,
    #[serde(default = "enabled")]
    resize: u8,
    click_x: Option<i64>,
    click_y: Option<i64>,
}

fn enabled() -> u8 {
    1
}

impl FrameQuery {
    fn variant(&self) -> RequestVariant {
        let flags = RenderFlags {
            return_image: self.image != 0,
            draw: self.draw != 0,
            overlay: self.overlay != 0,
            resize: self.resize != 0,
        };
        let click = match (self.click_x, self.click_y) {
            (Some(x), Some(y)) => Some(ClickPoint::new(x, y)),
            _ => None,
        };
        RequestVariant::new(flags, click)
    }
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/process-frame", post(process_frame).layer(upload_limit))
        .route("/health", get(health))
        .route("/clear-cache", get(clear_cache))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn process_frame(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<FrameQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let mut multipart = multipart?;
    let client = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string();
    let variant = query.variant();

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let bytes = upload.ok_or(ApiError::MissingFile)?;
    log::debug!(
        "Frame from {client}: {} bytes, click {:?}",
        bytes.len(),
        variant.click
    );

    let service = state.service.clone();
    let result =
        tokio::task::spawn_blocking(move || service.process_frame(&bytes, &client, variant))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))??;

    let body = serde_json::to_vec(&result).map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut response = (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body.clone(),
    )
        .into_response();
    if state.use_etag {
        let tag = format!("W/\"{:x}\"", md5::compute(&body));
        if let Ok(value) = HeaderValue::from_str(&tag) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.health())
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.service.clear_cache();
    Json(serde_json::json!({
        "status": "ok",
        "message": "Cache cleared successfully",
        "cleared": cleared,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use image::{ImageFormat, RgbImage};
    use posegate_core::caching::domain::memory_probe::FixedMemoryProbe;
    use posegate_core::detection::domain::pose::{Keypoint, RawPose};
    use posegate_core::detection::domain::pose_detector::PoseDetector;
    use posegate_core::pipeline::pose_service::ModelInfo;
    use posegate_core::shared::config::{
        ExecutionDelegate, PoseModelVariant, RateLimitConfig, ServiceConfig,
    };
    use posegate_core::shared::constants::DEFAULT_MAX_UPLOAD_BYTES;
    use posegate_core::shared::frame::Frame;
    use serde_json::Value;
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "posegate-test-boundary";

    /// One upright figure in the middle of the frame.
    struct StandingFigure;

    impl PoseDetector for StandingFigure {
        fn detect(&mut self, _: &Frame) -> Result<Vec<RawPose>, Box<dyn std::error::Error>> {
            let keypoints = (0..17)
                .map(|i| Keypoint::new(0.5, 0.2 + i as f64 * 0.03, 0.0, 0.9))
                .collect();
            Ok(vec![RawPose::new(keypoints)])
        }
    }

    type FactoryResult = Result<Box<dyn PoseDetector>, Box<dyn std::error::Error + Send + Sync>>;

    fn app(config: ServiceConfig, use_etag: bool) -> Router {
        app_with_limit(config, use_etag, DEFAULT_MAX_UPLOAD_BYTES)
    }

    fn app_with_limit(config: ServiceConfig, use_etag: bool, max_upload_bytes: usize) -> Router {
        let factory = || -> FactoryResult { Ok(Box::new(StandingFigure)) };
        let service = PoseService::new(
            config,
            Arc::new(factory),
            Box::new(FixedMemoryProbe(Some(30.0))),
            ModelInfo {
                variant: PoseModelVariant::Lite,
                delegate: ExecutionDelegate::Cpu,
            },
        )
        .unwrap();
        router(
            AppState {
                service: Arc::new(service),
                use_etag,
                max_upload_bytes,
            },
            &[],
        )
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Vec::new();
        RgbImage::from_pixel(width, height, image::Rgb([90, 90, 90]))
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    /// Incompressible RGB noise, so the PNG stays close to its raw size.
    fn noise_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x9e37_79b9;
        let mut img = RgbImage::new(width, height);
        for px in img.pixels_mut() {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            *px = image::Rgb([state as u8, (state >> 8) as u8, (state >> 16) as u8]);
        }
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn multipart_body(field: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"frame.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(uri: &str, field: &str, payload: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header("x-forwarded-for", "10.0.0.7")
            .body(Body::from(multipart_body(field, payload)))
            .unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_process_frame_returns_poses_and_image() {
        let response = app(ServiceConfig::default(), false)
            .oneshot(upload("/process-frame", "file", &png(160, 120)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["num_poses"], 1);
        assert_eq!(body["frame_width"], 160);
        assert_eq!(body["frame_height"], 120);
        assert_eq!(body["poses"][0]["landmarks"].as_array().unwrap().len(), 17);
        assert!(body["image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_click_query_selects_pose() {
        let response = app(ServiceConfig::default(), false)
            .oneshot(upload(
                "/process-frame?image=0&click_x=80&click_y=50",
                "file",
                &png(160, 120),
            ))
            .await
            .unwrap();

        let body = json(response).await;
        assert_eq!(body["selected_pose_index"], 0);
        assert_eq!(body["debug_info"]["click_point"], serde_json::json!([80, 50]));
        assert!(body.get("image").is_none());
    }

    #[tokio::test]
    async fn test_etag_header_when_enabled() {
        let response = app(ServiceConfig::default(), true)
            .oneshot(upload("/process-frame?image=0", "file", &png(64, 64)))
            .await
            .unwrap();

        let etag = response.headers()[header::ETAG].to_str().unwrap();
        assert!(etag.starts_with("W/\""));
        assert_eq!(etag.len(), 2 + 1 + 32 + 1);
    }

    #[tokio::test]
    async fn test_hd_frame_above_two_megabytes_is_accepted() {
        let frame = noise_png(1280, 720);
        assert!(frame.len() > 2 * 1024 * 1024);

        let response = app(ServiceConfig::default(), false)
            .oneshot(upload("/process-frame?image=0", "file", &frame))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["frame_width"], 1280);
        assert_eq!(body["num_poses"], 1);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_payload_too_large() {
        let response = app_with_limit(ServiceConfig::default(), false, 1024)
            .oneshot(upload("/process-frame", "file", &noise_png(64, 64)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_click_is_json_bad_request() {
        let response = app(ServiceConfig::default(), false)
            .oneshot(upload(
                "/process-frame?click_x=abc&click_y=1",
                "file",
                &png(32, 32),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let error = json(response).await["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("Invalid query"));
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_json_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/process-frame")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(png(8, 8)))
            .unwrap();

        let response = app(ServiceConfig::default(), false)
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json(response).await["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid upload"));
    }

    #[tokio::test]
    async fn test_missing_file_is_bad_request() {
        let response = app(ServiceConfig::default(), false)
            .oneshot(upload("/process-frame", "attachment", &png(8, 8)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_undecodable_image_is_bad_request() {
        let response = app(ServiceConfig::default(), false)
            .oneshot(upload("/process-frame", "file", b"not an image"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json(response).await["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid image data"));
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429() {
        let app = app(
            ServiceConfig {
                rate_limit: RateLimitConfig {
                    max_per_window: 1,
                    ..RateLimitConfig::default()
                },
                ..ServiceConfig::default()
            },
            false,
        );
        let frame = png(32, 32);

        let first = app
            .clone()
            .oneshot(upload("/process-frame?image=0", "file", &frame))
            .await
            .unwrap();
        let second = app
            .oneshot(upload("/process-frame?image=0", "file", &frame))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_counts_cache_hits() {
        let app = app(ServiceConfig::default(), false);
        let frame = png(100, 80);
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(upload("/process-frame?image=0", "file", &frame))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["processed_frames"], 1);
        assert_eq!(body["cache_hits"], 1);
        assert_eq!(body["cached_hits"], 1);
        assert_eq!(body["model"], "lite");
        assert_eq!(body["memory_usage_percent"], 30.0);
    }

    #[tokio::test]
    async fn test_clear_cache_reports_cleared_entries() {
        let app = app(ServiceConfig::default(), false);
        app.clone()
            .oneshot(upload("/process-frame", "file", &png(50, 50)))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/clear-cache").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["message"], "Cache cleared successfully");
        assert_eq!(body["cleared"], 1);
    }
}
