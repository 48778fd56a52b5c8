//! Faculty recognition web front end.
//!
//! Serves the capture page and the JSON recognition endpoint.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use facultyid_core::{FacultyRecord, Outcome, RecognitionEngine, RecognitionService};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Application state shared across handlers.
///
/// The engine needs exclusive access, so requests take turns on the
/// service and run it on the blocking pool.
pub struct AppState<E> {
    service: Mutex<RecognitionService<E>>,
}

impl<E: RecognitionEngine> AppState<E> {
    pub fn new(service: RecognitionService<E>) -> Self {
        Self {
            service: Mutex::new(service),
        }
    }
}

/// Body of `POST /api/recognize`
#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub image_data: Option<String>,
}

/// Body of every recognition response
#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FacultyRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<Outcome> for RecognizeResponse {
    fn from(outcome: Outcome) -> Self {
        let status = outcome.status();
        let message = outcome.message();
        let data = match outcome {
            Outcome::Success(record) => Some(record),
            _ => None,
        };
        Self {
            status,
            data,
            message,
        }
    }
}

/// Create the application router. Request bodies above `body_limit` bytes
/// are refused.
pub fn create_router<E: RecognitionEngine + 'static>(
    state: Arc<AppState<E>>,
    body_limit: usize,
) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/recognize", post(recognize_handler::<E>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn recognize_handler<E: RecognitionEngine + 'static>(
    State(state): State<Arc<AppState<E>>>,
    body: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Response {
    let payload = match body {
        Ok(Json(request)) => request.image_data,
        Err(JsonRejection::BytesRejection(rejection)) => {
            log::warn!("Could not read request body: {}", rejection.body_text());
            return respond(Outcome::BadRequest(format!(
                "Could not read request body: {}",
                rejection.body_text()
            )));
        }
        Err(rejection) => {
            log::debug!("Rejected request body: {}", rejection);
            None
        }
    };

    let outcome = tokio::task::spawn_blocking(move || {
        let mut service = state.service.lock().unwrap_or_else(|poisoned| {
            log::warn!("Recognition service lock was poisoned; continuing");
            poisoned.into_inner()
        });
        service.recognize_payload(payload.as_deref())
    })
    .await
    .unwrap_or_else(|e| {
        log::error!("Recognition task failed: {}", e);
        Outcome::InternalError(e.to_string())
    });

    respond(outcome)
}

fn respond(outcome: Outcome) -> Response {
    let code = StatusCode::from_u16(outcome.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(RecognizeResponse::from(outcome))).into_response()
}

/// Bind `addr` and serve until the process is stopped
pub async fn run_server<E: RecognitionEngine + 'static>(
    state: Arc<AppState<E>>,
    addr: &str,
    body_limit: usize,
) -> anyhow::Result<()> {
    let app = create_router(state, body_limit);

    log::info!("Starting web server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use facultyid_core::engine::{Candidate, EngineError, Enforcement, FaceRegion};
    use facultyid_core::{FacultyRegistry, MatchResolver};
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::Value;
    use std::io::Cursor;
    use std::path::Path;
    use tower::ServiceExt;

    enum Reply {
        Rows(Vec<&'static str>),
        NoFace,
        Fail,
    }

    struct FakeEngine(Reply);

    impl RecognitionEngine for FakeEngine {
        fn find(
            &mut self,
            _image: &RgbImage,
            gallery_dir: &Path,
            _enforcement: Enforcement,
        ) -> Result<Vec<Candidate>, EngineError> {
            match &self.0 {
                Reply::Rows(names) => Ok(names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Candidate {
                        identity: gallery_dir.join(format!("{}.jpg", name)),
                        distance: 0.2 + i as f32 * 0.1,
                        region: FaceRegion {
                            x: 0,
                            y: 0,
                            width: 8,
                            height: 8,
                        },
                    })
                    .collect()),
                Reply::NoFace => Err(EngineError::NoFaceDetected),
                Reply::Fail => Err(EngineError::Gallery("faculty_db is missing".to_string())),
            }
        }
    }

    const BODY_LIMIT: usize = 32 * 1024 * 1024;

    fn app(reply: Reply) -> Router {
        app_with_limit(reply, BODY_LIMIT)
    }

    fn app_with_limit(reply: Reply, body_limit: usize) -> Router {
        let registry = FacultyRegistry::from_records([(
            "janedoe".to_string(),
            FacultyRecord {
                full_name: "Jane Doe".to_string(),
                designation: "Professor".to_string(),
                department: "CS".to_string(),
            },
        )]);
        let resolver = MatchResolver::new(FakeEngine(reply), "faculty_db");
        let state = AppState::new(RecognitionService::new(registry, resolver));
        create_router(Arc::new(state), body_limit)
    }

    fn png_data_url() -> String {
        data_url_of(&RgbImage::from_pixel(8, 8, Rgb([200, 180, 160])))
    }

    fn data_url_of(img: &RgbImage) -> String {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(out.into_inner()))
    }

    async fn post_json(app: Router, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/recognize")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn image_body() -> String {
        serde_json::json!({ "image_data": png_data_url() }).to_string()
    }

    #[tokio::test]
    async fn test_recognized_faculty() {
        let (status, json) = post_json(app(Reply::Rows(vec!["janedoe"])), image_body()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["full_name"], "Jane Doe");
        assert_eq!(json["data"]["designation"], "Professor");
        assert_eq!(json["data"]["department"], "CS");
        assert!(json.get("message").is_none());
    }

    #[tokio::test]
    async fn test_empty_gallery_is_not_found() {
        let (status, json) = post_json(app(Reply::Rows(vec![])), image_body()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "not_found");
        assert_eq!(json["message"], "No match found in the database.");
    }

    #[tokio::test]
    async fn test_match_without_details() {
        let (status, json) = post_json(app(Reply::Rows(vec!["johndoe"])), image_body()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "not_found");
        assert_eq!(json["message"], "Match found, but no details in JSON.");
    }

    #[tokio::test]
    async fn test_no_face() {
        let (status, json) = post_json(app(Reply::NoFace), image_body()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "no_face");
    }

    #[tokio::test]
    async fn test_engine_failure_is_500() {
        let (status, json) = post_json(app(Reply::Fail), image_body()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["status"], "error");
        assert!(!json["message"].as_str().unwrap().contains("faculty_db"));
    }

    #[tokio::test]
    async fn test_missing_image_data_is_400() {
        let (status, json) = post_json(app(Reply::Rows(vec!["janedoe"])), "{}".to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "No image data received.");
    }

    #[tokio::test]
    async fn test_invalid_json_is_400() {
        let (status, json) = post_json(app(Reply::Rows(vec!["janedoe"])), "not json".to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn test_undecodable_image_is_400() {
        let body = serde_json::json!({ "image_data": "data:image/png;base64,AAAA" }).to_string();
        let (status, json) = post_json(app(Reply::Fail), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn test_high_resolution_upload_is_accepted() {
        // Hashed pixels keep the PNG from compressing below axum's 2 MB default
        let img = RgbImage::from_fn(1600, 1200, |x, y| {
            let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503))
                .wrapping_mul(2_246_822_519);
            Rgb([(v >> 8) as u8, (v >> 16) as u8, (v >> 24) as u8])
        });
        let body = serde_json::json!({ "image_data": data_url_of(&img) }).to_string();
        assert!(body.len() > 2 * 1024 * 1024);

        let (status, json) = post_json(app(Reply::Rows(vec!["janedoe"])), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
    }

    #[tokio::test]
    async fn test_oversized_body_is_reported() {
        let (status, json) =
            post_json(app_with_limit(Reply::Rows(vec!["janedoe"]), 64), image_body()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
        assert_ne!(json["message"], "No image data received.");
        assert!(json["message"]
            .as_str()
            .unwrap()
            .starts_with("Could not read request body"));
    }

    #[tokio::test]
    async fn test_index_page() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app(Reply::NoFace).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/recognize"));
    }
}
