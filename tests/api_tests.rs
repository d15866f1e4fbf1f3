//! Router-level tests with a stub face engine: status mapping, response
//! shapes, batch ordering and per-file isolation.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use faceserver::config::{AppConfig, ModelConfig, ServerConfig};
use faceserver::faces::{DetectedFace, FaceEngine};
use faceserver::server::build_router;
use faceserver::shared::state::AppState;
use http_body_util::BodyExt;
use image::RgbImage;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

enum StubOutcome {
    Faces(usize),
    Fail(String),
}

/// Pops one scripted outcome per `analyze` call; defaults to one face.
struct StubEngine {
    script: Mutex<VecDeque<StubOutcome>>,
}

impl StubEngine {
    fn scripted(outcomes: Vec<StubOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
        })
    }

    fn always_one_face() -> Arc<Self> {
        Self::scripted(Vec::new())
    }
}

impl FaceEngine for StubEngine {
    fn analyze(&self, _image: &RgbImage) -> anyhow::Result<Vec<DetectedFace>> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StubOutcome::Faces(1));
        match outcome {
            StubOutcome::Faces(n) => Ok((0..n)
                .map(|i| DetectedFace {
                    bbox: [10.0 * i as f32, 20.0, 110.0, 140.0],
                    embedding: vec![0.25; 512],
                    confidence: 0.9,
                })
                .collect()),
            StubOutcome::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

fn test_state(engine: Arc<dyn FaceEngine>) -> Arc<AppState> {
    Arc::new(AppState {
        engine,
        drive: None,
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap(),
        config: AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            drive: None,
            model: ModelConfig {
                root: "./models".into(),
                det_size: 640,
                det_thresh: 0.5,
            },
        },
    })
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 200])
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_healthy() {
    let app = build_router(test_state(StubEngine::always_one_face()));
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn extract_embedding_returns_all_faces() {
    let app = build_router(test_state(StubEngine::scripted(vec![StubOutcome::Faces(2)])));
    let response = app
        .oneshot(multipart_request(
            "/extract-embedding",
            &[("file", "me.png", &png_bytes(64, 64))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["num_faces"], 2);
    let faces = body["faces"].as_array().unwrap();
    assert_eq!(faces.len(), 2);
    assert_eq!(faces[0]["face_id"], 0);
    assert_eq!(faces[1]["face_id"], 1);
    assert_eq!(faces[0]["embedding"].as_array().unwrap().len(), 512);
    assert_eq!(faces[0]["bbox"].as_array().unwrap().len(), 4);
    assert!(faces[0]["confidence"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn extract_embedding_rejects_undecodable_bytes() {
    let app = build_router(test_state(StubEngine::always_one_face()));
    let response = app
        .oneshot(multipart_request(
            "/extract-embedding",
            &[("file", "junk.bin", b"not an image at all")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid image");
}

#[tokio::test]
async fn extract_embedding_maps_zero_faces_to_404() {
    let app = build_router(test_state(StubEngine::scripted(vec![StubOutcome::Faces(0)])));
    let response = app
        .oneshot(multipart_request(
            "/extract-embedding",
            &[("file", "blank.png", &png_bytes(32, 32))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "No faces detected");
}

#[tokio::test]
async fn extract_embedding_maps_engine_failure_to_500() {
    let app = build_router(test_state(StubEngine::scripted(vec![StubOutcome::Fail(
        "runtime exploded".to_string(),
    )])));
    let response = app
        .oneshot(multipart_request(
            "/extract-embedding",
            &[("file", "me.png", &png_bytes(32, 32))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("runtime exploded"), "got: {message}");
}

#[tokio::test]
async fn batch_preserves_order_and_isolates_failures() {
    // First file: one face. Second: undecodable (engine never called).
    // Third: zero faces.
    let app = build_router(test_state(StubEngine::scripted(vec![
        StubOutcome::Faces(1),
        StubOutcome::Faces(0),
    ])));
    let response = app
        .oneshot(multipart_request(
            "/extract-embeddings-batch",
            &[
                ("files", "a.png", &png_bytes(48, 48)),
                ("files", "b.bin", b"garbage bytes"),
                ("files", "c.png", &png_bytes(48, 48)),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);

    assert_eq!(results[0]["filename"], "a.png");
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["num_faces"], 1);
    assert_eq!(results[0]["embedding"].as_array().unwrap().len(), 512);
    assert!(results[0].get("error").is_none());

    assert_eq!(results[1]["filename"], "b.bin");
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error"], "Invalid image");
    assert!(results[1].get("embedding").is_none());

    assert_eq!(results[2]["filename"], "c.png");
    assert_eq!(results[2]["success"], false);
    assert_eq!(results[2]["error"], "No faces detected");
}

#[tokio::test]
async fn batch_returns_first_face_embedding_only() {
    let app = build_router(test_state(StubEngine::scripted(vec![StubOutcome::Faces(3)])));
    let response = app
        .oneshot(multipart_request(
            "/extract-embeddings-batch",
            &[("files", "group.png", &png_bytes(48, 48))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let item = &body["results"].as_array().unwrap()[0];
    assert_eq!(item["success"], true);
    assert_eq!(item["num_faces"], 3);
    assert_eq!(item["embedding"].as_array().unwrap().len(), 512);
    // One embedding per file, never a face list.
    assert!(item.get("faces").is_none());
}

#[tokio::test]
async fn url_endpoint_fetches_and_extracts() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/album/me.png")
        .match_query(mockito::Matcher::UrlEncoded("sig".into(), "abc".into()))
        .with_status(200)
        .with_body(png_bytes(64, 64))
        .create_async()
        .await;

    let app = build_router(test_state(StubEngine::scripted(vec![StubOutcome::Faces(1)])));
    let url = format!("{}/album/me.png?sig=abc", upstream.url());
    let response = app
        .oneshot(
            Request::post("/extract-embedding-from-url")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "image_url": url }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["num_faces"], 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn url_endpoint_maps_upstream_error_to_502() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("GET", "/gone.png")
        .match_query(mockito::Matcher::Any)
        .with_status(403)
        .create_async()
        .await;

    let app = build_router(test_state(StubEngine::always_one_face()));
    let url = format!("{}/gone.png?sig=abc", upstream.url());
    let response = app
        .oneshot(
            Request::post("/extract-embedding-from-url")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "image_url": url }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn url_endpoint_rejects_unsupported_scheme() {
    let app = build_router(test_state(StubEngine::always_one_face()));
    let response = app
        .oneshot(
            Request::post("/extract-embedding-from-url")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "image_url": "ftp://example.com/face.jpg" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Unsupported URL format"));
}

#[tokio::test]
async fn url_endpoint_maps_undecodable_fetch_to_400() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("GET", "/not-an-image")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body("<html>hello</html>")
        .create_async()
        .await;

    let app = build_router(test_state(StubEngine::always_one_face()));
    let url = format!("{}/not-an-image?x=1", upstream.url());
    let response = app
        .oneshot(
            Request::post("/extract-embedding-from-url")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "image_url": url }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid image");
}
