//! Face embedding REST API
//!
//! Three extraction endpoints plus a liveness probe, all sequencing
//! acquisition -> decode -> preprocess -> face model -> JSON.

use crate::acquisition::fetch_image_bytes;
use crate::faces::DetectedFace;
use crate::imaging;
use crate::shared::error::ServiceError;
use crate::shared::state::AppState;
use axum::{
    extract::{Multipart, State},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/extract-embedding", post(extract_embedding))
        .route("/extract-embedding-from-url", post(extract_embedding_from_url))
        .route("/extract-embeddings-batch", post(extract_embeddings_batch))
}

#[derive(Debug, Serialize)]
pub struct FaceResult {
    pub face_id: usize,
    pub embedding: Vec<f32>,
    pub bbox: [f32; 4],
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub faces: Vec<FaceResult>,
    pub num_faces: usize,
}

#[derive(Debug, Deserialize)]
pub struct ImageUrlRequest {
    pub image_url: String,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_faces: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItem>,
}

impl EmbeddingResponse {
    fn from_faces(faces: Vec<DetectedFace>) -> Self {
        let num_faces = faces.len();
        let faces = faces
            .into_iter()
            .enumerate()
            .map(|(face_id, face)| FaceResult {
                face_id,
                embedding: face.embedding,
                bbox: face.bbox,
                confidence: face.confidence,
            })
            .collect();
        Self { faces, num_faces }
    }
}

/// Constant liveness response; no dependencies are checked.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Decode -> preprocess -> detect; the whole request succeeds or fails.
fn run_pipeline(state: &AppState, bytes: &[u8]) -> Result<Vec<DetectedFace>, ServiceError> {
    let image = imaging::decode(bytes)?;
    let image = imaging::preprocess(image);
    let faces = state
        .engine
        .analyze(&image)
        .map_err(|e| ServiceError::Internal(format!("Error processing image: {e}")))?;
    if faces.is_empty() {
        return Err(ServiceError::NoFaces);
    }
    Ok(faces)
}

/// POST /extract-embedding
/// Multipart upload, field name `file`.
async fn extract_embedding(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<EmbeddingResponse>, ServiceError> {
    let mut data: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Internal(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            data = Some(field.bytes().await.map_err(|e| {
                ServiceError::Internal(format!("Failed to read upload: {e}"))
            })?);
        }
    }
    let data = data.ok_or(ServiceError::InvalidImage)?;

    let faces = run_pipeline(&state, &data)?;
    info!("extracted {} face(s) from upload", faces.len());
    Ok(Json(EmbeddingResponse::from_faces(faces)))
}

/// POST /extract-embedding-from-url
async fn extract_embedding_from_url(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImageUrlRequest>,
) -> Result<Json<EmbeddingResponse>, ServiceError> {
    let bytes = fetch_image_bytes(&state, &request.image_url).await?;
    let faces = run_pipeline(&state, &bytes)?;
    info!(
        "extracted {} face(s) from {}",
        faces.len(),
        request.image_url
    );
    Ok(Json(EmbeddingResponse::from_faces(faces)))
}

/// POST /extract-embeddings-batch
/// Multipart upload, repeated field name `files`. Files are processed
/// strictly in order with per-file error isolation; the call itself never
/// fails. Each success carries the first face's embedding plus the total
/// face count.
async fn extract_embeddings_batch(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<BatchResponse>, ServiceError> {
    let mut uploads: Vec<(String, Bytes)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Internal(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field.file_name().unwrap_or("unnamed").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::Internal(format!("Failed to read upload: {e}")))?;
        uploads.push((filename, bytes));
    }

    let mut results = Vec::with_capacity(uploads.len());
    for (filename, bytes) in uploads {
        match run_pipeline(&state, &bytes) {
            Ok(faces) => {
                let num_faces = faces.len();
                let first = faces.into_iter().next().map(|face| face.embedding);
                results.push(BatchItem {
                    filename,
                    success: true,
                    embedding: first,
                    num_faces: Some(num_faces),
                    error: None,
                });
            }
            Err(e) => results.push(BatchItem {
                filename,
                success: false,
                embedding: None,
                num_faces: None,
                error: Some(e.to_string()),
            }),
        }
    }

    info!("batch processed {} file(s)", results.len());
    Ok(Json(BatchResponse { results }))
}
