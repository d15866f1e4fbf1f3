use axum::{response::IntoResponse, Json};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Input bytes could not be decoded as a raster image.
    #[error("Invalid image")]
    InvalidImage,
    /// The model reported zero detections.
    #[error("No faces detected")]
    NoFaces,
    /// Upstream fetch failure: network error, non-2xx status, storage error
    /// or an unsupported URL shape.
    #[error("{0}")]
    Acquisition(String),
    /// Anything else, with the stringified cause.
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Self::InvalidImage => StatusCode::BAD_REQUEST,
            Self::NoFaces => StatusCode::NOT_FOUND,
            Self::Acquisition(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
