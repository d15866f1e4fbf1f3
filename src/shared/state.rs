use crate::config::AppConfig;
use crate::faces::FaceEngine;
use aws_sdk_s3::Client as S3Client;
use std::sync::Arc;

/// Process-scoped dependencies, built once in `main` and injected into
/// handlers. Nothing here is mutated after startup.
pub struct AppState {
    pub engine: Arc<dyn FaceEngine>,
    pub drive: Option<S3Client>,
    pub http: reqwest::Client,
    pub config: AppConfig,
}
