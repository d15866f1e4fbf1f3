use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub drive: Option<DriveConfig>,
    pub model: ModelConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Custom S3-compatible endpoint with static credentials. When absent the
/// storage client falls back to ambient AWS credentials.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub server: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Directory holding the detection and recognition ONNX artifacts.
    pub root: PathBuf,
    /// Square detection input size in pixels.
    pub det_size: u32,
    /// Minimum detection confidence for a face to be reported.
    pub det_thresh: f32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server = ServerConfig {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
        };
        let drive = std::env::var("DRIVE_SERVER").ok().map(|url| DriveConfig {
            server: url,
            access_key: std::env::var("DRIVE_ACCESSKEY").unwrap_or_default(),
            secret_key: std::env::var("DRIVE_SECRET").unwrap_or_default(),
        });
        let model = ModelConfig {
            root: std::env::var("MODEL_ROOT")
                .unwrap_or_else(|_| "./models".to_string())
                .into(),
            det_size: std::env::var("DET_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(640),
            det_thresh: std::env::var("DET_THRESH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
        };
        AppConfig {
            server,
            drive,
            model,
        }
    }
}
