//! Face analysis: detection plus embedding extraction over ONNX Runtime,
//! CPU execution, loaded once at process start.

pub mod detector;
pub mod embedder;

use crate::config::ModelConfig;
use anyhow::Result;
use image::RgbImage;
use serde::Serialize;
use tracing::info;

use detector::ScrfdDetector;
use embedder::ArcFaceEmbedder;

/// One detected face. `confidence` defaults to 1.0 when the runtime reports
/// no score.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedFace {
    /// x1, y1, x2, y2 in original image coordinates.
    pub bbox: [f32; 4],
    /// Fixed-length vector, model-defined dimensionality (512 for the stock
    /// recognition model). Raw model output, not normalized; similarity
    /// handling is the caller's concern.
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

/// Seam between the HTTP pipeline and the model runtime. Inference-only, so
/// a single shared instance serves all requests without locking.
pub trait FaceEngine: Send + Sync {
    /// Zero faces is an empty list, not an error.
    fn analyze(&self, image: &RgbImage) -> Result<Vec<DetectedFace>>;
}

/// The production engine: SCRFD detection followed by ArcFace recognition
/// on each aligned face crop.
pub struct FaceAnalyzer {
    detector: ScrfdDetector,
    embedder: ArcFaceEmbedder,
}

impl FaceAnalyzer {
    /// Loads both model artifacts from `config.root`. Called once in `main`.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let detector = ScrfdDetector::load(
            &config.root.join("det_10g.onnx"),
            config.det_size,
            config.det_thresh,
        )?;
        let embedder = ArcFaceEmbedder::load(&config.root.join("w600k_r50.onnx"))?;
        info!(
            "face models loaded from {} (det_size={}, det_thresh={})",
            config.root.display(),
            config.det_size,
            config.det_thresh
        );
        Ok(Self { detector, embedder })
    }
}

impl FaceEngine for FaceAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<DetectedFace>> {
        let detections = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let aligned = embedder::align_face(image, &detection.keypoints);
            let embedding = self.embedder.embed(&aligned)?;
            faces.push(DetectedFace {
                bbox: detection.bbox,
                embedding,
                confidence: detection.score,
            });
        }
        Ok(faces)
    }
}
