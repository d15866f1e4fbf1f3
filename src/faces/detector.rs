//! SCRFD face detector: anchor-free detection over three feature-map
//! strides with distance-to-box decoding and greedy NMS.

use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::{GraphOptimizationLevel, Session, Value};
use std::path::Path;

const STRIDES: [u32; 3] = [8, 16, 32];
/// Anchors per feature-map cell.
const NUM_ANCHORS: u32 = 2;
/// One score, box and keypoint output per stride.
const FMC: usize = 3;
const IOU_THRESHOLD: f32 = 0.4;
const KEYPOINTS: usize = 5;

/// A raw detection in original-image coordinates, before recognition.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub keypoints: [[f32; 2]; KEYPOINTS],
    pub score: f32,
}

pub struct ScrfdDetector {
    session: Session,
    input_size: u32,
    threshold: f32,
}

impl ScrfdDetector {
    pub fn load(path: &Path, input_size: u32, threshold: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .with_context(|| format!("loading detection model from {}", path.display()))?;
        Ok(Self {
            session,
            input_size,
            threshold,
        })
    }

    pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (scale, blob) = self.letterbox(image);
        // Outputs are ordered score/box/keypoint per stride; resolve them
        // through the session metadata rather than positional indexing.
        let names: Vec<String> = self
            .session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();
        if names.len() != STRIDES.len() + 2 * FMC {
            bail!("unexpected detection model output count: {}", names.len());
        }

        let input = Value::from_array(blob)?;
        let outputs = self.session.run(ort::inputs![input]?)?;

        let mut candidates = Vec::new();
        for (idx, &stride) in STRIDES.iter().enumerate() {
            let scores = outputs[names[idx].as_str()].try_extract_tensor::<f32>()?;
            let boxes = outputs[names[idx + FMC].as_str()].try_extract_tensor::<f32>()?;
            let keypoints = outputs[names[idx + 2 * FMC].as_str()].try_extract_tensor::<f32>()?;

            let scores = scores.to_slice().context("non-contiguous scores")?;
            let boxes = boxes.to_slice().context("non-contiguous boxes")?;
            let keypoints = keypoints.to_slice().context("non-contiguous keypoints")?;

            self.decode_stride(stride, scores, boxes, keypoints, scale, &mut candidates)?;
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(non_max_suppression(candidates))
    }

    /// Decodes one stride's outputs: each cell predicts distances from its
    /// anchor center to the box edges and keypoints, in stride units.
    fn decode_stride(
        &self,
        stride: u32,
        scores: &[f32],
        boxes: &[f32],
        keypoints: &[f32],
        scale: f32,
        out: &mut Vec<Detection>,
    ) -> Result<()> {
        let cells = self.input_size / stride;
        let count = (cells * cells * NUM_ANCHORS) as usize;
        if scores.len() != count
            || boxes.len() != count * 4
            || keypoints.len() != count * 2 * KEYPOINTS
        {
            bail!(
                "detection output shape mismatch at stride {stride}: \
                 {} scores, {} box values, {} keypoint values",
                scores.len(),
                boxes.len(),
                keypoints.len()
            );
        }

        let stride = stride as f32;
        for (i, &score) in scores.iter().enumerate() {
            if score < self.threshold {
                continue;
            }
            let cell = i / NUM_ANCHORS as usize;
            let cx = (cell % cells as usize) as f32 * stride;
            let cy = (cell / cells as usize) as f32 * stride;

            let b = &boxes[i * 4..i * 4 + 4];
            let bbox = [
                (cx - b[0] * stride) * scale,
                (cy - b[1] * stride) * scale,
                (cx + b[2] * stride) * scale,
                (cy + b[3] * stride) * scale,
            ];

            let mut kps = [[0.0f32; 2]; KEYPOINTS];
            for (k, point) in kps.iter_mut().enumerate() {
                let kx = keypoints[i * 2 * KEYPOINTS + 2 * k];
                let ky = keypoints[i * 2 * KEYPOINTS + 2 * k + 1];
                *point = [(cx + kx * stride) * scale, (cy + ky * stride) * scale];
            }

            out.push(Detection {
                bbox,
                keypoints: kps,
                score,
            });
        }
        Ok(())
    }

    /// Resizes into the square detection input preserving aspect ratio,
    /// padding the remainder with black. Returns the factor mapping
    /// detection coordinates back to the original image.
    fn letterbox(&self, image: &RgbImage) -> (f32, Array4<f32>) {
        let size = self.input_size;
        let (width, height) = image.dimensions();
        let ratio = height as f32 / width as f32;
        let (new_width, new_height) = if ratio > 1.0 {
            let h = size;
            let w = ((h as f32 / ratio).floor().max(1.0)) as u32;
            (w, h)
        } else {
            let w = size;
            let h = ((w as f32 * ratio).floor().max(1.0)) as u32;
            (w, h)
        };
        let scale = height as f32 / new_height as f32;

        let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);
        // Padding stays black: (0 - 127.5) / 128.
        let mut blob = Array4::<f32>::from_elem(
            (1, 3, size as usize, size as usize),
            -127.5 / 128.0,
        );
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                blob[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - 127.5) / 128.0;
            }
        }
        (scale, blob)
    }
}

/// Greedy NMS over score-sorted candidates.
fn non_max_suppression(candidates: Vec<Detection>) -> Vec<Detection> {
    let mut keep: Vec<Detection> = Vec::new();
    'next: for candidate in candidates {
        for kept in &keep {
            if iou(&candidate.bbox, &kept.bbox) > IOU_THRESHOLD {
                continue 'next;
            }
        }
        keep.push(candidate);
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);
    let inter = (x2 - x1 + 1.0).max(0.0) * (y2 - y1 + 1.0).max(0.0);
    let area_a = (a[2] - a[0] + 1.0) * (a[3] - a[1] + 1.0);
    let area_b = (b[2] - b[0] + 1.0) * (b[3] - b[1] + 1.0);
    inter / (area_a + area_b - inter)
}
