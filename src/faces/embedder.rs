//! ArcFace recognition: aligns each detected face to the canonical 112x112
//! template with a least-squares similarity transform, then runs the
//! recognition model on the warped crop.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::{GraphOptimizationLevel, Session, Value};
use std::path::Path;

pub const INPUT_SIZE: u32 = 112;

/// Canonical five-point template (left eye, right eye, nose, mouth corners)
/// the recognition model was trained against, in 112x112 coordinates.
const TEMPLATE: [[f32; 2]; 5] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    pub fn load(path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .with_context(|| format!("loading recognition model from {}", path.display()))?;
        Ok(Self { session })
    }

    /// Computes the embedding of an already-aligned 112x112 crop. Returns
    /// the raw model output (512 values for the stock model).
    pub fn embed(&self, aligned: &RgbImage) -> Result<Vec<f32>> {
        let size = INPUT_SIZE as usize;
        let mut blob = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in aligned.enumerate_pixels() {
            for c in 0..3 {
                blob[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - 127.5) / 128.0;
            }
        }

        let name = self.session.outputs[0].name.clone();
        let input = Value::from_array(blob)?;
        let outputs = self.session.run(ort::inputs![input]?)?;
        let tensor = outputs[name.as_str()].try_extract_tensor::<f32>()?;
        let embedding = tensor
            .to_slice()
            .context("non-contiguous embedding tensor")?
            .to_vec();
        Ok(embedding)
    }
}

/// Warps the face region onto the canonical template using the similarity
/// transform estimated from the five detected keypoints.
pub fn align_face(image: &RgbImage, keypoints: &[[f32; 2]; 5]) -> RgbImage {
    let transform = Similarity::estimate(keypoints, &TEMPLATE);
    transform.warp(image, INPUT_SIZE)
}

/// 2D similarity transform `p' = s R p + t`, stored as
/// `[a -b tx; b a ty]` with scale and rotation folded into (a, b).
#[derive(Debug, Clone, Copy)]
pub struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares estimate mapping `src` onto `dst` (rotation, uniform
    /// scale and translation; no reflection).
    pub fn estimate(src: &[[f32; 2]; 5], dst: &[[f32; 2]; 5]) -> Similarity {
        let n = src.len() as f32;
        let mean = |pts: &[[f32; 2]; 5]| {
            let (mut mx, mut my) = (0.0, 0.0);
            for p in pts {
                mx += p[0];
                my += p[1];
            }
            (mx / n, my / n)
        };
        let (sx, sy) = mean(src);
        let (dx, dy) = mean(dst);

        // With centered coordinates the normal equations decouple.
        let mut norm = 0.0;
        let mut dot = 0.0;
        let mut cross = 0.0;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (xs, ys) = (s[0] - sx, s[1] - sy);
            let (xd, yd) = (d[0] - dx, d[1] - dy);
            norm += xs * xs + ys * ys;
            dot += xs * xd + ys * yd;
            cross += xs * yd - ys * xd;
        }
        if norm <= f32::EPSILON {
            // Degenerate keypoints; fall back to pure translation.
            return Similarity {
                a: 1.0,
                b: 0.0,
                tx: dx - sx,
                ty: dy - sy,
            };
        }
        let a = dot / norm;
        let b = cross / norm;
        Similarity {
            a,
            b,
            tx: dx - (a * sx - b * sy),
            ty: dy - (b * sx + a * sy),
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (ux, uy) = (x - self.tx, y - self.ty);
        ((self.a * ux + self.b * uy) / det, (self.a * uy - self.b * ux) / det)
    }

    /// Renders the transformed source into a `size`x`size` output with
    /// bilinear sampling; samples outside the source are black.
    fn warp(&self, image: &RgbImage, size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |ox, oy| {
            let (sx, sy) = self.invert(ox as f32, oy as f32);
            sample_bilinear(image, sx, sy)
        })
    }
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let p00 = image.get_pixel(x0, y0).0[c] as f32;
        let p10 = image.get_pixel(x1, y0).0[c] as f32;
        let p01 = image.get_pixel(x0, y1).0[c] as f32;
        let p11 = image.get_pixel(x1, y1).0[c] as f32;
        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        out[c] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
