//! Contrast-limited adaptive histogram equalization applied to the
//! luminance channel in CIE L*a*b* space.
//!
//! Matches the usual CLAHE parameters for face preprocessing: clip limit
//! 2.0, 8x8 tile grid, bilinear blending between neighbouring tile
//! mappings. Chroma is untouched so colors survive the enhancement.

use image::{Rgb, RgbImage};

const CLIP_LIMIT: f32 = 2.0;
const TILE_GRID: u32 = 8;
const BINS: usize = 256;

/// Equalizes local contrast on the L channel and converts back to RGB.
pub fn enhance_contrast(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mut luma = Vec::with_capacity((width * height) as usize);
    let mut chroma = Vec::with_capacity((width * height) as usize);
    for Rgb([r, g, b]) in image.pixels() {
        let (l, a, bb) = srgb_to_lab(*r, *g, *b);
        // L* is in [0, 100]; quantize to the histogram range.
        luma.push((l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8);
        chroma.push((a, bb));
    }

    let equalized = clahe(&luma, width, height);

    let mut out = RgbImage::new(width, height);
    for (i, pixel) in out.pixels_mut().enumerate() {
        let l = equalized[i] as f32 * 100.0 / 255.0;
        let (a, b) = chroma[i];
        *pixel = Rgb(lab_to_srgb(l, a, b));
    }
    out
}

/// Tiled, clip-limited histogram equalization over a single 8-bit channel.
fn clahe(values: &[u8], width: u32, height: u32) -> Vec<u8> {
    let tile_w = width.div_ceil(TILE_GRID.min(width));
    let tile_h = height.div_ceil(TILE_GRID.min(height));
    // Effective grid: only tiles that actually contain pixels, so border
    // blending never reaches an empty mapping.
    let grid_x = width.div_ceil(tile_w);
    let grid_y = height.div_ceil(tile_h);

    // One lookup table per tile.
    let mut luts = vec![[0u8; BINS]; (grid_x * grid_y) as usize];
    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; BINS];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[values[(y * width + x) as usize] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            let lut = &mut luts[(ty * grid_x + tx) as usize];
            build_lut(&mut hist, area, lut);
        }
    }

    let mut out = vec![0u8; values.len()];
    for y in 0..height {
        let (ty0, ty1, fy) = tile_blend(y, tile_h, grid_y);
        for x in 0..width {
            let (tx0, tx1, fx) = tile_blend(x, tile_w, grid_x);
            let v = values[(y * width + x) as usize] as usize;

            let top = lerp(
                luts[(ty0 * grid_x + tx0) as usize][v] as f32,
                luts[(ty0 * grid_x + tx1) as usize][v] as f32,
                fx,
            );
            let bottom = lerp(
                luts[(ty1 * grid_x + tx0) as usize][v] as f32,
                luts[(ty1 * grid_x + tx1) as usize][v] as f32,
                fx,
            );
            out[(y * width + x) as usize] = lerp(top, bottom, fy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Clips the histogram, redistributes the excess uniformly and turns the
/// CDF into a 0..=255 mapping.
fn build_lut(hist: &mut [u32; BINS], area: u32, lut: &mut [u8; BINS]) {
    let limit = ((CLIP_LIMIT * area as f32 / BINS as f32) as u32).max(1);
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    let bonus = excess / BINS as u32;
    for count in hist.iter_mut() {
        *count += bonus;
    }
    // Spread the integer remainder over evenly spaced bins so no mass is
    // lost on small tiles.
    let mut residual = (excess % BINS as u32) as usize;
    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut i = 0;
        while i < BINS && residual > 0 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }

    let scale = 255.0 / area as f32;
    let mut cumulative = 0u32;
    for (value, count) in hist.iter().enumerate() {
        cumulative += count;
        lut[value] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
}

/// Blend coordinates for a pixel: the two neighbouring tile indices along
/// one axis and the interpolation weight between them. Pixels outside the
/// first/last tile centers clamp to the border mapping.
fn tile_blend(p: u32, tile: u32, grid: u32) -> (u32, u32, f32) {
    let g = (p as f32 + 0.5) / tile as f32 - 0.5;
    if g <= 0.0 {
        return (0, 0, 0.0);
    }
    let last = (grid - 1) as f32;
    if g >= last {
        return (grid - 1, grid - 1, 0.0);
    }
    let i0 = g.floor();
    (i0 as u32, i0 as u32 + 1, g - i0)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// sRGB (D65) <-> CIE L*a*b* conversions.

fn srgb_to_lab(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let rl = srgb_to_linear(r as f32 / 255.0);
    let gl = srgb_to_linear(g as f32 / 255.0);
    let bl = srgb_to_linear(b as f32 / 255.0);

    let x = (0.4124564 * rl + 0.3575761 * gl + 0.1804375 * bl) / 0.95047;
    let y = 0.2126729 * rl + 0.7151522 * gl + 0.0721750 * bl;
    let z = (0.0193339 * rl + 0.1191920 * gl + 0.9503041 * bl) / 1.08883;

    let fx = lab_f(x);
    let fy = lab_f(y);
    let fz = lab_f(z);

    (116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

fn lab_to_srgb(l: f32, a: f32, b: f32) -> [u8; 3] {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let x = lab_f_inv(fx) * 0.95047;
    let y = lab_f_inv(fy);
    let z = lab_f_inv(fz) * 1.08883;

    let rl = 3.2404542 * x - 1.5371385 * y - 0.4985314 * z;
    let gl = -0.9692660 * x + 1.8760108 * y + 0.0415560 * z;
    let bl = 0.0556434 * x - 0.2040259 * y + 1.0572252 * z;

    [
        (linear_to_srgb(rl) * 255.0).round().clamp(0.0, 255.0) as u8,
        (linear_to_srgb(gl) * 255.0).round().clamp(0.0, 255.0) as u8,
        (linear_to_srgb(bl) * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

const EPSILON: f32 = 216.0 / 24389.0;
const KAPPA: f32 = 24389.0 / 27.0;

fn lab_f(t: f32) -> f32 {
    if t > EPSILON {
        t.cbrt()
    } else {
        (KAPPA * t + 16.0) / 116.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    let cubed = t * t * t;
    if cubed > EPSILON {
        cubed
    } else {
        (116.0 * t - 16.0) / KAPPA
    }
}
