//! Histogram-of-oriented-gradients face descriptor.
//!
//! The face crop is converted to grayscale and resized to a canonical 96×96
//! window, then described by 9-bin unsigned gradient orientation histograms
//! over 8×8 cells, grouped into 16×16 blocks with an 8×8 stride and
//! L2-Hys normalized per block.

use crate::preprocess;
use crate::types::{Descriptor, Region};
use image::{GrayImage, RgbImage};
use std::f32::consts::PI;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const HOG_WINDOW: usize = 96;
const HOG_BLOCK: usize = 16;
const HOG_BLOCK_STRIDE: usize = 8;
const HOG_CELL: usize = 8;
const HOG_BINS: usize = 9;
const HOG_L2HYS_CLIP: f32 = 0.2;

const CELLS_PER_BLOCK: usize = HOG_BLOCK / HOG_CELL;
const BLOCKS_PER_SIDE: usize = (HOG_WINDOW - HOG_BLOCK) / HOG_BLOCK_STRIDE + 1;
const BLOCK_LEN: usize = CELLS_PER_BLOCK * CELLS_PER_BLOCK * HOG_BINS;

/// Length of every descriptor produced by [`HogExtractor`] (11 × 11 blocks × 36).
pub const DESCRIPTOR_DIM: usize = BLOCKS_PER_SIDE * BLOCKS_PER_SIDE * BLOCK_LEN;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("region {x},{y} {width}x{height} is empty or outside the {frame_width}x{frame_height} frame")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("face crop has no gradient structure (descriptor norm is zero)")]
    ZeroNorm,
    #[error("descriptor contains non-finite values")]
    NonFinite,
}

/// Turns one face region of a frame into a fixed-length descriptor.
pub trait DescriptorExtractor {
    fn extract(&self, frame: &RgbImage, region: &Region) -> Result<Descriptor, DescriptorError>;

    /// Number of components in every descriptor this extractor returns.
    fn dimension(&self) -> usize;
}

/// Per-pixel vote target inside a block: up to two cells per axis.
#[derive(Clone, Copy)]
struct CellVote {
    cell: usize,
    weight: f32,
}

/// HOG extractor with fixed 96×96 geometry.
///
/// Vote weights for a block (Gaussian window times bilinear cell weights) are
/// identical for every block, so they are computed once here.
pub struct HogExtractor {
    block_votes: Vec<Vec<CellVote>>,
}

impl HogExtractor {
    pub fn new() -> Self {
        let sigma = (HOG_BLOCK + HOG_BLOCK) as f32 / 8.0;
        let center = (HOG_BLOCK as f32 - 1.0) / 2.0;
        let mut block_votes = Vec::with_capacity(HOG_BLOCK * HOG_BLOCK);

        for py in 0..HOG_BLOCK {
            for px in 0..HOG_BLOCK {
                let dx = px as f32 - center;
                let dy = py as f32 - center;
                let gauss = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();

                let ys = axis_weights(py);
                let xs = axis_weights(px);
                let mut votes = Vec::with_capacity(4);
                for &(cy, wy) in ys.iter().flatten() {
                    for &(cx, wx) in xs.iter().flatten() {
                        votes.push(CellVote {
                            cell: cy * CELLS_PER_BLOCK + cx,
                            weight: gauss * wy * wx,
                        });
                    }
                }
                block_votes.push(votes);
            }
        }

        Self { block_votes }
    }

    /// Describe an already-cropped grayscale face.
    pub fn describe(&self, face: &GrayImage) -> Result<Descriptor, DescriptorError> {
        let window = preprocess::resize_bilinear(face, HOG_WINDOW as u32, HOG_WINDOW as u32);
        let gradients = Gradients::compute(&window);

        let mut values = Vec::with_capacity(DESCRIPTOR_DIM);
        let mut block = [0.0f32; BLOCK_LEN];

        for by in 0..BLOCKS_PER_SIDE {
            for bx in 0..BLOCKS_PER_SIDE {
                block.fill(0.0);
                let (ox, oy) = (bx * HOG_BLOCK_STRIDE, by * HOG_BLOCK_STRIDE);

                for py in 0..HOG_BLOCK {
                    for px in 0..HOG_BLOCK {
                        let g = gradients.at(ox + px, oy + py);
                        if g.magnitude == 0.0 {
                            continue;
                        }
                        for vote in &self.block_votes[py * HOG_BLOCK + px] {
                            let base = vote.cell * HOG_BINS;
                            let w = g.magnitude * vote.weight;
                            block[base + g.bins.0] += w * (1.0 - g.frac);
                            block[base + g.bins.1] += w * g.frac;
                        }
                    }
                }

                normalize_l2hys(&mut block);
                values.extend_from_slice(&block);
            }
        }

        debug_assert_eq!(values.len(), DESCRIPTOR_DIM);

        if values.iter().any(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite);
        }
        if values.iter().all(|&v| v == 0.0) {
            return Err(DescriptorError::ZeroNorm);
        }

        Ok(Descriptor::new(values))
    }
}

impl Default for HogExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorExtractor for HogExtractor {
    fn extract(&self, frame: &RgbImage, region: &Region) -> Result<Descriptor, DescriptorError> {
        let face = preprocess::crop_grayscale(frame, region).ok_or_else(|| {
            DescriptorError::RegionOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                frame_width: frame.width(),
                frame_height: frame.height(),
            }
        })?;
        self.describe(&face)
    }

    fn dimension(&self) -> usize {
        DESCRIPTOR_DIM
    }
}

/// Bilinear weights of a block-relative pixel coordinate onto the block's cells.
fn axis_weights(p: usize) -> [Option<(usize, f32)>; 2] {
    let c = (p as f32 + 0.5) / HOG_CELL as f32 - 0.5;
    let c0 = c.floor();
    let frac = c - c0;
    let c0 = c0 as i32;

    let slot = |idx: i32, w: f32| {
        (idx >= 0 && (idx as usize) < CELLS_PER_BLOCK && w > 0.0).then_some((idx as usize, w))
    };
    [slot(c0, 1.0 - frac), slot(c0 + 1, frac)]
}

/// L2 normalize, clip, renormalize.
fn normalize_l2hys(block: &mut [f32]) {
    let sum: f32 = block.iter().map(|v| v * v).sum();
    let scale = 1.0 / (sum.sqrt() + block.len() as f32 * 0.1);
    let mut sum = 0.0f32;
    for v in block.iter_mut() {
        *v = (*v * scale).min(HOG_L2HYS_CLIP);
        sum += *v * *v;
    }
    let scale = 1.0 / (sum.sqrt() + 1e-3);
    for v in block.iter_mut() {
        *v *= scale;
    }
}

#[derive(Clone, Copy)]
struct Gradient {
    magnitude: f32,
    /// Lower and upper orientation bins the magnitude is split between.
    bins: (usize, usize),
    /// Share of the magnitude that goes to the upper bin.
    frac: f32,
}

/// Per-pixel gradient magnitude and orientation-bin split of a window.
struct Gradients {
    width: usize,
    cells: Vec<Gradient>,
}

impl Gradients {
    fn compute(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let raw = img.as_raw();
        let px = |x: usize, y: usize| raw[y * w + x] as f32;

        let mut cells = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                // Centered differences, replicated border.
                let dx = px((x + 1).min(w - 1), y) - px(x.saturating_sub(1), y);
                let dy = px(x, (y + 1).min(h - 1)) - px(x, y.saturating_sub(1));
                let magnitude = (dx * dx + dy * dy).sqrt();

                let mut angle = dy.atan2(dx);
                if angle < 0.0 {
                    angle += PI;
                }
                // Unsigned orientation; bin k is centered on (k + 0.5) * 180° / bins.
                let pos = angle * (HOG_BINS as f32 / PI) - 0.5;
                let lower = pos.floor();
                let frac = pos - lower;
                let lower = (lower as i32).rem_euclid(HOG_BINS as i32) as usize;
                let upper = (lower + 1) % HOG_BINS;

                cells.push(Gradient {
                    magnitude,
                    bins: (lower, upper),
                    frac,
                });
            }
        }

        Self { width: w, cells }
    }

    fn at(&self, x: usize, y: usize) -> Gradient {
        self.cells[y * self.width + x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn stripes(horizontal: bool, period: u32) -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| {
            let t = if horizontal { y } else { x };
            Luma([if (t / (period / 2)) % 2 == 0 { 40 } else { 220 }])
        })
    }

    #[test]
    fn test_descriptor_dim() {
        assert_eq!(DESCRIPTOR_DIM, 4356);
        let d = HogExtractor::new().describe(&stripes(true, 8)).unwrap();
        assert_eq!(d.len(), DESCRIPTOR_DIM);
    }

    #[test]
    fn test_deterministic() {
        let hog = HogExtractor::new();
        let img = GrayImage::from_fn(120, 80, |x, y| Luma([((x * 7 + y * 13) % 251) as u8]));
        let a = hog.describe(&img).unwrap();
        let b = hog.describe(&img).unwrap();
        assert_eq!(a, b);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_stripes_are_dissimilar() {
        let hog = HogExtractor::new();
        let h = hog.describe(&stripes(true, 8)).unwrap();
        let v = hog.describe(&stripes(false, 8)).unwrap();
        assert!(h.similarity(&v) < 0.5, "similarity = {}", h.similarity(&v));
    }

    #[test]
    fn test_brightness_shift_is_similar() {
        let hog = HogExtractor::new();
        let base = GrayImage::from_fn(96, 96, |x, y| Luma([(60 + (x + y) % 64) as u8]));
        let brighter = GrayImage::from_fn(96, 96, |x, y| Luma([(90 + (x + y) % 64) as u8]));
        let a = hog.describe(&base).unwrap();
        let b = hog.describe(&brighter).unwrap();
        assert!(a.similarity(&b) > 0.99);
    }

    #[test]
    fn test_flat_crop_fails() {
        let flat = GrayImage::from_pixel(96, 96, Luma([128]));
        assert_eq!(HogExtractor::new().describe(&flat), Err(DescriptorError::ZeroNorm));
    }

    #[test]
    fn test_extract_rejects_region_outside_frame() {
        let frame = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        let err = HogExtractor::new()
            .extract(&frame, &Region::new(40, 40, 20, 20))
            .unwrap_err();
        assert!(matches!(err, DescriptorError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn test_extract_crops_region() {
        let mut frame = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        for y in 50..146 {
            for x in 50..146 {
                let v = if ((y - 50) / 4) % 2 == 0 { 40 } else { 220 };
                frame.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        let hog = HogExtractor::new();
        let from_frame = hog.extract(&frame, &Region::new(50, 50, 96, 96)).unwrap();
        let direct = hog.describe(&stripes(true, 8)).unwrap();
        assert!((from_frame.similarity(&direct) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_block_is_l2hys_normalized() {
        let mut block = [0.0f32; BLOCK_LEN];
        block[0] = 10.0;
        block[1] = 1.0;
        normalize_l2hys(&mut block);
        let norm: f32 = block.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-2, "norm = {norm}");
        assert!(block[0] >= block[1]);
    }

    #[test]
    fn test_axis_weights_cover_block() {
        // Pixel next to the cell boundary votes into both cells.
        let [a, b] = axis_weights(HOG_CELL - 1);
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!((a.0, b.0), (0, 1));
        assert!((a.1 + b.1 - 1.0).abs() < 1e-6);
        // Outermost pixel only reaches its own cell.
        let [lo, hi] = axis_weights(0);
        assert!(lo.is_none());
        assert_eq!(hi.unwrap().0, 0);
    }
}
