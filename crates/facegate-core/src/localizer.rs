//! Multi-scale frontal face localization with a Haar cascade.
//!
//! Scans an image pyramid with the cascade's base window, then merges raw
//! hits into faces by neighbor voting (OpenCV `groupRectangles` semantics).

use crate::cascade::{CascadeError, HaarCascade, IntegralImage};
use crate::preprocess;
use crate::types::Region;
use image::{GrayImage, RgbImage};
use std::path::Path;

// --- Named constants (no magic numbers) ---
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: usize = 5;
const DEFAULT_MIN_FACE_SIZE: u32 = 100;
const GROUP_EPS: f64 = 0.2;

/// Finds candidate face regions in a frame. Zero regions is a valid answer.
pub trait FaceLocalizer {
    fn locate(&self, frame: &RgbImage) -> Vec<Region>;
}

/// Pyramid and grouping parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizerParams {
    /// Pyramid step between scales; must be > 1.
    pub scale_factor: f64,
    /// Raw hits a face needs beyond the first before it is reported. 0 disables grouping.
    pub min_neighbors: usize,
    /// Smallest face edge, in frame pixels.
    pub min_size: u32,
}

impl Default for LocalizerParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

/// Haar cascade face localizer.
pub struct HaarLocalizer {
    cascade: HaarCascade,
    params: LocalizerParams,
}

impl HaarLocalizer {
    pub fn new(cascade: HaarCascade, params: LocalizerParams) -> Self {
        Self { cascade, params }
    }

    /// Load an OpenCV cascade XML file.
    pub fn load(path: impl AsRef<Path>, params: LocalizerParams) -> Result<Self, CascadeError> {
        Ok(Self::new(HaarCascade::load(path)?, params))
    }

    pub fn params(&self) -> &LocalizerParams {
        &self.params
    }

    /// Detect faces in a grayscale image.
    pub fn detect_gray(&self, gray: &GrayImage) -> Vec<Region> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = self.cascade.window_size();
        let scale_factor = self.params.scale_factor.max(1.0 + f64::EPSILON);

        let mut raw = Vec::new();
        let mut levels = 0usize;
        let mut factor = 1.0f64;

        loop {
            let level_w = (img_w as f64 / factor).round() as u32;
            let level_h = (img_h as f64 / factor).round() as u32;
            if level_w < win_w || level_h < win_h {
                break;
            }

            let face_w = (win_w as f64 * factor).round() as u32;
            let face_h = (win_h as f64 * factor).round() as u32;
            if face_w < self.params.min_size || face_h < self.params.min_size {
                factor *= scale_factor;
                continue;
            }

            let level = if level_w == img_w && level_h == img_h {
                gray.clone()
            } else {
                preprocess::resize_bilinear(gray, level_w, level_h)
            };
            let integral = IntegralImage::new(&level);
            let step = if factor > 2.0 { 1 } else { 2 };

            for y in (0..=level_h - win_h).step_by(step) {
                for x in (0..=level_w - win_w).step_by(step) {
                    if self.cascade.classify(&integral, x, y) {
                        raw.push(Region::new(
                            (x as f64 * factor).round() as u32,
                            (y as f64 * factor).round() as u32,
                            face_w,
                            face_h,
                        ));
                    }
                }
            }

            levels += 1;
            factor *= scale_factor;
        }

        let grouped = group_rectangles(&raw, self.params.min_neighbors, GROUP_EPS);
        let faces: Vec<Region> = grouped
            .into_iter()
            .filter_map(|r| clamp_to_frame(r, img_w, img_h))
            .collect();

        tracing::debug!(
            width = img_w,
            height = img_h,
            levels,
            raw_hits = raw.len(),
            faces = faces.len(),
            "cascade scan complete"
        );

        faces
    }
}

impl FaceLocalizer for HaarLocalizer {
    fn locate(&self, frame: &RgbImage) -> Vec<Region> {
        self.detect_gray(&preprocess::to_grayscale(frame))
    }
}

fn clamp_to_frame(r: Region, width: u32, height: u32) -> Option<Region> {
    if r.x >= width || r.y >= height {
        return None;
    }
    let w = r.width.min(width - r.x);
    let h = r.height.min(height - r.y);
    (w > 0 && h > 0).then(|| Region::new(r.x, r.y, w, h))
}

/// Whether two raw hits belong to the same face.
fn similar(a: &Region, b: &Region, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Cluster equivalent hits; labels are numbered in order of first appearance.
fn partition(rects: &[Region], eps: f64) -> (Vec<usize>, usize) {
    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = rj.min(ri);
                }
            }
        }
    }

    let mut label_of_root = vec![usize::MAX; n];
    let mut labels = vec![0; n];
    let mut classes = 0;
    for i in 0..n {
        let root = find(&mut parent, i);
        if label_of_root[root] == usize::MAX {
            label_of_root[root] = classes;
            classes += 1;
        }
        labels[i] = label_of_root[root];
    }
    (labels, classes)
}

/// Merge raw detections into averaged faces, keeping clusters with more than
/// `group_threshold` members and dropping small faces nested inside stronger ones.
pub fn group_rectangles(rects: &[Region], group_threshold: usize, eps: f64) -> Vec<Region> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let (labels, classes) = partition(rects, eps);
    let mut sums = vec![[0u64; 4]; classes];
    let mut counts = vec![0usize; classes];
    for (r, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += r.x as u64;
        s[1] += r.y as u64;
        s[2] += r.width as u64;
        s[3] += r.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<Region> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let avg = |v: u64| (v as f64 / n as f64).round() as u32;
            Region::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut faces = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }

        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            faces.push(*r1);
        }
    }
    faces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::tests::center_block_cascade;
    use image::{Luma, Rgb};

    fn r(x: u32, y: u32, w: u32, h: u32) -> Region {
        Region::new(x, y, w, h)
    }

    /// 64×64 dark image with a bright 16×16 square at (24, 24).
    fn square_image() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let inside = (24..40).contains(&x) && (24..40).contains(&y);
            Luma([if inside { 200 } else { 0 }])
        })
    }

    fn exact_params() -> LocalizerParams {
        LocalizerParams {
            scale_factor: 2.0,
            min_neighbors: 0,
            min_size: 0,
        }
    }

    #[test]
    fn test_default_params() {
        let p = LocalizerParams::default();
        assert_eq!(p.scale_factor, 1.1);
        assert_eq!(p.min_neighbors, 5);
        assert_eq!(p.min_size, 100);
    }

    #[test]
    fn test_detects_block_at_matching_scale() {
        let localizer = HaarLocalizer::new(center_block_cascade(), exact_params());
        // At factor 4 the square becomes the cascade's 4×4 center block.
        assert_eq!(localizer.detect_gray(&square_image()), vec![r(16, 16, 32, 32)]);
    }

    #[test]
    fn test_locate_converts_rgb() {
        let localizer = HaarLocalizer::new(center_block_cascade(), exact_params());
        let gray = square_image();
        let frame = RgbImage::from_fn(64, 64, |x, y| {
            let v = gray.get_pixel(x, y)[0];
            Rgb([v, v, v])
        });
        assert_eq!(localizer.locate(&frame), vec![r(16, 16, 32, 32)]);
    }

    #[test]
    fn test_blank_frame_has_no_faces() {
        let localizer = HaarLocalizer::new(center_block_cascade(), exact_params());
        assert!(localizer.detect_gray(&GrayImage::new(64, 64)).is_empty());
    }

    #[test]
    fn test_min_size_filters_small_scales() {
        let params = LocalizerParams { min_size: 40, ..exact_params() };
        let localizer = HaarLocalizer::new(center_block_cascade(), params);
        assert!(localizer.detect_gray(&square_image()).is_empty());
    }

    #[test]
    fn test_min_neighbors_rejects_lone_hit() {
        let params = LocalizerParams { min_neighbors: 1, ..exact_params() };
        let localizer = HaarLocalizer::new(center_block_cascade(), params);
        assert!(localizer.detect_gray(&square_image()).is_empty());
    }

    #[test]
    fn test_frame_smaller_than_window() {
        let localizer = HaarLocalizer::new(center_block_cascade(), exact_params());
        assert!(localizer.detect_gray(&GrayImage::new(5, 5)).is_empty());
    }

    #[test]
    fn test_group_rectangles_merges_cluster() {
        let hits = vec![
            r(100, 100, 50, 50),
            r(102, 101, 50, 50),
            r(98, 99, 52, 52),
            r(300, 300, 50, 50),
        ];
        let faces = group_rectangles(&hits, 2, GROUP_EPS);
        // The lone hit at (300, 300) is below the neighbor threshold.
        assert_eq!(faces, vec![r(100, 100, 51, 51)]);
    }

    #[test]
    fn test_group_rectangles_keeps_separate_faces() {
        let hits = vec![
            r(10, 10, 40, 40),
            r(11, 10, 40, 40),
            r(200, 10, 40, 40),
            r(201, 11, 40, 40),
        ];
        let faces = group_rectangles(&hits, 1, GROUP_EPS);
        assert_eq!(faces.len(), 2);
    }

    #[test]
    fn test_group_rectangles_drops_nested_face() {
        let mut hits = vec![r(100, 100, 100, 100); 6];
        hits.extend(vec![r(130, 130, 30, 30); 2]);
        let faces = group_rectangles(&hits, 1, GROUP_EPS);
        assert_eq!(faces, vec![r(100, 100, 100, 100)]);
    }

    #[test]
    fn test_group_rectangles_zero_threshold_passthrough() {
        let hits = vec![r(0, 0, 10, 10), r(1, 1, 10, 10)];
        assert_eq!(group_rectangles(&hits, 0, GROUP_EPS), hits);
    }

    #[test]
    fn test_clamp_to_frame() {
        assert_eq!(clamp_to_frame(r(60, 60, 10, 10), 64, 64), Some(r(60, 60, 4, 4)));
        assert_eq!(clamp_to_frame(r(64, 0, 10, 10), 64, 64), None);
    }
}
