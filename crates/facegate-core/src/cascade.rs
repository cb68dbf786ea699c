//! Boosted Haar cascade classifier (Viola–Jones).
//!
//! Loads pretrained cascades in the OpenCV XML format (`stageType BOOST`,
//! `featureType HAAR`) and evaluates them on integral images with per-window
//! variance normalization.

use image::GrayImage;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cascade XML: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("invalid cascade: {0}")]
    Invalid(String),
}

/// A weighted rectangle of a Haar feature, relative to the detection window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

/// Haar-like feature: weighted sum of rectangle sums.
#[derive(Debug, Clone, PartialEq)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

/// Decision tree node. Child indices `<= 0` point at leaf `-child`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeNode {
    pub left: i32,
    pub right: i32,
    pub feature: usize,
    pub threshold: f32,
}

/// Weak classifier: a (usually depth-1) decision tree over features.
#[derive(Debug, Clone, PartialEq)]
pub struct WeakClassifier {
    pub nodes: Vec<TreeNode>,
    pub leaves: Vec<f32>,
}

impl WeakClassifier {
    /// Single-split classifier: `below` if the feature value is under `threshold`, else `above`.
    pub fn stump(feature: usize, threshold: f32, below: f32, above: f32) -> Self {
        Self {
            nodes: vec![TreeNode { left: 0, right: -1, feature, threshold }],
            leaves: vec![below, above],
        }
    }

    fn evaluate(&self, mut feature_value: impl FnMut(usize) -> f64) -> f32 {
        let mut idx = 0i32;
        loop {
            let node = &self.nodes[idx as usize];
            idx = if feature_value(node.feature) < node.threshold as f64 {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                return self.leaves[(-idx) as usize];
            }
        }
    }
}

/// Boosted stage: rejects the window if the weak-classifier sum is below `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

/// Validated Haar cascade.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    /// Build a cascade, validating every index and rectangle.
    pub fn new(
        window_width: u32,
        window_height: u32,
        stages: Vec<Stage>,
        features: Vec<HaarFeature>,
    ) -> Result<Self, CascadeError> {
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Invalid(format!(
                "window {window_width}x{window_height} is too small"
            )));
        }
        if stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }

        for (fi, feature) in features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(CascadeError::Invalid(format!("feature {fi} has no rectangles")));
            }
            for r in &feature.rects {
                if r.x + r.width > window_width || r.y + r.height > window_height {
                    return Err(CascadeError::Invalid(format!(
                        "feature {fi} rectangle {},{} {}x{} exceeds the {window_width}x{window_height} window",
                        r.x, r.y, r.width, r.height
                    )));
                }
            }
        }

        for (si, stage) in stages.iter().enumerate() {
            for (wi, weak) in stage.classifiers.iter().enumerate() {
                validate_tree(weak, features.len())
                    .map_err(|msg| CascadeError::Invalid(format!("stage {si} classifier {wi}: {msg}")))?;
            }
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    /// Load an OpenCV cascade XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let cascade = Self::from_xml(&xml)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window_size(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse an OpenCV cascade from XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let storage: xml::Storage = quick_xml::de::from_str(xml)?;
        storage.cascade.into_cascade()
    }

    /// Base detection window (width, height).
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage on the window whose top-left corner is at (`x`, `y`).
    ///
    /// The caller guarantees the window fits inside the integral image.
    pub fn classify(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let (ww, wh) = (self.window_width, self.window_height);

        // Variance normalization over the window shrunk by one pixel on each side.
        let area = ((ww - 2) * (wh - 2)) as f64;
        let sum = integral.sum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let sqsum = integral.sqsum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let variance = area * sqsum - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        let feature_value = |fi: usize| -> f64 {
            let value: f64 = self.features[fi]
                .rects
                .iter()
                .map(|r| r.weight as f64 * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
                .sum();
            value / norm
        };

        self.stages.iter().all(|stage| {
            let total: f32 = stage
                .classifiers
                .iter()
                .map(|weak| weak.evaluate(&feature_value))
                .sum();
            total >= stage.threshold
        })
    }
}

fn validate_tree(weak: &WeakClassifier, feature_count: usize) -> Result<(), String> {
    if weak.nodes.is_empty() {
        return Err("no tree nodes".into());
    }
    let check_child = |child: i32| -> Result<(), String> {
        if child > 0 {
            if child as usize >= weak.nodes.len() {
                return Err(format!("node index {child} out of range"));
            }
        } else if (-child) as usize >= weak.leaves.len() {
            return Err(format!("leaf index {} out of range", -child));
        }
        Ok(())
    };
    for (ni, node) in weak.nodes.iter().enumerate() {
        if node.feature >= feature_count {
            return Err(format!("node {ni} references missing feature {}", node.feature));
        }
        // Children must point forward so evaluation always terminates.
        for child in [node.left, node.right] {
            check_child(child)?;
            if child > 0 && child as usize <= ni {
                return Err(format!("node {ni} points back to node {child}"));
            }
        }
    }
    Ok(())
}

/// Summed-area tables of pixel values and squared pixel values.
pub struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sqsum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sqsum = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sqsum = 0u64;
            for x in 0..w {
                let p = raw[y * w + x] as u64;
                row_sum += p;
                row_sqsum += p * p;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row_sum;
                sqsum[idx] = sqsum[idx - stride] + row_sqsum;
            }
        }

        Self { stride, sum, sqsum }
    }

    pub fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        rect_total(&self.sum, self.stride, x, y, w, h)
    }

    pub fn sqsum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        rect_total(&self.sqsum, self.stride, x, y, w, h)
    }
}

fn rect_total(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
    let (x0, y0) = (x as usize, y as usize);
    let (x1, y1) = (x0 + w as usize, y0 + h as usize);
    table[y1 * stride + x1] + table[y0 * stride + x0] - table[y1 * stride + x0] - table[y0 * stride + x1]
}

/// Serde mirror of the OpenCV `opencv_storage` cascade layout.
mod xml {
    use super::*;

    #[derive(Deserialize)]
    pub(super) struct Storage {
        pub cascade: CascadeNode,
    }

    #[derive(Deserialize)]
    pub(super) struct CascadeNode {
        #[serde(rename = "stageType")]
        stage_type: String,
        #[serde(rename = "featureType")]
        feature_type: String,
        height: u32,
        width: u32,
        stages: List<StageNode>,
        features: List<FeatureNode>,
    }

    /// OpenCV serializes sequences as repeated `<_>` children.
    #[derive(Deserialize)]
    struct List<T> {
        #[serde(rename = "_", default = "Vec::new")]
        items: Vec<T>,
    }

    #[derive(Deserialize)]
    struct StageNode {
        #[serde(rename = "stageThreshold")]
        threshold: f32,
        #[serde(rename = "weakClassifiers")]
        classifiers: List<WeakNode>,
    }

    #[derive(Deserialize)]
    struct WeakNode {
        #[serde(rename = "internalNodes")]
        internal_nodes: String,
        #[serde(rename = "leafValues")]
        leaf_values: String,
    }

    #[derive(Deserialize)]
    struct FeatureNode {
        rects: List<String>,
        #[serde(default)]
        tilted: Option<u8>,
    }

    impl CascadeNode {
        pub(super) fn into_cascade(self) -> Result<HaarCascade, CascadeError> {
            if self.stage_type.trim() != "BOOST" {
                return Err(CascadeError::Unsupported(format!(
                    "stage type {:?} (only BOOST)",
                    self.stage_type.trim()
                )));
            }
            if self.feature_type.trim() != "HAAR" {
                return Err(CascadeError::Unsupported(format!(
                    "feature type {:?} (only HAAR)",
                    self.feature_type.trim()
                )));
            }

            let features = self
                .features
                .items
                .into_iter()
                .enumerate()
                .map(|(i, f)| f.into_feature(i))
                .collect::<Result<Vec<_>, _>>()?;

            let stages = self
                .stages
                .items
                .into_iter()
                .enumerate()
                .map(|(i, s)| s.into_stage(i))
                .collect::<Result<Vec<_>, _>>()?;

            HaarCascade::new(self.width, self.height, stages, features)
        }
    }

    impl StageNode {
        fn into_stage(self, index: usize) -> Result<Stage, CascadeError> {
            let classifiers = self
                .classifiers
                .items
                .into_iter()
                .map(|w| w.into_classifier())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CascadeError::Invalid(format!("stage {index}: {e}")))?;
            Ok(Stage {
                threshold: self.threshold,
                classifiers,
            })
        }
    }

    impl WeakNode {
        fn into_classifier(self) -> Result<WeakClassifier, String> {
            let tokens: Vec<&str> = self.internal_nodes.split_whitespace().collect();
            if tokens.is_empty() || tokens.len() % 4 != 0 {
                return Err(format!(
                    "internalNodes has {} values, expected groups of 4",
                    tokens.len()
                ));
            }
            let nodes = tokens
                .chunks_exact(4)
                .map(|t| {
                    Ok(TreeNode {
                        left: parse(t[0])?,
                        right: parse(t[1])?,
                        feature: parse(t[2])?,
                        threshold: parse(t[3])?,
                    })
                })
                .collect::<Result<Vec<_>, String>>()?;
            let leaves = self
                .leaf_values
                .split_whitespace()
                .map(parse)
                .collect::<Result<Vec<f32>, _>>()?;
            Ok(WeakClassifier { nodes, leaves })
        }
    }

    impl FeatureNode {
        fn into_feature(self, index: usize) -> Result<HaarFeature, CascadeError> {
            if self.tilted.unwrap_or(0) != 0 {
                return Err(CascadeError::Unsupported(format!("feature {index} is tilted")));
            }
            let rects = self
                .rects
                .items
                .iter()
                .map(|r| {
                    let t: Vec<&str> = r.split_whitespace().collect();
                    if t.len() != 5 {
                        return Err(format!("rect {r:?} needs 5 values"));
                    }
                    Ok(WeightedRect {
                        x: parse(t[0])?,
                        y: parse(t[1])?,
                        width: parse(t[2])?,
                        height: parse(t[3])?,
                        weight: parse(t[4])?,
                    })
                })
                .collect::<Result<Vec<_>, String>>()
                .map_err(|e| CascadeError::Invalid(format!("feature {index}: {e}")))?;
            Ok(HaarFeature { rects })
        }
    }

    fn parse<T: std::str::FromStr>(token: &str) -> Result<T, String> {
        token
            .parse()
            .map_err(|_| format!("cannot parse {token:?}"))
    }
}
