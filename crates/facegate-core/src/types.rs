use ndarray::{Array2, ArrayView1};
use serde::Serialize;

/// Rectangular face region in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if the region is non-empty and lies entirely inside a `width`×`height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

/// Fixed-length face descriptor.
///
/// Immutable once built. Descriptors are only comparable with descriptors of
/// the same dimensionality; comparing mismatched lengths is a bug in the
/// caller and panics.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Zero when either vector has zero norm. Accumulates in f64 and in a
    /// fixed element order so that `a.similarity(b) == b.similarity(a)` exactly.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        cosine(&self.values, &other.values)
    }

    pub(crate) fn similarity_row(&self, row: ArrayView1<'_, f32>) -> f32 {
        match row.as_slice() {
            Some(slice) => cosine(&self.values, slice),
            None => cosine(&self.values, &row.to_vec()),
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "descriptor dimensionality mismatch: {} vs {}",
        a.len(),
        b.len()
    );

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// An enrolled identity: a unique name and its single descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub descriptor: Descriptor,
}

/// Read-only view of every enrolled identity, materialized per call.
///
/// `names[i]` owns row `i` of `descriptors`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    names: Vec<String>,
    descriptors: Array2<f32>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            names: Vec::new(),
            descriptors: Array2::zeros((0, 0)),
        }
    }

    /// Stack identities into a snapshot, preserving their order.
    ///
    /// Panics if the descriptors do not all share one dimensionality.
    pub fn from_identities<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        let mut names = Vec::new();
        let mut flat = Vec::new();
        let mut dim = None;

        for identity in identities {
            let len = identity.descriptor.len();
            let expected = *dim.get_or_insert(len);
            assert_eq!(
                expected, len,
                "descriptor for {:?} has {len} components, expected {expected}",
                identity.name
            );
            names.push(identity.name);
            flat.extend(identity.descriptor.into_vec());
        }

        let Some(dim) = dim else {
            return Self::empty();
        };

        let descriptors = Array2::from_shape_vec((names.len(), dim), flat)
            .expect("row-major buffer matches (rows, dim)");
        Self { names, descriptors }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn descriptors(&self) -> &Array2<f32> {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Similarity of `probe` against every row, in load order.
    pub fn similarities(&self, probe: &Descriptor) -> Vec<f32> {
        self.descriptors
            .rows()
            .into_iter()
            .map(|row| probe.similarity_row(row))
            .collect()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    #[test]
    fn test_similarity_identical() {
        assert!((d(&[1.0, 0.0, 0.0]).similarity(&d(&[1.0, 0.0, 0.0])) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        assert!(d(&[1.0, 0.0]).similarity(&d(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        assert!((d(&[1.0, 0.0]).similarity(&d(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        assert_eq!(d(&[0.0, 0.0]).similarity(&d(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_similarity_scale_invariant() {
        let a = d(&[1.0, 2.0, 3.0]);
        let b = d(&[10.0, 20.0, 30.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "dimensionality mismatch")]
    fn test_similarity_mismatched_length_panics() {
        d(&[1.0, 0.0]).similarity(&d(&[1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_region_fits_within() {
        assert!(Region::new(0, 0, 10, 10).fits_within(10, 10));
        assert!(!Region::new(1, 0, 10, 10).fits_within(10, 10));
        assert!(!Region::new(0, 0, 0, 10).fits_within(10, 10));
        assert!(!Region::new(u32::MAX, 0, 2, 2).fits_within(10, 10));
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let snapshot = Snapshot::from_identities(vec![
            Identity { name: "zoe".into(), descriptor: d(&[1.0, 0.0]) },
            Identity { name: "adam".into(), descriptor: d(&[0.0, 1.0]) },
        ]);
        assert_eq!(snapshot.names(), &["zoe".to_string(), "adam".to_string()]);
        assert_eq!(snapshot.descriptors().shape(), &[2, 2]);
        assert!(snapshot.contains("adam"));
        assert!(!snapshot.contains("Adam"));

        let sims = snapshot.similarities(&d(&[0.0, 2.0]));
        assert!(sims[0].abs() < 1e-6);
        assert!((sims[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_empty() {
        let snapshot = Snapshot::from_identities(Vec::new());
        assert!(snapshot.is_empty());
        assert!(snapshot.similarities(&d(&[1.0])).is_empty());
    }

    proptest! {
        #[test]
        fn prop_similarity_symmetric(
            pairs in proptest::collection::vec((-100.0f32..100.0, -100.0f32..100.0), 1..64)
        ) {
            let (a, b): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
            let (a, b) = (Descriptor::new(a), Descriptor::new(b));
            prop_assert_eq!(a.similarity(&b), b.similarity(&a));
        }

        #[test]
        fn prop_self_similarity_is_one(
            values in proptest::collection::vec(-100.0f32..100.0, 1..64)
        ) {
            prop_assume!(values.iter().any(|v| v.abs() > 1e-3));
            let a = Descriptor::new(values);
            prop_assert!((a.similarity(&a) - 1.0).abs() < 1e-5);
        }
    }
}
