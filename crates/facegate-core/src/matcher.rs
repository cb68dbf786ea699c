//! Probe-vs-gallery comparison.

use crate::types::{Descriptor, Snapshot};

/// Best-scoring gallery row for a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Row index in the snapshot (load order).
    pub index: usize,
    pub name: String,
    /// Cosine similarity of the probe against this row [-1, 1].
    pub similarity: f32,
}

/// Strategy for comparing a probe descriptor against enrolled identities.
pub trait Matcher {
    /// Highest-similarity row; ties go to the lowest index. `None` on an empty gallery.
    fn best_match(&self, probe: &Descriptor, gallery: &Snapshot) -> Option<Candidate>;

    /// First row, in load order, whose similarity is strictly above `threshold`.
    fn first_above(&self, probe: &Descriptor, gallery: &Snapshot, threshold: f32) -> Option<Candidate>;
}

/// Cosine similarity matcher. Always visits every gallery row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Descriptor, gallery: &Snapshot) -> Option<Candidate> {
        let mut best: Option<(usize, f32)> = None;

        for (i, sim) in gallery.similarities(probe).into_iter().enumerate() {
            // Strict comparison keeps the first index on ties.
            if best.map_or(true, |(_, s)| sim > s) {
                best = Some((i, sim));
            }
        }

        best.map(|(index, similarity)| Candidate {
            index,
            name: gallery.names()[index].clone(),
            similarity,
        })
    }

    fn first_above(&self, probe: &Descriptor, gallery: &Snapshot, threshold: f32) -> Option<Candidate> {
        gallery
            .similarities(probe)
            .into_iter()
            .enumerate()
            .find(|&(_, sim)| sim > threshold)
            .map(|(index, similarity)| Candidate {
                index,
                name: gallery.names()[index].clone(),
                similarity,
            })
    }
}
