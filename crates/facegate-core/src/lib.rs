//! facegate-core — Face localization and description.
//!
//! Localizes frontal faces with a Haar cascade (OpenCV XML models) and
//! describes a single face crop with a histogram of oriented gradients.
//! Everything here is a pure function of pixels; persistence and the
//! enrollment policy live in `facegate-store` and `facegate-engine`.

pub mod cascade;
pub mod descriptor;
pub mod localizer;
pub mod matcher;
pub mod preprocess;
pub mod types;

pub use cascade::{CascadeError, HaarCascade};
pub use descriptor::{DescriptorError, DescriptorExtractor, HogExtractor, DESCRIPTOR_DIM};
pub use localizer::{FaceLocalizer, HaarLocalizer, LocalizerParams};
pub use matcher::{Candidate, CosineMatcher, Matcher};
pub use types::{Descriptor, Identity, Region, Snapshot};
