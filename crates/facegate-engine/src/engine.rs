//! Enrollment and authentication policy.
//!
//! Per call: locate → require exactly one face → extract → compare against a
//! fresh store snapshot → decide. No state survives between calls except the
//! store itself.

use crate::config::Config;
use crate::error::{AuthError, StartupError};
use facegate_core::{
    Candidate, CosineMatcher, Descriptor, DescriptorExtractor, FaceLocalizer, HaarLocalizer,
    HogExtractor, Identity, Matcher,
};
use facegate_store::{IdentityStore, NpyStore, StoreError};
use image::RgbImage;
use std::sync::{Mutex, PoisonError};

// --- Named constants (no magic numbers) ---
const DEFAULT_AUTH_THRESHOLD: f32 = 0.85;
const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.95;
const MAX_NAME_CHARS: usize = 100;

/// Similarity cutoffs used by the decision policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// A probe is accepted when its best similarity is at or above this.
    pub auth: f32,
    /// An enrollment is rejected when any stored identity is strictly above this.
    pub duplicate: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auth: DEFAULT_AUTH_THRESHOLD,
            duplicate: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }
}

/// Engine wired with the production localizer, extractor and store.
pub type DefaultEngine = MatchEngine<HaarLocalizer, HogExtractor, NpyStore>;

/// Single-face enrollment/verification engine.
pub struct MatchEngine<L, X, S> {
    localizer: L,
    extractor: X,
    store: S,
    matcher: CosineMatcher,
    thresholds: Thresholds,
    /// Serializes writers within this process; the store's lock covers other processes.
    writer: Mutex<()>,
}

impl DefaultEngine {
    /// Load the cascade and open the store described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        config.validate()?;
        let localizer = HaarLocalizer::load(&config.cascade_path, config.localizer_params())?;
        let extractor = HogExtractor::new();
        let store = NpyStore::open(&config.store_dir, extractor.dimension())?;
        Ok(Self::new(localizer, extractor, store, config.thresholds()))
    }
}

impl<L, X, S> MatchEngine<L, X, S>
where
    L: FaceLocalizer,
    X: DescriptorExtractor,
    S: IdentityStore,
{
    pub fn new(localizer: L, extractor: X, store: S, thresholds: Thresholds) -> Self {
        Self {
            localizer,
            extractor,
            store,
            matcher: CosineMatcher,
            thresholds,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Locate exactly one face in `frame` and describe it.
    pub fn describe(&self, frame: &RgbImage) -> Result<Descriptor, AuthError> {
        let regions = self.localizer.locate(frame);
        let region = match regions.as_slice() {
            [] => return Err(AuthError::NoFaceDetected),
            [region] => *region,
            many => {
                return Err(AuthError::MultipleFacesDetected { count: many.len() });
            }
        };
        tracing::debug!(?region, "single face located");

        self.extractor
            .extract(frame, &region)
            .map_err(AuthError::FeatureExtractionFailed)
    }

    /// Enroll `name` with the face in `frame`.
    pub fn enroll(&self, name: &str, frame: &RgbImage) -> Result<Identity, AuthError> {
        validate_name(name)?;

        // Cheap rejection before any image processing.
        if self.store.load_all()?.contains(name) {
            tracing::warn!(name, "enroll rejected: name already registered");
            return Err(AuthError::AlreadyRegistered(name.to_string()));
        }

        let descriptor = self.describe(frame)?;

        let _local = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _store = self.store.lock_exclusive()?;

        // Re-read under the writer lock: another enroll may have landed since
        // the first snapshot.
        let snapshot = self.store.load_all()?;
        if snapshot.contains(name) {
            tracing::warn!(name, "enroll rejected: name registered concurrently");
            return Err(AuthError::AlreadyRegistered(name.to_string()));
        }
        if let Some(existing) =
            self.matcher
                .first_above(&descriptor, &snapshot, self.thresholds.duplicate)
        {
            tracing::warn!(
                name,
                existing = %existing.name,
                similarity = existing.similarity,
                "enroll rejected: face already registered"
            );
            return Err(AuthError::AlreadyRegisteredAs(existing.name));
        }

        self.store.save(name, &descriptor).map_err(|e| match e {
            StoreError::AlreadyExists(n) => AuthError::AlreadyRegistered(n),
            other => AuthError::Store(other),
        })?;

        tracing::info!(name, identities = snapshot.len() + 1, "enrolled identity");
        Ok(Identity {
            name: name.to_string(),
            descriptor,
        })
    }

    /// Caller-facing enrollment.
    pub fn register(&self, name: &str, frame: &RgbImage) -> Result<(), AuthError> {
        self.enroll(name, frame).map(|_| ())
    }

    /// Identify the face in `frame`, returning the best match and its similarity.
    pub fn authenticate_with_score(&self, frame: &RgbImage) -> Result<Candidate, AuthError> {
        let snapshot = self.store.load_all()?;
        if snapshot.is_empty() {
            return Err(AuthError::NoIdentitiesEnrolled);
        }

        let probe = self.describe(frame)?;
        let best = self
            .matcher
            .best_match(&probe, &snapshot)
            .ok_or(AuthError::NoIdentitiesEnrolled)?;

        if best.similarity >= self.thresholds.auth {
            tracing::info!(name = %best.name, similarity = best.similarity, "authenticated");
            Ok(best)
        } else {
            tracing::warn!(
                similarity = best.similarity,
                threshold = self.thresholds.auth,
                "authentication failed: best match below threshold"
            );
            Err(AuthError::NotRecognized {
                similarity: best.similarity,
            })
        }
    }

    /// Caller-facing authentication: the matched identity's name.
    pub fn authenticate(&self, frame: &RgbImage) -> Result<String, AuthError> {
        self.authenticate_with_score(frame).map(|c| c.name)
    }

    /// Names of every enrolled identity, in load order.
    pub fn identities(&self) -> Result<Vec<String>, AuthError> {
        Ok(self.store.load_all()?.names().to_vec())
    }

    /// Delete an identity. Returns whether it existed.
    pub fn remove(&self, name: &str) -> Result<bool, AuthError> {
        validate_name(name)?;
        let _local = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _store = self.store.lock_exclusive()?;
        let removed = self.store.remove(name)?;
        if removed {
            tracing::info!(name, "removed identity");
        }
        Ok(removed)
    }
}

/// Check that `name` can serve as an identity's primary key and file name.
pub fn validate_name(name: &str) -> Result<(), AuthError> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name.chars().count() > MAX_NAME_CHARS {
        Some("longer than 100 characters")
    } else if name.starts_with('.') {
        Some("starts with '.'")
    } else if name.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if name.chars().any(char::is_control) {
        Some("contains control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(AuthError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
