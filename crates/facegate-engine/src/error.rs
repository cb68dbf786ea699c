use facegate_core::{CascadeError, DescriptorError};
use facegate_store::StoreError;
use thiserror::Error;

/// Why an enroll or authenticate call failed.
///
/// Every variant is terminal for the call; the engine never retries. Callers
/// decide user-facing wording and transport status codes.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no face detected; make sure the face is clearly visible")]
    NoFaceDetected,
    #[error("{count} faces detected; only one person at a time")]
    MultipleFacesDetected { count: usize },
    #[error("could not extract face features: {0}")]
    FeatureExtractionFailed(#[source] DescriptorError),
    #[error("{0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("this face is already registered as {0:?}")]
    AlreadyRegisteredAs(String),
    #[error("no identities enrolled; register first")]
    NoIdentitiesEnrolled,
    #[error("face not recognized (best similarity {similarity:.2})")]
    NotRecognized { similarity: f32 },
    #[error("invalid identity name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("identity store: {0}")]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ServiceUnavailable,
}

impl AuthError {
    /// True when capturing a new frame might succeed where this one failed.
    pub fn suggests_recapture(&self) -> bool {
        matches!(
            self,
            AuthError::NoFaceDetected
                | AuthError::MultipleFacesDetected { .. }
                | AuthError::FeatureExtractionFailed(_)
        )
    }
}

/// Failure to assemble an engine from configuration.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("face cascade: {0}")]
    Cascade(#[from] CascadeError),
    #[error("identity store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recapture_hint() {
        assert!(AuthError::NoFaceDetected.suggests_recapture());
        assert!(AuthError::MultipleFacesDetected { count: 2 }.suggests_recapture());
        assert!(AuthError::FeatureExtractionFailed(DescriptorError::ZeroNorm).suggests_recapture());
        assert!(!AuthError::NotRecognized { similarity: 0.4 }.suggests_recapture());
        assert!(!AuthError::AlreadyRegistered("alice".into()).suggests_recapture());
    }

    #[test]
    fn test_messages_name_the_identity() {
        let msg = AuthError::AlreadyRegisteredAs("alice".into()).to_string();
        assert_eq!(msg, "this face is already registered as \"alice\"");
        let msg = AuthError::NotRecognized { similarity: 0.5 }.to_string();
        assert_eq!(msg, "face not recognized (best similarity 0.50)");
    }
}
