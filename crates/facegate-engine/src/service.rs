//! Async front for the engine.
//!
//! Detection and extraction are CPU-bound and synchronous, so the engine lives
//! on a dedicated OS thread and async callers talk to it over a channel.

use crate::engine::MatchEngine;
use crate::error::{AuthError, StartupError};
use facegate_core::{Candidate, DescriptorExtractor, FaceLocalizer};
use facegate_store::IdentityStore;
use image::RgbImage;
use tokio::sync::{mpsc, oneshot};

const REQUEST_QUEUE_DEPTH: usize = 4;

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Register {
        name: String,
        frame: RgbImage,
        reply: oneshot::Sender<Result<(), AuthError>>,
    },
    Authenticate {
        frame: RgbImage,
        reply: oneshot::Sender<Result<Candidate, AuthError>>,
    },
    Identities {
        reply: oneshot::Sender<Result<Vec<String>, AuthError>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<bool, AuthError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll `name` with the face in `frame`.
    pub async fn register(&self, name: impl Into<String>, frame: RgbImage) -> Result<(), AuthError> {
        let name = name.into();
        self.call(|reply| EngineRequest::Register { name, frame, reply })
            .await
    }

    /// Identify the face in `frame`.
    pub async fn authenticate(&self, frame: RgbImage) -> Result<Candidate, AuthError> {
        self.call(|reply| EngineRequest::Authenticate { frame, reply })
            .await
    }

    pub async fn identities(&self) -> Result<Vec<String>, AuthError> {
        self.call(|reply| EngineRequest::Identities { reply }).await
    }

    pub async fn remove(&self, name: impl Into<String>) -> Result<bool, AuthError> {
        let name = name.into();
        self.call(|reply| EngineRequest::Remove { name, reply }).await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<Result<T, AuthError>>) -> EngineRequest,
    ) -> Result<T, AuthError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| AuthError::ServiceUnavailable)?;
        reply_rx.await.map_err(|_| AuthError::ServiceUnavailable)?
    }
}

/// Move `engine` onto a dedicated OS thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_engine<L, X, S>(engine: MatchEngine<L, X, S>) -> Result<EngineHandle, StartupError>
where
    L: FaceLocalizer + Send + 'static,
    X: DescriptorExtractor + Send + 'static,
    S: IdentityStore + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(REQUEST_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { name, frame, reply } => {
                        let _ = reply.send(engine.register(&name, &frame));
                    }
                    EngineRequest::Authenticate { frame, reply } => {
                        let _ = reply.send(engine.authenticate_with_score(&frame));
                    }
                    EngineRequest::Identities { reply } => {
                        let _ = reply.send(engine.identities());
                    }
                    EngineRequest::Remove { name, reply } => {
                        let _ = reply.send(engine.remove(&name));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(StartupError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{engine, frame, ALICE, BOB, HALF_ALICE};

    #[tokio::test]
    async fn test_register_and_authenticate_through_handle() {
        let (engine, store) = engine();
        let handle = spawn_engine(engine).unwrap();

        handle.register("alice", frame(ALICE, 1)).await.unwrap();
        let best = handle.authenticate(frame(ALICE, 1)).await.unwrap();
        assert_eq!(best.name, "alice");
        assert!(best.similarity > 0.99);

        assert!(matches!(
            handle.authenticate(frame(HALF_ALICE, 1)).await,
            Err(AuthError::NotRecognized { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_engine() {
        let (engine, _store) = engine();
        let handle = spawn_engine(engine).unwrap();

        let a = handle.clone();
        let b = handle.clone();
        let (ra, rb) = tokio::join!(
            a.register("alice", frame(ALICE, 1)),
            b.register("bob", frame(BOB, 1)),
        );
        ra.unwrap();
        rb.unwrap();

        let mut names = handle.identities().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);

        assert!(handle.remove("bob").await.unwrap());
        assert_eq!(handle.identities().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_errors_cross_the_channel() {
        let (engine, _store) = engine();
        let handle = spawn_engine(engine).unwrap();
        assert!(matches!(
            handle.authenticate(frame(ALICE, 1)).await,
            Err(AuthError::NoIdentitiesEnrolled)
        ));
        assert!(matches!(
            handle.register("alice", frame(ALICE, 2)).await,
            Err(AuthError::MultipleFacesDetected { count: 2 })
        ));
    }
}
