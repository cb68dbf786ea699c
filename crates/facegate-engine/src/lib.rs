//! facegate-engine — Enrollment and authentication over a face identity store.
//!
//! [`MatchEngine`] owns the decision policy: exactly one face per frame,
//! duplicate-face rejection on enroll, best-match thresholding on
//! authenticate. [`spawn_engine`] moves an engine onto its own thread behind
//! an async [`EngineHandle`].

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod service;

pub use config::{Config, ConfigError};
pub use engine::{validate_name, DefaultEngine, MatchEngine, Thresholds};
pub use error::{AuthError, StartupError};
pub use frame::FrameError;
pub use service::{spawn_engine, EngineHandle};
