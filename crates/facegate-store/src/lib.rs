//! facegate-store — Durable identity storage.
//!
//! An identity is a name and one descriptor. [`NpyStore`] keeps one
//! `<name>.npy` file per identity in a directory; [`MemoryStore`] keeps
//! them in process memory.

pub mod memory;
pub mod npy;

pub use memory::MemoryStore;
pub use npy::NpyStore;

use facegate_core::{Descriptor, Snapshot};
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read descriptor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },
    #[error("failed to write descriptor {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpyError,
    },
    #[error("descriptor for {name:?} has {actual} components, expected {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("identity {0:?} already exists in the store")]
    AlreadyExists(String),
    #[error("{0:?} cannot be used as an identity artifact name")]
    InvalidName(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Exclusive writer guard. Released on drop.
#[must_use = "the writer lock is released as soon as the guard is dropped"]
pub enum WriterLock<'a> {
    /// Advisory lock on the store's lock file, shared with other processes.
    File(File),
    /// In-process lock for stores that live in memory.
    Local(MutexGuard<'a, ()>),
}

impl Drop for WriterLock<'_> {
    fn drop(&mut self) {
        if let WriterLock::File(file) = self {
            if let Err(err) = fs2::FileExt::unlock(file) {
                tracing::warn!(error = %err, "failed to release store writer lock");
            }
        }
    }
}

/// Durable mapping from identity name to descriptor.
///
/// `save` is a trusted append: uniqueness checks belong to the caller, but an
/// implementation must still refuse to overwrite an existing name.
pub trait IdentityStore: Send + Sync {
    /// Every persisted identity, in a stable load order. Empty store → empty snapshot.
    fn load_all(&self) -> Result<Snapshot, StoreError>;

    /// Append one identity. Fails with [`StoreError::AlreadyExists`] instead of overwriting.
    fn save(&self, name: &str, descriptor: &Descriptor) -> Result<(), StoreError>;

    /// Delete an identity. Returns whether it existed.
    fn remove(&self, name: &str) -> Result<bool, StoreError>;

    /// Block until this caller is the only writer. Held across check-then-save sequences.
    fn lock_exclusive(&self) -> Result<WriterLock<'_>, StoreError>;
}

impl<S: IdentityStore + ?Sized> IdentityStore for Arc<S> {
    fn load_all(&self) -> Result<Snapshot, StoreError> {
        (**self).load_all()
    }

    fn save(&self, name: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
        (**self).save(name, descriptor)
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        (**self).remove(name)
    }

    fn lock_exclusive(&self) -> Result<WriterLock<'_>, StoreError> {
        (**self).lock_exclusive()
    }
}

/// Reject names that cannot safely become a single file name.
pub(crate) fn check_artifact_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
