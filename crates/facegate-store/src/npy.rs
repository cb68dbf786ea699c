//! Directory-of-`.npy` identity store.
//!
//! Layout: `<dir>/<name>.npy`, each a 1-D little-endian `f32` array holding
//! one descriptor. Writers serialize on an advisory lock over `<dir>/.lock`.
//! New artifacts are written to a hidden temporary file and hard-linked into
//! place, so an existing identity is never overwritten and readers never see a
//! half-written descriptor.

use crate::{check_artifact_name, IdentityStore, StoreError, WriterLock};
use facegate_core::{Descriptor, Identity, Snapshot};
use ndarray::Array1;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const ARTIFACT_EXTENSION: &str = "npy";
const LOCK_FILE: &str = ".lock";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One `.npy` file per identity.
pub struct NpyStore {
    dir: PathBuf,
    dimension: usize,
}

impl NpyStore {
    /// Open (creating if needed) a store whose descriptors have `dimension` components.
    pub fn open(dir: impl Into<PathBuf>, dimension: usize) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tracing::debug!(dir = %dir.display(), dimension, "opened identity store");
        Ok(Self { dir, dimension })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn artifact_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        check_artifact_name(name)?;
        Ok(self.dir.join(format!("{name}.{ARTIFACT_EXTENSION}")))
    }

    /// Names of every artifact in the directory, sorted.
    fn artifact_names(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut names = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping artifact with non UTF-8 name");
                continue;
            };
            if stem.starts_with('.') || !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            names.push(stem.to_string());
        }

        names.sort();
        Ok(names)
    }

    fn read_artifact(&self, name: &str) -> Result<Descriptor, StoreError> {
        let path = self.artifact_path(name)?;
        let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        let values = Array1::<f32>::read_npy(BufReader::new(file))
            .map_err(|source| StoreError::Read { path: path.clone(), source })?;

        if values.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                name: name.to_string(),
                expected: self.dimension,
                actual: values.len(),
            });
        }
        Ok(Descriptor::new(values.to_vec()))
    }

    fn write_temp(&self, name: &str, descriptor: &Descriptor) -> Result<PathBuf, StoreError> {
        let tmp = self.dir.join(format!(
            ".{name}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|e| StoreError::io(&tmp, e))?;

        let array = Array1::from(descriptor.as_slice().to_vec());
        let mut writer = BufWriter::new(file);
        let written = array
            .write_npy(&mut writer)
            .map_err(|source| StoreError::Write { path: tmp.clone(), source })
            .and_then(|()| {
                writer
                    .into_inner()
                    .map_err(|e| StoreError::io(&tmp, e.into_error()))
            })
            .and_then(|file| file.sync_all().map_err(|e| StoreError::io(&tmp, e)));

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(tmp)
    }
}

impl IdentityStore for NpyStore {
    fn load_all(&self) -> Result<Snapshot, StoreError> {
        let identities = self
            .artifact_names()?
            .into_iter()
            .map(|name| {
                let descriptor = self.read_artifact(&name)?;
                Ok(Identity { name, descriptor })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        tracing::debug!(count = identities.len(), "loaded identity snapshot");
        Ok(Snapshot::from_identities(identities))
    }

    fn save(&self, name: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
        let path = self.artifact_path(name)?;
        if descriptor.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                name: name.to_string(),
                expected: self.dimension,
                actual: descriptor.len(),
            });
        }

        let tmp = self.write_temp(name, descriptor)?;
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => {
                tracing::debug!(name, path = %path.display(), "saved identity");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.artifact_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(name, "removed identity");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn lock_exclusive(&self) -> Result<WriterLock<'_>, StoreError> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        fs2::FileExt::lock_exclusive(&file).map_err(|e| StoreError::io(&path, e))?;
        Ok(WriterLock::File(file))
    }
}
