use crate::{check_artifact_name, IdentityStore, StoreError, WriterLock};
use facegate_core::{Descriptor, Identity, Snapshot};
use std::sync::{Mutex, PoisonError, RwLock};

/// In-process store. Load order is insertion order.
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<Vec<Identity>>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with identities, in order.
    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            identities: RwLock::new(identities.into_iter().collect()),
            writer: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.identities.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityStore for MemoryStore {
    fn load_all(&self) -> Result<Snapshot, StoreError> {
        let identities = self.identities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Snapshot::from_identities(identities.iter().cloned()))
    }

    fn save(&self, name: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
        check_artifact_name(name)?;
        let mut identities = self.identities.write().unwrap_or_else(PoisonError::into_inner);
        if identities.iter().any(|i| i.name == name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        identities.push(Identity {
            name: name.to_string(),
            descriptor: descriptor.clone(),
        });
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let mut identities = self.identities.write().unwrap_or_else(PoisonError::into_inner);
        let before = identities.len();
        identities.retain(|i| i.name != name);
        Ok(identities.len() != before)
    }

    fn lock_exclusive(&self) -> Result<WriterLock<'_>, StoreError> {
        Ok(WriterLock::Local(
            self.writer.lock().unwrap_or_else(PoisonError::into_inner),
        ))
    }
}
