use crate::dataset::Dataset;
use std::sync::{Arc, RwLock};

/// Holds the single live dataset of the portal.
///
/// Readers take an `Arc` snapshot and keep using it even if an upload swaps in a
/// new dataset meanwhile. Writers replace the whole snapshot in one step.
#[derive(Debug)]
pub struct DatasetStore {
    current: RwLock<Arc<Dataset>>,
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetStore {
    pub fn new() -> Self {
        DatasetStore {
            current: RwLock::new(Arc::new(Dataset::empty())),
        }
    }

    pub fn with_dataset(dataset: Dataset) -> Self {
        DatasetStore {
            current: RwLock::new(Arc::new(dataset)),
        }
    }

    /// Snapshot of the live dataset; empty when nothing has been uploaded.
    pub fn current(&self) -> Arc<Dataset> {
        // A poisoned lock still holds a complete Arc, so keep serving it.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// Swap in `dataset`, discarding the previous one. Returns the new snapshot.
    pub fn replace(&self, dataset: Dataset) -> Arc<Dataset> {
        let next = Arc::new(dataset);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&next);
        next
    }

    pub fn clear(&self) {
        self.replace(Dataset::empty());
    }
}
