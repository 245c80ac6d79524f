use crate::dataset::Dataset;
use crate::error::SheetError;
use crate::ingest::{self, clear_directory};
use crate::loader;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Upload directory for the JSON API. Holds at most one file at a time, looked up
/// by the name it was uploaded with.
#[derive(Debug)]
pub struct UploadDir {
    root: PathBuf,
    allowed: Vec<String>,
    // Serializes store/remove so two uploads never interleave their clear + write.
    write_lock: Mutex<()>,
}

impl UploadDir {
    /// Open (and create if needed) the upload directory.
    pub fn open(root: impl Into<PathBuf>, allowed: Vec<String>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(UploadDir {
            root,
            allowed,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed
    }

    /// Store `bytes` under `filename`, deleting every previous upload first.
    ///
    /// The name is validated against the allow-list before anything is removed.
    pub fn store(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, SheetError> {
        ingest::validate_upload_name(filename, &self.allowed)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        clear_directory(&self.root)?;
        let path = self.root.join(filename);
        fs::write(&path, bytes)?;
        log::info!("stored upload {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Parse the stored file named `filename`.
    pub fn open_dataset(&self, filename: &str) -> Result<Dataset, SheetError> {
        let path = self.resolve(filename)?;
        loader::load_path(path)
    }

    /// Delete the stored file named `filename`.
    pub fn remove(&self, filename: &str) -> Result<(), SheetError> {
        let path = self.resolve(filename)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !path.is_file() {
            return Err(SheetError::NotFound);
        }
        fs::remove_file(&path)?;
        log::info!("removed upload {}", path.display());
        Ok(())
    }

    // Lookups only ever touch plain names inside the root.
    fn resolve(&self, filename: &str) -> Result<PathBuf, SheetError> {
        if filename.is_empty() {
            return Err(SheetError::bad_request("Missing filename"));
        }
        let candidate = Path::new(filename);
        if candidate.components().count() != 1 || candidate.file_name().is_none() {
            return Err(SheetError::NotFound);
        }
        Ok(self.root.join(candidate))
    }
}
