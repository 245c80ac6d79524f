use crate::dataset::Dataset;
use crate::error::SheetError;
use crate::loader;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    // A bare file name with an extension: no separators, no leading dot.
    static ref UPLOAD_NAME_REGEX: Regex =
        Regex::new(r"^[^/\\.\x00-\x1f][^/\\\x00-\x1f]*\.([A-Za-z0-9]+)$").unwrap();
}

/// Default upload allow-list: the legacy Excel format.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["xls"];

/// An upload that passed validation and parsed into a dataset.
#[derive(Debug)]
pub struct Ingested {
    pub filename: String,
    pub extension: String,
    pub dataset: Dataset,
}

/// Check an uploaded file name against the allow-list
///
/// # Returns
/// * The lower-case extension of `name`
///
/// # Errors
/// * `BadRequest("No selected file")` for an empty name
/// * `BadRequest` when the name contains path components, has no extension, or the
///   extension is not in `allowed`
pub fn validate_upload_name(name: &str, allowed: &[String]) -> Result<String, SheetError> {
    if name.trim().is_empty() {
        return Err(SheetError::bad_request("No selected file"));
    }
    if name.contains("..") {
        return Err(SheetError::bad_request(format!("Invalid file name: {}", name)));
    }

    let caps = UPLOAD_NAME_REGEX
        .captures(name)
        .ok_or_else(|| SheetError::bad_request(format!("Invalid file name: {}", name)))?;
    let extension = caps[1].to_lowercase();

    if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&extension)) {
        return Err(SheetError::bad_request(format!(
            "File type .{} is not allowed (allowed: {})",
            extension,
            allowed.join(", ")
        )));
    }

    Ok(extension)
}

/// Validate and parse one upload. Nothing is written to disk here.
pub fn ingest(name: &str, bytes: &[u8], allowed: &[String]) -> Result<Ingested, SheetError> {
    let extension = validate_upload_name(name, allowed)?;
    let dataset = loader::load_bytes(&extension, bytes)?;
    Ok(Ingested {
        filename: name.to_string(),
        extension,
        dataset,
    })
}

/// Remove every regular file directly inside `dir`. Missing directories are created.
pub fn clear_directory(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        return std::fs::create_dir_all(dir);
    }
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_file() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
