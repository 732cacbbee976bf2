//! Archive intake and file classification
//!
//! Extracts an uploaded export archive into a per-job working directory and
//! buckets the extracted files by extension into the categories the rest of
//! the pipeline understands. The working directory is owned by an RAII guard
//! so it is removed on every exit path.

use crate::error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Semantic family of a classified file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    /// JSON export payloads
    StructuredJson,
    /// HTML export payloads (mined for embedded tables)
    StructuredMarkup,
    Image,
    Audio,
    Video,
}

impl FileCategory {
    /// Classify a lowercase extension into a category
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(FileCategory::StructuredJson),
            "html" => Some(FileCategory::StructuredMarkup),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" => Some(FileCategory::Image),
            "mp3" | "wav" | "ogg" => Some(FileCategory::Audio),
            "webm" | "mp4" | "mov" | "avi" => Some(FileCategory::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileCategory::StructuredJson => "json",
            FileCategory::StructuredMarkup => "html",
            FileCategory::Image => "image",
            FileCategory::Audio => "audio",
            FileCategory::Video => "video",
        };
        write!(f, "{}", s)
    }
}

/// A classified file found during the scan
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub category: FileCategory,
}

/// Result of scanning an extracted archive
#[derive(Debug, Default)]
pub struct FileInventory {
    pub files: Vec<FileRecord>,
    /// Every file seen, recognized or not
    pub total_files: usize,
    /// Files whose extension is outside the recognized vocabulary
    pub unrecognized: usize,
}

impl FileInventory {
    /// Paths in a given category
    pub fn in_category(&self, category: FileCategory) -> Vec<&Path> {
        self.files
            .iter()
            .filter(|f| f.category == category)
            .map(|f| f.path.as_path())
            .collect()
    }

    /// Count of files in a given category
    pub fn count(&self, category: FileCategory) -> usize {
        self.files.iter().filter(|f| f.category == category).count()
    }

    /// Count of recognized files
    pub fn recognized(&self) -> usize {
        self.files.len()
    }

    /// Short human-readable summary, e.g. "12 json, 3 image, 1 audio"
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for category in [
            FileCategory::StructuredJson,
            FileCategory::StructuredMarkup,
            FileCategory::Image,
            FileCategory::Audio,
            FileCategory::Video,
        ] {
            let n = self.count(category);
            if n > 0 {
                parts.push(format!("{} {}", n, category));
            }
        }
        parts.join(", ")
    }
}

/// RAII guard for a per-job extraction working directory
///
/// The directory is created on construction and removed when the guard is
/// dropped, which covers success, partial failure and hard failure alike.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create the working directory for one ingestion job
    pub fn create(parent: &Path, identity_id: i64) -> Result<Self> {
        let path = parent.join(format!("extract_identity_{}", identity_id));
        std::fs::create_dir_all(&path)?;
        debug!("Created working directory {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to remove working directory {:?}: {}", self.path, e);
            } else {
                debug!("Removed working directory {:?}", self.path);
            }
        }
    }
}

/// Extract a zip archive into the destination directory
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    info!("Extracting {:?} into {:?}", archive_path, dest);

    let file = File::open(archive_path).map_err(|e| {
        Error::Archive(format!(
            "Cannot open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::Archive(format!("Malformed archive: {}", e)))?;
    zip.extract(dest)
        .map_err(|e| Error::Archive(format!("Extraction failed: {}", e)))?;

    info!("Extraction completed ({} entries)", zip.len());
    Ok(())
}

/// Recursively enumerate extracted files and classify them by extension
pub fn scan_files(root: &Path) -> Result<FileInventory> {
    info!("Scanning extracted files in {:?}", root);

    let mut inventory = FileInventory::default();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        inventory.total_files += 1;

        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref().and_then(FileCategory::from_extension) {
            Some(category) => {
                debug!("Found {} file: {:?}", category, entry.path());
                inventory.files.push(FileRecord {
                    path: entry.path().to_path_buf(),
                    category,
                });
            }
            None => inventory.unrecognized += 1,
        }
    }

    info!(
        "File scan completed: {} total, {} recognized ({})",
        inventory.total_files,
        inventory.recognized(),
        inventory.summary()
    );
    Ok(inventory)
}
