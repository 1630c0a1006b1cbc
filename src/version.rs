//! Data release version lookup.
//!
//! The release version is read from the `VERSION` marker next to the source
//! tree the first time anyone asks for it, then frozen for the rest of the
//! process. Tests inject a fixed version through [`FixedVersion`] instead.

use once_cell::sync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

static RELEASE_VERSION: OnceCell<String> = OnceCell::new();

/// Supplies the release version stamped onto every table
pub trait VersionProvider: Send + Sync {
    fn release_version(&self) -> Result<String>;
}

impl<T: VersionProvider + ?Sized> VersionProvider for Box<T> {
    fn release_version(&self) -> Result<String> {
        (**self).release_version()
    }
}

/// Version read once per process from a marker file
#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VersionProvider for MarkerFile {
    /// The first successful read wins; later calls, from any marker, see that value
    fn release_version(&self) -> Result<String> {
        RELEASE_VERSION
            .get_or_try_init(|| read_marker(&self.path))
            .cloned()
    }
}

/// Version fixed at construction, bypassing the process-wide cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedVersion(pub String);

impl FixedVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }
}

impl VersionProvider for FixedVersion {
    fn release_version(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// First line of the marker, trimmed
pub fn read_marker(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path).map_err(|e| Error::VersionMarker {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let version = contents.lines().next().unwrap_or("").trim().to_string();
    if version.is_empty() {
        return Err(Error::VersionMarker {
            path: path.to_path_buf(),
            reason: "marker is empty".to_string(),
        });
    }
    debug!("Read release version {} from {}", version, path.display());
    Ok(version)
}
