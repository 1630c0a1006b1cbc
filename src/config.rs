//! Ingestion configuration.
//!
//! Holds where the source database lives, where the store is written, which
//! categories and ions to ingest, and how many worker threads to use.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::constants::VERSION_FILE_NAME;
use crate::error::{Error, Result};
use crate::models::Ion;
use crate::schema::Category;
use crate::version::{FixedVersion, MarkerFile, VersionProvider};

/// Default database location relative to the home directory
const DEFAULT_DATABASE_DIR: &str = "ssw/packages/chianti/dbase";

/// Default store location relative to the home directory
const DEFAULT_STORE_FILE: &str = ".chianti_ingest/chianti_dbase.h5";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root of the CHIANTI source database
    pub database_root: PathBuf,

    /// Store file to create or update
    pub store_path: PathBuf,

    /// Categories to ingest, in order
    pub categories: Vec<Category>,

    /// Restrict per-ion categories to these ions; empty means all found
    pub ions: Vec<Ion>,

    /// Release version to stamp instead of reading the VERSION marker
    pub version_override: Option<String>,

    /// Threads decoding sources; writes are always serialized
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_root: home.join(DEFAULT_DATABASE_DIR),
            store_path: home.join(DEFAULT_STORE_FILE),
            categories: Category::ALL.to_vec(),
            ions: Vec::new(),
            version_override: None,
            workers: 1,
        }
    }
}

impl IngestConfig {
    pub fn with_database_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.database_root = root.into();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_ions(mut self, ions: Vec<Ion>) -> Self {
        self.ions = ions;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version_override = Some(version.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn version_file(&self) -> PathBuf {
        self.database_root.join(VERSION_FILE_NAME)
    }

    /// Where the release version comes from for this run
    pub fn version_provider(&self) -> Box<dyn VersionProvider> {
        match &self.version_override {
            Some(version) => Box::new(FixedVersion::new(version.clone())),
            None => Box::new(MarkerFile::new(self.version_file())),
        }
    }

    /// Whether per-ion sources of `ion` should be ingested
    pub fn includes_ion(&self, ion: &Ion) -> bool {
        self.ions.is_empty() || self.ions.contains(ion)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database_root.is_dir() {
            return Err(Error::Configuration {
                message: format!(
                    "database root {} is not a directory",
                    self.database_root.display()
                ),
            });
        }
        if self.store_path.is_dir() {
            return Err(Error::Configuration {
                message: format!("store path {} is a directory", self.store_path.display()),
            });
        }
        if self.categories.is_empty() {
            return Err(Error::Configuration {
                message: "no categories selected".to_string(),
            });
        }
        if self.workers == 0 {
            return Err(Error::Configuration {
                message: "workers must be at least 1".to_string(),
            });
        }
        if self.version_override.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(Error::Configuration {
                message: "version override is empty".to_string(),
            });
        }
        debug!("Configuration validated: {:?}", self);
        Ok(())
    }
}
