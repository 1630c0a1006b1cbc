//! Locating source files.
//!
//! A resolver maps a [`SourceDescriptor`] to a readable byte stream, or to
//! `None` when the database does not carry that file.
//!
//! Database layout:
//! ```text
//! dbase/
//!   VERSION
//!   abundance/sun_photospheric.abund
//!   ioneq/chianti.ioneq
//!   ip/chianti.ip
//!   fe/
//!     fe_12/
//!       fe_12.elvlc
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::VERSION_FILE_NAME;
use crate::error::{Error, Result};
use crate::models::{Ion, SourceDescriptor};
use crate::schema::Category;

/// Byte stream of one source file
pub type SourceReader = Box<dyn BufRead + Send>;

pub trait SourceResolver: Send + Sync {
    /// Open the source, or `Ok(None)` when it does not exist
    fn resolve(&self, source: &SourceDescriptor) -> Result<Option<SourceReader>>;
}

/// Resolves sources inside an on-disk CHIANTI database tree
#[derive(Debug, Clone)]
pub struct DatabaseResolver {
    root: PathBuf,
}

impl DatabaseResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Release marker at the database root
    pub fn version_file(&self) -> PathBuf {
        self.root.join(VERSION_FILE_NAME)
    }

    /// Where `source` lives under the database root
    pub fn path_of(&self, source: &SourceDescriptor) -> PathBuf {
        match source.ion() {
            Some(ion) => self
                .root
                .join(&ion.element)
                .join(ion.name())
                .join(source.filename()),
            None => self.root.join(source.category()).join(source.filename()),
        }
    }

    /// Every source of `category` present in the database, sorted by file name
    pub fn list_category(&self, category: Category) -> Result<Vec<SourceDescriptor>> {
        let root = self.root.display();
        let pattern = if category.is_per_ion() {
            format!("{root}/*/*/*.{}", category.extension())
        } else {
            format!("{root}/{}/*.{}", category.tag(), category.extension())
        };
        debug!("Listing {} sources matching {}", category, pattern);

        let paths = glob::glob(&pattern).map_err(|e| Error::Configuration {
            message: format!("invalid database path pattern '{pattern}': {e}"),
        })?;

        let mut sources = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if category.is_per_ion() {
                let ion = path
                    .parent()
                    .and_then(|dir| dir.file_name())
                    .and_then(|n| n.to_str())
                    .and_then(|n| Ion::parse(n).ok());
                match ion {
                    // Only `<ion>.<ext>` counts; siblings like `fe_12.elvlc.bak` are skipped
                    Some(ion) if filename == format!("{}.{}", ion.name(), category.extension()) => {
                        sources.push(SourceDescriptor::for_ion(ion, category.tag()));
                    }
                    _ => debug!("Ignoring {}", path.display()),
                }
            } else {
                sources.push(SourceDescriptor::new(category.tag(), filename));
            }
        }
        sources.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(sources)
    }
}

impl SourceResolver for DatabaseResolver {
    fn resolve(&self, source: &SourceDescriptor) -> Result<Option<SourceReader>> {
        let path = self.path_of(source);
        if !path.is_file() {
            debug!("{} not found at {}", source, path.display());
            return Ok(None);
        }
        let file = File::open(&path)?;
        Ok(Some(Box::new(BufReader::new(file))))
    }
}

/// Sources held in memory, keyed by source id
#[derive(Debug, Clone, Default)]
pub struct InMemoryResolver {
    sources: HashMap<String, String>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: &SourceDescriptor, contents: impl Into<String>) {
        self.sources.insert(source.id(), contents.into());
    }

    pub fn with_source(mut self, source: &SourceDescriptor, contents: impl Into<String>) -> Self {
        self.insert(source, contents);
        self
    }
}

impl SourceResolver for InMemoryResolver {
    fn resolve(&self, source: &SourceDescriptor) -> Result<Option<SourceReader>> {
        Ok(self
            .sources
            .get(&source.id())
            .map(|contents| Box::new(Cursor::new(contents.clone().into_bytes())) as SourceReader))
    }
}
