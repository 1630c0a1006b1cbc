//! CHIANTI Ingest Library
//!
//! Converts the fixed-format text files of the CHIANTI atomic database into
//! a single HDF5 file organized by element, ion and data category.
//!
//! This library provides tools for:
//! - Decoding fixed-width, whitespace and stateful grid line formats
//! - Building typed polars tables with physical units attached
//! - Post-processing tables with category-specific transforms
//! - Merging tables into an append-only group/dataset HDF5 store

pub mod cli;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod store;
pub mod table;
pub mod transform;
pub mod version;

// Re-export commonly used types
pub use config::IngestConfig;
pub use error::{Error, Result};
pub use models::{Ion, SourceDescriptor};
pub use pipeline::{IngestJob, IngestReport, Ingestor};
pub use schema::{Category, CategorySpec, ColumnSchema, ColumnSpec, ColumnType, Unit};
pub use source::{DatabaseResolver, InMemoryResolver, SourceResolver};
pub use store::{Layout, SharedStore, Store};
pub use table::{ColumnValues, Table};
pub use transform::{Transform, TransformRegistry};
pub use version::{FixedVersion, MarkerFile, VersionProvider};
