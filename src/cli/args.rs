//! Command-line argument definitions for chianti-ingest.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::IngestConfig;
use crate::models::Ion;
use crate::schema::Category;

/// Ingest the CHIANTI atomic database into a single hierarchical store
#[derive(Debug, Clone, Parser)]
#[command(
    name = "chianti-ingest",
    version,
    about = "Ingest fixed-format CHIANTI data files into a hierarchical HDF5 store",
    long_about = "Reads abundance, ionization equilibrium, ionization potential and energy level \
                  files from a CHIANTI database tree and merges them into one store file organized \
                  by element, ion and category. Existing datasets are never overwritten, so \
                  re-running an ingestion is safe."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Ingest sources from a database tree into a store
    Ingest(IngestArgs),
    /// Print the groups, attributes and datasets of a store
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct IngestArgs {
    /// Root of the CHIANTI database (defaults to ~/ssw/packages/chianti/dbase)
    #[arg(short = 'd', long = "database", value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Store file to create or update (defaults to ~/.chianti_ingest/chianti_dbase.h5)
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Categories to ingest (comma-separated: abundance, ioneq, ip, elvlc)
    #[arg(short = 'c', long = "categories", value_name = "LIST", value_delimiter = ',')]
    pub categories: Vec<Category>,

    /// Only ingest per-ion files of these ions (comma-separated, e.g. fe_12,o_6)
    #[arg(long = "ions", value_name = "LIST", value_delimiter = ',', value_parser = parse_ion)]
    pub ions: Vec<Ion>,

    /// Stamp this release version instead of reading the VERSION marker
    #[arg(long = "release", value_name = "VERSION")]
    pub release: Option<String>,

    /// Worker threads for decoding
    #[arg(short = 'j', long = "workers", default_value_t = 1)]
    pub workers: usize,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct InspectArgs {
    /// Store file to inspect
    #[arg(value_name = "STORE")]
    pub store: Option<PathBuf>,

    /// Only show this group and its descendants, e.g. fe/fe_12
    #[arg(short = 'g', long = "group", value_name = "PATH")]
    pub group: Option<String>,

    /// Also print attribute values
    #[arg(short = 'a', long = "attributes")]
    pub attributes: bool,

    /// Increase logging verbosity
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_ion(value: &str) -> Result<Ion, String> {
    Ion::parse(value).map_err(|e| e.to_string())
}

/// Log level from verbosity flags
pub fn log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

impl IngestArgs {
    /// Layer these arguments over the default configuration
    pub fn to_config(&self) -> IngestConfig {
        let mut config = IngestConfig::default().with_workers(self.workers);
        if let Some(database) = &self.database {
            config = config.with_database_root(database);
        }
        if let Some(output) = &self.output {
            config = config.with_store_path(output);
        }
        if !self.categories.is_empty() {
            config = config.with_categories(self.categories.clone());
        }
        if !self.ions.is_empty() {
            config = config.with_ions(self.ions.clone());
        }
        if let Some(release) = &self.release {
            config = config.with_version(release);
        }
        config
    }

    pub fn show_progress(&self) -> bool {
        !self.quiet
    }
}
