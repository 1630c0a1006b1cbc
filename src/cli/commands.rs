//! Command implementations for the chianti-ingest CLI.

use anyhow::{Context, Result};
use colored::*;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::cli::args::{Args, Commands, IngestArgs, InspectArgs, log_level};
use crate::config::IngestConfig;
use crate::models::SourceDescriptor;
use crate::pipeline::{IngestJob, IngestReport, Ingestor};
use crate::source::DatabaseResolver;
use crate::store::{Data, Dataspace, Group, GroupPath, SharedStore, Store};

pub fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Ingest(ingest) => run_ingest(&ingest),
        Commands::Inspect(inspect) => run_inspect(&inspect),
    }
}

/// Set up structured logging on stderr
fn setup_logging(level: &str, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chianti_ingest={level}")));

    if quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    debug!("Logging initialized at level: {}", level);
}

/// Every source of the configured categories present in the database
pub fn plan_jobs(config: &IngestConfig, resolver: &DatabaseResolver) -> Result<Vec<IngestJob>> {
    let mut jobs = Vec::new();
    for &category in &config.categories {
        let sources = resolver
            .list_category(category)
            .with_context(|| format!("Failed to list {category} sources"))?;
        let before = jobs.len();
        jobs.extend(
            sources
                .into_iter()
                .filter(|source| source.ion().is_none_or(|ion| config.includes_ion(ion)))
                .map(|source| IngestJob::builtin(source, category)),
        );
        info!("Found {} {} sources", jobs.len() - before, category);
    }
    Ok(jobs)
}

fn run_ingest(args: &IngestArgs) -> Result<()> {
    let start = Instant::now();
    setup_logging(log_level(args.verbose, args.quiet), args.quiet);

    let config = args.to_config();
    config.validate().context("Invalid configuration")?;
    info!(
        "Ingesting {} into {}",
        config.database_root.display(),
        config.store_path.display()
    );

    let resolver = DatabaseResolver::new(&config.database_root);
    let jobs = plan_jobs(&config, &resolver)?;
    let ingestor = Ingestor::new(resolver, config.version_provider());

    let progress = args.show_progress().then(|| progress_bar(jobs.len() as u64));
    let on_done = |source: &SourceDescriptor| {
        if let Some(pb) = &progress {
            pb.set_message(source.id());
            pb.inc(1);
        }
    };

    let store = Store::open(&config.store_path)
        .with_context(|| format!("Failed to open store {}", config.store_path.display()))?;
    let report = if config.workers > 1 {
        let shared = SharedStore::new(store);
        ingestor.ingest_all_shared(&shared, &jobs, config.workers, on_done)?
    } else {
        let mut store = store;
        ingestor.ingest_all_with(&mut store, &jobs, on_done)
    };

    if let Some(pb) = &progress {
        pb.finish_with_message("Ingestion complete");
    }

    print_report(&report, &config.store_path, start);
    if !report.is_success() {
        anyhow::bail!("{} sources failed to ingest", report.failed.len());
    }
    Ok(())
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

fn print_report(report: &IngestReport, store_path: &Path, start: Instant) {
    let total = report.total();
    println!();
    println!("{}", "CHIANTI ingestion complete".bright_green().bold());
    println!("  Store:            {}", store_path.display().to_string().bright_cyan());
    println!("  Sources written:  {}", report.written.len());
    println!("  Groups created:   {}", total.groups_created);
    println!("  Datasets written: {}", total.datasets_written);
    println!("  Already present:  {}", total.datasets_skipped);
    println!("  Elapsed:          {}", HumanDuration(start.elapsed()));

    if !report.skipped.is_empty() {
        println!("  {} {}", "Missing sources:".yellow(), report.skipped.len());
    }
    if !report.failed.is_empty() {
        println!("{}", "Failed sources:".bright_red().bold());
        for (source, error) in &report.failed {
            println!("  {} {}", source.id().red(), error);
        }
    }
    println!();
}

fn run_inspect(args: &InspectArgs) -> Result<()> {
    setup_logging(log_level(args.verbose, false), false);

    let path = args
        .store
        .clone()
        .unwrap_or_else(|| IngestConfig::default().store_path);
    if !path.is_file() {
        anyhow::bail!("No store at {}", path.display());
    }
    let store = Store::open_read_only(&path).with_context(|| format!("Failed to open store {}", path.display()))?;

    let start_path = match &args.group {
        Some(group) => GroupPath::parse(group)?,
        None => GroupPath::root(),
    };
    let group = store
        .group(&start_path)?
        .with_context(|| format!("No group {start_path} in {}", path.display()))?;

    println!("{}", path.display().to_string().bright_cyan().bold());
    print_group(&start_path, &group, args.attributes)?;
    for (child_path, child) in subtree(&store, &start_path)? {
        print_group(&child_path, &child, args.attributes)?;
    }
    Ok(())
}

fn subtree(store: &Store, start: &GroupPath) -> Result<Vec<(GroupPath, Group)>> {
    Ok(store
        .walk()?
        .into_iter()
        .filter(|(path, _)| path.segments().starts_with(start.segments()) && path != start)
        .collect())
}

fn print_group(path: &GroupPath, group: &Group, show_attributes: bool) -> Result<()> {
    let depth = path.segments().len();
    let indent = "  ".repeat(depth.saturating_sub(1));
    println!("{indent}{}", path.to_string().bright_yellow());
    if show_attributes {
        for (name, value) in group.attrs()? {
            println!("{indent}  @{} = {:?}", name.bright_black(), value);
        }
    }
    for (name, dataset) in group.datasets()? {
        let shape = match dataset.dataspace() {
            Dataspace::Scalar => "scalar".to_string(),
            Dataspace::Simple(len) => format!("[{len}]"),
        };
        let unit = dataset.unit().unwrap_or_default();
        let preview = match dataset.data() {
            Data::Float64(v) if v.len() == 1 => format!(" = {}", v[0]),
            _ => String::new(),
        };
        println!(
            "{indent}  {} {} {} {}{}",
            name.bright_white(),
            dataset.data().type_name().bright_black(),
            shape,
            format!("({unit})").bright_black(),
            preview
        );
    }
    Ok(())
}
