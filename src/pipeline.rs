//! Ingestion pipeline: resolve, decode, build, post-process, write.
//!
//! The [`Ingestor`] owns the two outside collaborators (where sources come
//! from and which release they belong to) plus the transform registry. Every
//! stage error is converted to [`Error`] with the source id attached, so a
//! batch run can report failures per source and carry on.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::decoder::decode_source;
use crate::error::{Error, Result};
use crate::models::SourceDescriptor;
use crate::schema::{Category, CategorySpec};
use crate::source::SourceResolver;
use crate::store::{SharedStore, Store, WriteSummary, write_table};
use crate::table::{Table, build_table};
use crate::transform::{TransformRegistry, postprocess};
use crate::version::VersionProvider;

/// One source together with the rules used to ingest it
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub source: SourceDescriptor,
    pub spec: CategorySpec,
}

impl IngestJob {
    pub fn new(source: SourceDescriptor, spec: CategorySpec) -> Self {
        Self { source, spec }
    }

    /// Job for a built-in category
    pub fn builtin(source: SourceDescriptor, category: Category) -> Self {
        Self::new(source, category.spec())
    }
}

/// Outcome of a batch run
#[derive(Debug, Default)]
pub struct IngestReport {
    pub written: Vec<(SourceDescriptor, WriteSummary)>,
    pub skipped: Vec<SourceDescriptor>,
    pub failed: Vec<(SourceDescriptor, Error)>,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> WriteSummary {
        let mut total = WriteSummary::default();
        for (_, summary) in &self.written {
            total.merge(*summary);
        }
        total
    }
}

pub struct Ingestor {
    resolver: Box<dyn SourceResolver>,
    version: Box<dyn VersionProvider>,
    transforms: TransformRegistry,
}

impl fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor")
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Ingestor with the default transforms registered
    pub fn new(resolver: impl SourceResolver + 'static, version: impl VersionProvider + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            version: Box::new(version),
            transforms: TransformRegistry::with_defaults(),
        }
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn transforms_mut(&mut self) -> &mut TransformRegistry {
        &mut self.transforms
    }

    /// Read `source` into a post-processed table without touching any store
    pub fn parse(&self, source: &SourceDescriptor, spec: &CategorySpec) -> Result<Table> {
        let id = source.id();
        let reader = self
            .resolver
            .resolve(source)?
            .ok_or_else(|| Error::SourceNotFound { source_id: id.clone() })?;

        let decoded = decode_source(reader, &spec.decoder).map_err(|e| Error::from_decode(&id, e))?;
        debug!("Decoded {} data rows from {}", decoded.rows.len(), id);

        let version = self.version.release_version()?;
        let table = build_table(decoded, &spec.schema, &version).map_err(|e| Error::from_table(&id, e))?;
        postprocess(table, source, &self.transforms).map_err(|e| Error::from_table(&id, e))
    }

    /// Parse, write and flush one source
    pub fn ingest(&self, store: &mut Store, source: &SourceDescriptor, spec: &CategorySpec) -> Result<WriteSummary> {
        let table = self.parse(source, spec)?;
        let summary = write_table(store, &table, source, &spec.layout)?;
        store.flush()?;
        Ok(summary)
    }

    /// Like [`Ingestor::ingest`], but safe to call from several threads.
    ///
    /// Decoding runs outside the lock; the write and the flush run under it.
    pub fn ingest_shared(&self, store: &SharedStore, source: &SourceDescriptor, spec: &CategorySpec) -> Result<WriteSummary> {
        let table = self.parse(source, spec)?;
        let mut store = store.lock()?;
        let summary = write_table(&mut store, &table, source, &spec.layout)?;
        store.flush()?;
        Ok(summary)
    }

    /// Ingest every job in order; missing sources are skipped, failures recorded
    pub fn ingest_all(&self, store: &mut Store, jobs: &[IngestJob]) -> IngestReport {
        self.ingest_all_with(store, jobs, |_| {})
    }

    /// [`Ingestor::ingest_all`], calling `on_done` after each job
    pub fn ingest_all_with<F>(&self, store: &mut Store, jobs: &[IngestJob], mut on_done: F) -> IngestReport
    where
        F: FnMut(&SourceDescriptor),
    {
        let start = Instant::now();
        let mut report = IngestReport::default();

        for job in jobs {
            let outcome = self.ingest(store, &job.source, &job.spec);
            report.record(&job.source, outcome);
            on_done(&job.source);
        }

        report.log_totals(start);
        report
    }

    /// Ingest jobs on `workers` threads sharing one store.
    ///
    /// Sources are decoded in parallel; each write and flush holds the store
    /// lock. The report lists sources in job order. A worker that dies takes
    /// its outcomes with it, so the whole run fails with [`Error::StoreLock`].
    pub fn ingest_all_shared<F>(&self, store: &SharedStore, jobs: &[IngestJob], workers: usize, on_done: F) -> Result<IngestReport>
    where
        F: Fn(&SourceDescriptor) + Sync,
    {
        let start = Instant::now();
        let next = AtomicUsize::new(0);
        let outcomes = Mutex::new(Vec::with_capacity(jobs.len()));
        let threads = workers.clamp(1, jobs.len().max(1));
        debug!("Ingesting {} sources on {} threads", jobs.len(), threads);

        let workers_done: Vec<Result<()>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(threads);
            for _ in 0..threads {
                handles.push(scope.spawn(|| -> Result<()> {
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(job) = jobs.get(index) else {
                            return Ok(());
                        };
                        let outcome = self.ingest_shared(store, &job.source, &job.spec);
                        on_done(&job.source);
                        outcomes
                            .lock()
                            .map_err(|_| Error::StoreLock)?
                            .push((index, outcome));
                    }
                }));
            }
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|_| Err(Error::StoreLock)))
                .collect()
        });
        workers_done.into_iter().collect::<Result<()>>()?;

        let mut outcomes = outcomes.into_inner().map_err(|_| Error::StoreLock)?;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut report = IngestReport::default();
        for (index, outcome) in outcomes {
            report.record(&jobs[index].source, outcome);
        }
        report.log_totals(start);
        Ok(report)
    }
}

impl IngestReport {
    fn record(&mut self, source: &SourceDescriptor, outcome: Result<WriteSummary>) {
        match outcome {
            Ok(summary) => {
                debug!("Ingested {}", source);
                self.written.push((source.clone(), summary));
            }
            Err(e) if e.is_skippable() => {
                warn!("Skipping {}: not found", source);
                self.skipped.push(source.clone());
            }
            Err(e) => {
                warn!("Failed to ingest {}: {}", source, e);
                self.failed.push((source.clone(), e));
            }
        }
    }

    fn log_totals(&self, start: Instant) {
        let total = self.total();
        info!(
            "Ingested {} sources in {:.2}s ({} skipped, {} failed): {} datasets written, {} already present",
            self.written.len(),
            start.elapsed().as_secs_f64(),
            self.skipped.len(),
            self.failed.len(),
            total.datasets_written,
            total.datasets_skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::columns;
    use crate::source::InMemoryResolver;
    use crate::table::ColumnValues;
    use crate::version::FixedVersion;
    use tempfile::TempDir;

    fn ingestor(resolver: InMemoryResolver) -> Ingestor {
        Ingestor::new(resolver, FixedVersion::new("9.0"))
    }

    #[test]
    fn test_parse_whitespace_abundance() {
        let source = SourceDescriptor::new("abundance", "sun.abund");
        let resolver = InMemoryResolver::new().with_source(&source, "1  7.300  h\n-1\ncomment\n");
        let spec = Category::Abundance.spec();
        let spec = CategorySpec::new(spec.tag, spec.schema, crate::decoder::Decoder::Whitespace, spec.layout);

        let table = ingestor(resolver).parse(&source, &spec).unwrap();
        assert_eq!(table.version(), "9.0");
        assert_eq!(table.footer(), "comment\n");
        assert_eq!(
            table.column_values(columns::ABUNDANCE).unwrap(),
            ColumnValues::Real(vec![1.0])
        );
        assert_eq!(
            table.column_values(columns::ELEMENT).unwrap(),
            ColumnValues::Text(vec!["h".to_string()])
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let source = SourceDescriptor::new("ioneq", "chianti.ioneq");
        let resolver = InMemoryResolver::new().with_source(
            &source,
            "3\n4.00  4.50  5.00\n 1  1 1.0e-2 5.0e-1 1.0e-2\n-1\n",
        );
        let ingestor = ingestor(resolver);
        let spec = Category::Ioneq.spec();
        assert_eq!(
            ingestor.parse(&source, &spec).unwrap(),
            ingestor.parse(&source, &spec).unwrap()
        );
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let ingestor = ingestor(InMemoryResolver::new());
        let source = SourceDescriptor::new("ip", "chianti.ip");
        let err = ingestor.parse(&source, &Category::Ip.spec()).unwrap_err();
        assert!(err.is_skippable());
        assert_eq!(err.source_id(), Some("ip/chianti.ip"));
    }

    #[test]
    fn test_stage_errors_carry_source_id() {
        let truncated = SourceDescriptor::new("ip", "truncated.ip");
        let garbled = SourceDescriptor::new("ip", "garbled.ip");
        let resolver = InMemoryResolver::new()
            .with_source(&truncated, " 26 12 2.5e6\n")
            .with_source(&garbled, " 26 xii 2.5e6\n-1\n");
        let ingestor = ingestor(resolver);
        let spec = Category::Ip.spec();

        match ingestor.parse(&truncated, &spec).unwrap_err() {
            Error::MalformedSource { source_id, reason, .. } => {
                assert_eq!(source_id, "ip/truncated.ip");
                assert!(reason.contains("missing terminator"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match ingestor.parse(&garbled, &spec).unwrap_err() {
            Error::SchemaMismatch { column, row, .. } => {
                assert_eq!(column, columns::ION);
                assert_eq!(row, Some(0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ingest_all_reports_each_source() {
        let good = SourceDescriptor::new("ip", "chianti.ip");
        let bad = SourceDescriptor::new("ip", "bad.ip");
        let missing = SourceDescriptor::new("ip", "missing.ip");
        let resolver = InMemoryResolver::new()
            .with_source(&good, " 26 12 2.5e6\n-1\n")
            .with_source(&bad, "26 12\n-1\n");
        let jobs: Vec<IngestJob> = [&good, &bad, &missing]
            .into_iter()
            .map(|s| IngestJob::builtin(s.clone(), Category::Ip))
            .collect();

        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path().join("chianti.h5")).unwrap();
        let mut seen = 0;
        let report = ingestor(resolver).ingest_all_with(&mut store, &jobs, |_| seen += 1);
        assert_eq!(seen, 3);
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.skipped, vec![missing]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_success());
        assert_eq!(report.total().datasets_written, 1);
    }

    #[test]
    fn test_dead_worker_fails_shared_run() {
        let sources: Vec<SourceDescriptor> = ["a.ip", "b.ip", "c.ip"]
            .into_iter()
            .map(|name| SourceDescriptor::new("ip", name))
            .collect();
        let resolver = sources.iter().fold(InMemoryResolver::new(), |resolver, source| {
            resolver.with_source(source, " 26 12 2.5e6\n-1\n")
        });
        let jobs: Vec<IngestJob> = sources
            .iter()
            .map(|s| IngestJob::builtin(s.clone(), Category::Ip))
            .collect();

        let dir = TempDir::new().unwrap();
        let shared = SharedStore::new(Store::open(dir.path().join("chianti.h5")).unwrap());
        let result = ingestor(resolver).ingest_all_shared(&shared, &jobs, 2, |source| {
            if source.stem() == "b" {
                panic!("progress callback failed");
            }
        });
        assert!(matches!(result, Err(Error::StoreLock)));
    }
}
