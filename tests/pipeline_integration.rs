//! Integration tests for the ingestion pipeline
//!
//! These tests build a small CHIANTI database tree on disk, ingest it into an
//! HDF5 store file and check the resulting group/dataset layout end to end.

use chianti_ingest::cli::commands::plan_jobs;
use chianti_ingest::constants::footer_block;
use chianti_ingest::decoder::{Decoder, GridDecoder};
use chianti_ingest::store::{Data, GroupPath, Layout};
use chianti_ingest::{
    Category, CategorySpec, ColumnValues, DatabaseResolver, Error, FixedVersion, IngestConfig,
    IngestJob, Ingestor, Ion, SharedStore, SourceDescriptor, Store,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SUN_ABUND: &str = "  1 12.000 H\n  2 10.930 He\n 26  7.500 Fe\n-1\nAsplund et al. 2009\n";
const ALLEN_ABUND: &str = "  1 12.000 H\n  8  8.930 O\n-1\nAllen 1973\n";
const IONEQ: &str = "\
3
4.00  4.50  5.00
 1  1 1.0e-2 5.0e-1 1.0e-2
 1  2 9.9e-1 5.0e-1 9.9e-1
 26 12 0.0 1.0e-3 2.0e-1
-1
Mazzotta et al. 1998
";
const IP: &str = " 1  1  109678.77\n 26 12  2653000.0\n-1\nNIST\n";
const FE_12_ELVLC: &str = concat!(
    "      1                       3s2 3p3   4S    4    S  1.5          0.000          0.000\n",
    "      2                       3s2 3p3   2D    2    D  1.5      41555.000      41483.000\n",
    "-1\n",
    "%filename: fe_12.elvlc\n",
);

const HDF5_SIGNATURE: [u8; 8] = [137, 72, 68, 70, 13, 10, 26, 10];

fn path(s: &str) -> GroupPath {
    GroupPath::parse(s).unwrap()
}

/// Create a small database tree with every built-in category
fn create_database(temp_dir: &TempDir) -> PathBuf {
    let root = temp_dir.path().join("dbase");
    for dir in ["abundance", "ioneq", "ip", "fe/fe_12", "fe/fe_12d"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    fs::write(root.join("VERSION"), "9.0.1\n").unwrap();
    fs::write(root.join("abundance/sun.abund"), SUN_ABUND).unwrap();
    fs::write(root.join("abundance/allen.abund"), ALLEN_ABUND).unwrap();
    fs::write(root.join("ioneq/chianti.ioneq"), IONEQ).unwrap();
    fs::write(root.join("ip/chianti.ip"), IP).unwrap();
    fs::write(root.join("fe/fe_12/fe_12.elvlc"), FE_12_ELVLC).unwrap();
    fs::write(root.join("fe/fe_12d/fe_12d.elvlc"), FE_12_ELVLC).unwrap();
    root
}

fn ingestor(root: &Path) -> Ingestor {
    Ingestor::new(DatabaseResolver::new(root), FixedVersion::new("9.0.1"))
}

fn all_jobs(root: &Path) -> Vec<IngestJob> {
    let config = IngestConfig::default().with_database_root(root);
    plan_jobs(&config, &DatabaseResolver::new(root)).unwrap()
}

#[test]
fn test_full_database_ingestion() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_database(&temp_dir);
    let store_path = temp_dir.path().join("out").join("chianti.h5");

    let jobs = all_jobs(&root);
    assert_eq!(jobs.len(), 6);

    let mut store = Store::open(&store_path).unwrap();
    let report = ingestor(&root).ingest_all(&mut store, &jobs);
    assert!(report.is_success(), "failures: {:?}", report.failed);
    assert_eq!(report.written.len(), 6);
    drop(store);

    let bytes = fs::read(&store_path).unwrap();
    assert_eq!(bytes[..8], HDF5_SIGNATURE);

    let store = Store::open_read_only(&store_path).unwrap();

    let fe_abundance = store.read_group(&path("fe/abundance")).unwrap();
    assert_eq!(fe_abundance.attr("chianti_version"), Some("9.0.1"));
    let sun = fe_abundance.dataset("sun").unwrap();
    assert!((sun.as_scalar().unwrap() - 10f64.powf(7.5 - 12.0)).abs() < 1e-15);
    assert_eq!(sun.unit(), Some(""));

    let ip = store.dataset(&path("fe/fe_12/ip"), "chianti").unwrap().unwrap();
    assert_eq!(ip.as_scalar(), Some(2653000.0));
    assert_eq!(ip.unit(), Some("1 / cm"));

    let ion_group = store.read_group(&path("fe/fe_12")).unwrap();
    assert_eq!(ion_group.attr("element"), Some("fe"));
    assert_eq!(ion_group.attr("ion"), Some("fe_12"));
    let dielectronic = store.read_group(&path("fe/fe_12d")).unwrap();
    assert_eq!(dielectronic.attr("ion"), Some("fe_12d"));
    assert!(store.contains_group(&path("fe/fe_12d/elvlc")));

    let category = store.read_group(&path("h/h_1/ioneq")).unwrap();
    assert_eq!(category.attr("chianti_version"), Some("9.0.1"));
    assert_eq!(category.attr("footer"), Some(""));

    let ioneq = store.read_group(&path("fe/fe_12/ioneq/chianti")).unwrap();
    assert_eq!(ioneq.attr("footer"), Some("Mazzotta et al. 1998\n"));
    assert_eq!(
        ioneq.dataset("ionization fraction").unwrap().values(),
        ColumnValues::Real(vec![0.0, 1.0e-3, 2.0e-1])
    );

    let elvlc = store.read_group(&path("fe/fe_12/elvlc")).unwrap();
    assert_eq!(elvlc.attr("footer"), Some("%filename: fe_12.elvlc\n"));
    assert_eq!(
        elvlc.dataset("E obs").unwrap().values(),
        ColumnValues::Real(vec![0.0, 41555.0])
    );
}

#[test]
fn test_ioneq_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("dbase");
    fs::create_dir_all(root.join("ioneq")).unwrap();
    fs::write(
        root.join("ioneq/chianti.ioneq"),
        "3\n4.00  4.50  5.00\n 1  1 1.0e-2 5.0e-1 1.0e-2\n-1\n",
    )
    .unwrap();

    let source = SourceDescriptor::new("ioneq", "chianti.ioneq");
    let table = ingestor(&root).parse(&source, &Category::Ioneq.spec()).unwrap();
    assert_eq!(table.height(), 1);
    assert_eq!(table.unit("temperature").map(|u| u.canonical()), Some("K"));
    match table.column_values("temperature").unwrap() {
        ColumnValues::RealArray(rows) => {
            let expected = [1e4, 10f64.powf(4.5), 1e5];
            for (got, want) in rows[0].iter().zip(expected) {
                assert!((got - want).abs() / want < 1e-12);
            }
        }
        other => panic!("unexpected values: {other:?}"),
    }
    assert_eq!(
        table.column_values("ionization fraction").unwrap(),
        ColumnValues::RealArray(vec![vec![0.01, 0.5, 0.01]])
    );
}

#[test]
fn test_reingestion_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_database(&temp_dir);
    let store_path = temp_dir.path().join("chianti.h5");
    let jobs = all_jobs(&root);
    let ingestor = ingestor(&root);

    let mut store = Store::open(&store_path).unwrap();
    ingestor.ingest_all(&mut store, &jobs);
    let first = store.contents().unwrap();
    drop(store);

    let mut store = Store::open(&store_path).unwrap();
    let report = ingestor.ingest_all(&mut store, &jobs);
    assert!(report.total().is_noop());
    assert_eq!(store.contents().unwrap(), first);
}

#[test]
fn test_footers_accumulate_in_write_order() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_database(&temp_dir);
    let ingestor = ingestor(&root);
    let spec = Category::Abundance.spec();
    let sun = SourceDescriptor::new("abundance", "sun.abund");
    let allen = SourceDescriptor::new("abundance", "allen.abund");

    let mut store = Store::open(temp_dir.path().join("chianti.h5")).unwrap();
    ingestor.ingest(&mut store, &sun, &spec).unwrap();
    ingestor.ingest(&mut store, &allen, &spec).unwrap();
    ingestor.ingest(&mut store, &sun, &spec).unwrap();

    let expected = format!(
        "{}{}",
        footer_block("sun", "Asplund et al. 2009\n"),
        footer_block("allen", "Allen 1973\n")
    );
    let hydrogen = store.read_group(&path("h/abundance")).unwrap();
    assert_eq!(hydrogen.attr("footer"), Some(expected.as_str()));
    assert_eq!(hydrogen.dataset("sun").unwrap().as_scalar(), Some(1.0));
    assert_eq!(hydrogen.dataset("allen").unwrap().as_scalar(), Some(1.0));

    // only allen has oxygen
    let oxygen = store.read_group(&path("o/abundance")).unwrap();
    assert_eq!(
        oxygen.attr("footer"),
        Some(footer_block("allen", "Allen 1973\n").as_str())
    );
}

#[test]
fn test_ragged_columns_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("dbase");
    fs::create_dir_all(root.join("o/o_6")).unwrap();
    fs::write(
        root.join("o/o_6/o_6.rates"),
        "2\n5.0 6.0\n 8 6 1.0e-3 2.0e-3\n 8 7 3.0e-3 4.5e-3\n-1\nrates\n",
    )
    .unwrap();

    let ioneq = Category::Ioneq.spec();
    let spec = CategorySpec::new(
        "rates",
        ioneq.schema,
        Decoder::Grid(GridDecoder::whitespace(2)),
        Layout::IonColumns,
    );
    let source = SourceDescriptor::for_ion(Ion::new("o", 6), "rates");
    let store_path = temp_dir.path().join("chianti.h5");

    let mut store = Store::open(&store_path).unwrap();
    ingestor(&root).ingest(&mut store, &source, &spec).unwrap();
    drop(store);

    let reopened = Store::open_read_only(&store_path).unwrap();
    let group = reopened.read_group(&path("o/o_6/rates")).unwrap();

    let temperature = group.dataset("temperature").unwrap();
    assert_eq!(temperature.unit(), Some("K"));
    match temperature.data() {
        Data::VarLenFloat64(rows) => {
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0], rows[1]);
            assert!((rows[0][0] - 1e5).abs() < 1e-6);
            assert!((rows[0][1] - 1e6).abs() < 1e-5);
        }
        other => panic!("unexpected data: {other:?}"),
    }
    assert_eq!(
        group.dataset("ionization fraction").unwrap().values(),
        ColumnValues::RealArray(vec![vec![1.0e-3, 2.0e-3], vec![3.0e-3, 4.5e-3]])
    );
    assert_eq!(
        group.dataset("ion").unwrap().values(),
        ColumnValues::Integer(vec![6, 7])
    );
    assert_eq!(group.dataset("ion").unwrap().unit(), Some("SKIP"));
}

#[test]
fn test_corrupt_store_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store_path = temp_dir.path().join("chianti.h5");
    let mut store = Store::open(&store_path).unwrap();
    store.ensure_group(&path("fe/fe_12")).unwrap();
    store.flush().unwrap();
    drop(store);

    let mut bytes = fs::read(&store_path).unwrap();
    bytes[0] = b'X';
    fs::write(&store_path, bytes).unwrap();
    assert!(matches!(
        Store::open(&store_path),
        Err(Error::StoreFormat { .. })
    ));
}

#[test]
fn test_missing_sources_are_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_database(&temp_dir);
    let jobs = vec![
        IngestJob::builtin(SourceDescriptor::new("ip", "chianti.ip"), Category::Ip),
        IngestJob::builtin(
            SourceDescriptor::for_ion(Ion::new("o", 6), "elvlc"),
            Category::Elvlc,
        ),
    ];
    let mut store = Store::open(temp_dir.path().join("chianti.h5")).unwrap();
    let report = ingestor(&root).ingest_all(&mut store, &jobs);
    assert!(report.is_success());
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.skipped.len(), 1);
}

#[test]
fn test_shared_ingestion_matches_sequential() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_database(&temp_dir);
    // one source per shared group, so write order cannot change footers
    let jobs: Vec<IngestJob> = all_jobs(&root)
        .into_iter()
        .filter(|job| job.source.filename() != "allen.abund")
        .collect();
    let ingestor = ingestor(&root);

    let mut sequential = Store::open(temp_dir.path().join("sequential.h5")).unwrap();
    let report = ingestor.ingest_all(&mut sequential, &jobs);
    assert!(report.is_success());
    let expected_contents = sequential.contents().unwrap();

    let shared = SharedStore::new(Store::open(temp_dir.path().join("shared.h5")).unwrap());
    let report = ingestor
        .ingest_all_shared(&shared, &jobs, 4, |_| {})
        .unwrap();
    assert!(report.is_success());
    let ids: Vec<String> = report.written.iter().map(|(s, _)| s.id()).collect();
    let expected: Vec<String> = jobs.iter().map(|j| j.source.id()).collect();
    assert_eq!(ids, expected);

    let concurrent = shared.into_inner().unwrap();
    assert_eq!(concurrent.contents().unwrap(), expected_contents);
    drop(concurrent);
    let on_disk = Store::open_read_only(temp_dir.path().join("shared.h5")).unwrap();
    assert_eq!(on_disk.contents().unwrap(), expected_contents);
}
