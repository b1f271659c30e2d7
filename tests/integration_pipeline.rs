//! Integration tests for the pipeline module.
//!
//! These tests run the full update over real files on disk:
//! - Plain and gzip-compressed FITS headers
//! - Grouping into sets and repeated runs
//! - Modified, unreadable and missing files

use assert_fs::prelude::*;
use assert_fs::TempDir;
use filetime::FileTime;
use fits_catalog::core::pipeline::Pipeline;
use fits_catalog::core::store::{in_transaction, CatalogStore, SqliteStore};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;

/// Build a primary header with the given cards followed by END
fn fits_header(cards: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut push = |line: String| {
        let mut card = line.into_bytes();
        card.resize(80, b' ');
        bytes.extend_from_slice(&card);
    };

    push(format!("{:<8}= {:>20}", "SIMPLE", "T"));
    for (key, value) in cards {
        push(format!("{:<8}= {}", key, value));
    }
    push("END".to_string());

    let padded = bytes.len().div_ceil(2880) * 2880;
    bytes.resize(padded, b' ');
    bytes
}

fn light(filter: &str, temperature: &str) -> Vec<u8> {
    fits_header(&[
        ("IMAGETYP", "'Light Frame'"),
        ("INSTRUME", "'ZWO ASI294MM Pro'"),
        ("OBJECT", "'M 42'"),
        ("FILTER", &format!("'{}'", filter)),
        ("EXPOSURE", "120.0"),
        ("CCD-TEMP", temperature),
        ("XBINNING", "1"),
        ("YBINNING", "1"),
        ("GAIN", "120"),
        ("DATE-LOC", "'2021-12-25T23:41:07.123'"),
        ("DATE-OBS", "'2021-12-25T22:41:07.123'"),
        ("CREATOR", "'Sequence Generator Pro v4.1'"),
    ])
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn catalog(temp: &TempDir) -> Arc<dyn CatalogStore> {
    let store = SqliteStore::open(&temp.path().join("db").join("catalog.db")).unwrap();
    in_transaction(&store, |tx| {
        tx.add_root("archive", &temp.path().join("archive"))
    })
    .unwrap();
    Arc::new(store)
}

fn pipeline(store: &Arc<dyn CatalogStore>) -> Pipeline {
    Pipeline::builder()
        .store(store.clone())
        .workers(2)
        .build()
        .unwrap()
}

fn archive() -> TempDir {
    let temp = TempDir::new().unwrap();
    let light_dir = temp.child("archive/M42/Light");
    light_dir
        .child("m42_L_001.fits")
        .write_binary(&light("L", "-10.2"))
        .unwrap();
    light_dir
        .child("m42_L_002.fits")
        .write_binary(&light("L", "-9.6"))
        .unwrap();
    light_dir
        .child("m42_Ha_001.fits.gz")
        .write_binary(&gzip(&light("Ha", "-10.0")))
        .unwrap();
    light_dir.child("notes.txt").write_str("clouds at 1am").unwrap();
    temp
}

#[test]
fn update_catalogs_and_groups() {
    let temp = archive();
    let store = catalog(&temp);

    let report = pipeline(&store).run().unwrap();
    let summary = report.summary();

    assert!(report.errors().is_empty(), "{:?}", report.errors());
    assert_eq!(summary.roots_scanned, 1);
    assert_eq!(summary.files_added, 3);
    assert_eq!(summary.images_created, 3);
    assert_eq!(summary.images_grouped, 3);
    assert_eq!(summary.sets_created, 2);

    let stats = store.stats().unwrap();
    assert_eq!(stats.image_sets, 2);
    assert_eq!(stats.classified_images, 3);

    let sets = store.image_sets().unwrap();
    let filters: Vec<Option<String>> = sets.iter().map(|s| s.key.filter.clone()).collect();
    assert!(filters.contains(&Some("L".to_string())));
    assert!(filters.contains(&Some("Ha".to_string())));
    for set in &sets {
        assert_eq!(set.key.path, "M42/Light");
        assert_eq!(
            set.key.session_date.map(|d| d.to_string()),
            Some("2021-12-25".to_string())
        );
    }
}

#[test]
fn repeated_update_is_idempotent() {
    let temp = archive();
    let store = catalog(&temp);
    let pipeline = pipeline(&store);

    pipeline.run().unwrap();
    let before = store.stats().unwrap();
    let summary = pipeline.run().unwrap().summary();

    assert_eq!(summary.files_added, 0);
    assert_eq!(summary.files_changed, 0);
    assert_eq!(summary.files_removed, 0);
    assert_eq!(summary.images_created, 0);
    assert_eq!(summary.sets_created, 0);
    assert_eq!(store.stats().unwrap(), before);
}

#[test]
fn modified_file_is_read_again() {
    let temp = archive();
    let store = catalog(&temp);
    let pipeline = pipeline(&store);
    pipeline.run().unwrap();

    let path = temp.child("archive/M42/Light/m42_L_002.fits");
    filetime::set_file_mtime(path.path(), FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

    let summary = pipeline.run().unwrap().summary();

    assert_eq!(summary.files_changed, 1);
    assert_eq!(summary.images_created, 1);
    assert_eq!(summary.images_grouped, 1);
    assert_eq!(summary.sets_created, 0);
    assert_eq!(store.stats().unwrap().images, 3);
}

#[test]
fn unreadable_header_is_retried() {
    let temp = archive();
    temp.child("archive/M42/Light/m42_L_003.fits")
        .write_binary(b"SIMPLE  =                    T")
        .unwrap();
    let store = catalog(&temp);
    let pipeline = pipeline(&store);

    let report = pipeline.run().unwrap();
    let extraction = report.extraction.as_ref().unwrap();
    assert_eq!(extraction.failed_files, 1);
    assert_eq!(extraction.images_created, 3);
    assert_eq!(report.errors().len(), 1);

    // Still without an image, so the next run tries again
    let extraction = pipeline.run().unwrap().extraction.unwrap();
    assert_eq!(extraction.files_total, 1);
    assert_eq!(extraction.failed_files, 1);
}

#[test]
fn removed_folder_drops_images() {
    let temp = archive();
    let store = catalog(&temp);
    let pipeline = pipeline(&store);
    pipeline.run().unwrap();

    std::fs::remove_dir_all(temp.child("archive/M42").path()).unwrap();
    let summary = pipeline.run().unwrap().summary();

    assert_eq!(summary.files_removed, 3);
    let stats = store.stats().unwrap();
    assert_eq!(stats.files, 0);
    assert_eq!(stats.images, 0);
    assert_eq!(stats.classified_images, 0);
}

#[test]
fn missing_root_is_reported_and_others_continue() {
    let temp = archive();
    let store = catalog(&temp);
    in_transaction(store.as_ref(), |tx| {
        tx.add_root("offline", &temp.path().join("unplugged-drive"))
    })
    .unwrap();

    let report = pipeline(&store).run().unwrap();

    let offline = report.roots.iter().find(|r| r.root == "offline").unwrap();
    assert!(offline.changes.is_none());
    assert_eq!(offline.errors.len(), 1);

    let archive = report.roots.iter().find(|r| r.root == "archive").unwrap();
    assert_eq!(archive.changes.unwrap().new_files, 3);
    assert_eq!(report.summary().sets_created, 2);
}

#[test]
fn repointed_root_keeps_catalog() {
    let temp = archive();
    let store = catalog(&temp);
    let pipeline = pipeline(&store);
    pipeline.run().unwrap();

    std::fs::rename(temp.path().join("archive"), temp.path().join("moved")).unwrap();
    in_transaction(store.as_ref(), |tx| {
        tx.set_root_path("archive", &temp.path().join("moved"))
    })
    .unwrap();

    let summary = pipeline.run().unwrap().summary();
    assert_eq!(summary.files_added + summary.files_removed, 0);
    assert_eq!(store.stats().unwrap().images, 3);
}
