//! # Extractor Module
//!
//! Reads the header of every file that has no image yet and stores it as
//! one image with one metadata row per card.
//!
//! ## Concurrency
//! Headers are read on a bounded rayon pool; every worker opens, decodes and
//! parses its own file. A single coordinating writer commits one
//! transaction per batch, so a failing batch only loses its own files, and
//! those are picked up again on the next run.

use crate::core::header::{read_file_cards, FitsHeaderReader, HeaderCard, HeaderReader};
use crate::core::pipeline::{CancellationToken, FilesystemFactory};
use crate::core::store::{in_transaction, CatalogStore, FileRecord, Root};
use crate::core::vfs::{self, Filesystem};
use crate::error::{CatalogError, HeaderError, StoreError};
use crate::events::{null_sender, Event, EventSender, ExtractEvent, ExtractProgress};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Configuration for header extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Worker threads reading headers
    pub workers: usize,
    /// Files per transaction
    pub batch_size: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        // Leave one core for the writer
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            workers: cores.saturating_sub(1).max(1),
            batch_size: 64,
        }
    }
}

/// Header cards read from one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub file_id: i64,
    pub cards: Vec<HeaderCard>,
}

/// Result of one extraction pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Files without an image when the pass started
    pub files_total: usize,
    /// Images committed
    pub images_created: usize,
    /// Files that could not be read
    pub failed_files: usize,
    /// Batches rolled back
    pub failed_batches: usize,
    /// Whether the pass stopped early
    pub cancelled: bool,
    /// Messages of the failures
    pub errors: Vec<String>,
}

/// Reads headers in parallel and stores them batch by batch
pub struct MetadataExtractor {
    config: ExtractConfig,
    pool: ThreadPool,
    reader: Box<dyn HeaderReader>,
}

impl MetadataExtractor {
    /// Create an extractor reading FITS headers
    pub fn new(config: ExtractConfig) -> Result<Self, CatalogError> {
        Self::with_reader(config, Box::new(FitsHeaderReader::new()))
    }

    /// Create an extractor with a custom header reader
    pub fn with_reader(
        config: ExtractConfig,
        reader: Box<dyn HeaderReader>,
    ) -> Result<Self, CatalogError> {
        if config.workers == 0 {
            return Err(CatalogError::Config("workers must be at least 1".to_string()));
        }
        if config.batch_size == 0 {
            return Err(CatalogError::Config("batch size must be at least 1".to_string()));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("fits-extract-{}", i))
            .build()
            .map_err(|e| CatalogError::Config(format!("cannot start worker pool: {}", e)))?;

        Ok(Self {
            config,
            pool,
            reader,
        })
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Read and repair the header cards of one file
    pub fn read_file(
        &self,
        fs: &dyn Filesystem,
        file: &FileRecord,
    ) -> Result<ExtractedImage, HeaderError> {
        let raw = read_file_cards(self.reader.as_ref(), fs, &file.path, &file.name)?;

        let cards = raw
            .iter()
            .map(|card| {
                let value = card.checked_value()?;
                Ok(HeaderCard::new(card.key.clone(), value.into_owned()))
            })
            .collect::<Result<Vec<_>, HeaderError>>()?;

        debug!(
            "Read {} cards from {}",
            cards.len(),
            vfs::join(&file.path, &file.name)
        );
        Ok(ExtractedImage {
            file_id: file.id,
            cards,
        })
    }

    /// Extract every unprocessed file without progress reporting
    pub fn extract(
        &self,
        store: &dyn CatalogStore,
        open_root: &FilesystemFactory,
    ) -> Result<ExtractionReport, StoreError> {
        self.extract_with_events(store, open_root, &null_sender(), &CancellationToken::new())
    }

    /// Extract every unprocessed file.
    ///
    /// Only the initial query can fail the whole pass. Unreadable files and
    /// failed batches are logged, recorded in the report and retried on the
    /// next run. After cancellation no new batch starts, and a batch in which
    /// cancellation was observed is not committed.
    pub fn extract_with_events(
        &self,
        store: &dyn CatalogStore,
        open_root: &FilesystemFactory,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<ExtractionReport, StoreError> {
        let pending = store.unprocessed_files()?;
        let total = pending.len();
        let mut report = ExtractionReport {
            files_total: total,
            ..Default::default()
        };

        info!(
            "Extracting headers of {} files with {} workers",
            total, self.config.workers
        );
        events.send(Event::Extract(ExtractEvent::Started { total_files: total }));

        let mut by_root: BTreeMap<i64, (Root, Vec<FileRecord>)> = BTreeMap::new();
        for item in pending {
            by_root
                .entry(item.root.id)
                .or_insert_with(|| (item.root, Vec::new()))
                .1
                .push(item.file);
        }

        let mut completed = 0;
        let mut batch_index = 0;

        'roots: for (root, files) in by_root.into_values() {
            let fs = match open_root(&root) {
                Ok(fs) => fs,
                Err(e) => {
                    warn!("Skipping {} files of root {}: {}", files.len(), root.name, e);
                    report.failed_files += files.len();
                    report.errors.push(e.to_string());
                    completed += files.len();
                    continue;
                }
            };

            for batch in files.chunks(self.config.batch_size) {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'roots;
                }

                let results: Vec<(&FileRecord, Result<ExtractedImage, HeaderError>)> =
                    self.pool.install(|| {
                        batch
                            .par_iter()
                            .map(|file| (file, self.read_file(fs.as_ref(), file)))
                            .collect()
                    });

                let mut extracted = Vec::with_capacity(results.len());
                for (file, result) in results {
                    match result {
                        Ok(image) => extracted.push(image),
                        Err(e) => {
                            let path = vfs::join(&file.path, &file.name);
                            warn!("Skipping {} in root {}: {}", path, root.name, e);
                            events.send(Event::Extract(ExtractEvent::Error {
                                path: path.clone(),
                                message: e.to_string(),
                            }));
                            report.failed_files += 1;
                            report.errors.push(format!("{}: {}", path, e));
                        }
                    }
                }

                if cancel.is_cancelled() {
                    info!("Extraction cancelled, dropping batch {}", batch_index);
                    report.cancelled = true;
                    break 'roots;
                }

                let committed = in_transaction(store, |tx| {
                    for image in &extracted {
                        tx.insert_image(image.file_id, &image.cards)?;
                    }
                    Ok(())
                });

                match committed {
                    Ok(()) => report.images_created += extracted.len(),
                    Err(e) => {
                        warn!("Extraction batch {} rolled back: {}", batch_index, e);
                        events.send(Event::Extract(ExtractEvent::BatchRolledBack {
                            batch: batch_index,
                            message: e.to_string(),
                        }));
                        report.failed_batches += 1;
                        report.errors.push(e.to_string());
                    }
                }

                completed += batch.len();
                batch_index += 1;
                events.send(Event::Extract(ExtractEvent::Progress(ExtractProgress {
                    completed,
                    total,
                    current_file: batch
                        .last()
                        .map(|f| vfs::join(&f.path, &f.name))
                        .unwrap_or_default(),
                })));
            }
        }

        info!(
            "Extracted {} images, {} files failed",
            report.images_created, report.failed_files
        );
        events.send(Event::Extract(ExtractEvent::Completed {
            images_created: report.images_created,
            failed: report.failed_files,
        }));

        Ok(report)
    }
}
