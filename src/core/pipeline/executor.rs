//! Pipeline execution implementation.

use super::{CancellationToken, FilesystemFactory};
use crate::core::extractor::{ExtractConfig, ExtractionReport, MetadataExtractor};
use crate::core::grouper::{GroupingConfig, GroupingOutcome, SetGrouper};
use crate::core::scanner::{
    apply_changes, local_root, ChangeDetector, ChangeSummary, ScanConfig, ScanOutcome,
};
use crate::core::store::{CatalogStore, MemoryStore, Root};
use crate::core::vfs::Filesystem;
use crate::error::{CatalogError, ScanError, StoreError};
use crate::events::{
    null_sender, Event, EventSender, PipelineEvent, PipelinePhase, PipelineSummary,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Configuration for the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Change detection settings
    pub scan: ScanConfig,
    /// Header extraction settings
    pub extract: ExtractConfig,
    /// Set grouping settings
    pub grouping: GroupingConfig,
}

/// Outcome of scanning and applying one root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootReport {
    /// Root name
    pub root: String,
    /// Applied changes, `None` when the root was skipped or rolled back
    pub changes: Option<ChangeSummary>,
    /// Non-fatal errors met while walking or applying
    pub errors: Vec<String>,
}

/// Result of pipeline execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub roots: Vec<RootReport>,
    /// `None` when the stage did not run
    pub extraction: Option<ExtractionReport>,
    /// `None` when the stage did not run
    pub grouping: Option<GroupingOutcome>,
    /// Whether the run stopped early
    pub cancelled: bool,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl PipelineReport {
    /// Totals for progress displays
    pub fn summary(&self) -> PipelineSummary {
        let applied = || self.roots.iter().filter_map(|r| r.changes);

        PipelineSummary {
            roots_scanned: applied().count(),
            files_added: applied().map(|c| c.new_files).sum(),
            files_changed: applied().map(|c| c.changed_files).sum(),
            files_removed: applied().map(|c| c.removed_files).sum(),
            images_created: self.extraction.as_ref().map_or(0, |e| e.images_created),
            images_grouped: self.grouping.as_ref().map_or(0, |g| g.images_processed),
            sets_created: self.grouping.as_ref().map_or(0, |g| g.sets_created),
            duration_ms: self.duration_ms,
        }
    }

    /// Every non-fatal error of the run
    pub fn errors(&self) -> Vec<String> {
        let roots = self
            .roots
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| format!("{}: {}", r.root, e)));
        let extraction = self.extraction.iter().flat_map(|e| e.errors.iter().cloned());
        let grouping = self.grouping.iter().flat_map(|g| g.errors.iter().cloned());

        roots.chain(extraction).chain(grouping).collect()
    }
}

/// Builder for pipeline configuration
pub struct PipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<dyn CatalogStore>>,
    filesystems: Option<Arc<FilesystemFactory>>,
    cancel: CancellationToken,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            store: None,
            filesystems: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the catalog store
    pub fn store(mut self, store: Arc<dyn CatalogStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the whole configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set scanner configuration
    pub fn scan_config(mut self, config: ScanConfig) -> Self {
        self.config.scan = config;
        self
    }

    /// Set extraction configuration
    pub fn extract_config(mut self, config: ExtractConfig) -> Self {
        self.config.extract = config;
        self
    }

    /// Set grouping configuration
    pub fn grouping_config(mut self, config: GroupingConfig) -> Self {
        self.config.grouping = config;
        self
    }

    /// Set the bad-entry marker
    pub fn bad_marker(mut self, marker: &str) -> Self {
        self.config.scan.bad_marker = marker.to_string();
        self
    }

    /// Set the number of header workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.extract.workers = workers;
        self
    }

    /// Set the camera temperature tolerance in degrees
    pub fn temperature_tolerance(mut self, tolerance: f64) -> Self {
        self.config.grouping.temperature_tolerance = tolerance;
        self
    }

    /// Open roots through `factory` instead of the local disk
    pub fn filesystems<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Root) -> Result<Arc<dyn Filesystem>, ScanError> + Send + Sync + 'static,
    {
        self.filesystems = Some(Arc::new(factory));
        self
    }

    /// Share a cancellation token with the caller
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline, CatalogError> {
        let follow_symlinks = self.config.scan.follow_symlinks;
        let filesystems = match self.filesystems {
            Some(filesystems) => filesystems,
            None => {
                let local: Arc<FilesystemFactory> =
                    Arc::new(move |root: &Root| -> Result<Arc<dyn Filesystem>, ScanError> {
                        Ok(Arc::new(local_root(root, follow_symlinks)?))
                    });
                local
            }
        };

        if self.config.grouping.batch_size == 0 {
            return Err(CatalogError::Config(
                "grouping batch size must be at least 1".to_string(),
            ));
        }

        Ok(Pipeline {
            detector: ChangeDetector::new(self.config.scan.clone()),
            extractor: MetadataExtractor::new(self.config.extract.clone())?,
            grouper: SetGrouper::new(self.config.grouping.clone()),
            store: match self.store {
                Some(store) => store,
                None => Arc::new(MemoryStore::new()),
            },
            filesystems,
            cancel: self.cancel,
            config: self.config,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The catalog update pipeline
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn CatalogStore>,
    filesystems: Arc<FilesystemFactory>,
    detector: ChangeDetector,
    extractor: MetadataExtractor,
    grouper: SetGrouper,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The catalog this pipeline updates
    pub fn store(&self) -> &dyn CatalogStore {
        self.store.as_ref()
    }

    /// A token that cancels this pipeline
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn select_roots(&self, names: &[String]) -> Result<Vec<Root>, CatalogError> {
        if names.is_empty() {
            return Ok(self.store.roots()?);
        }

        let mut roots = Vec::with_capacity(names.len());
        for name in names {
            let root = self
                .store
                .root_by_name(name)?
                .ok_or_else(|| StoreError::UnknownRoot(name.clone()))?;
            roots.push(root);
        }
        Ok(roots)
    }

    /// Walk the named roots (all roots when empty) and apply their changes.
    ///
    /// Roots are walked in parallel; each root's changes are applied in its
    /// own transaction. A root that cannot be walked or applied is reported
    /// and does not affect the others.
    pub fn scan_roots(
        &self,
        names: &[String],
        events: &EventSender,
    ) -> Result<Vec<RootReport>, CatalogError> {
        let roots = self.select_roots(names)?;

        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Scanning,
        }));

        let outcomes: Vec<(Root, Result<ScanOutcome, CatalogError>)> = roots
            .into_par_iter()
            .map(|root| {
                let outcome = (self.filesystems)(&root)
                    .map_err(CatalogError::from)
                    .and_then(|fs| {
                        self.detector.scan_with_events(
                            fs.as_ref(),
                            &root,
                            self.store.as_ref(),
                            events,
                            &self.cancel,
                        )
                    });
                (root, outcome)
            })
            .collect();

        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Applying,
        }));

        let mut reports = Vec::with_capacity(outcomes.len());
        for (root, outcome) in outcomes {
            let mut report = RootReport {
                root: root.name.clone(),
                ..Default::default()
            };

            match outcome {
                Ok(outcome) => {
                    report
                        .errors
                        .extend(outcome.errors.iter().map(|e| e.to_string()));
                    match apply_changes(self.store.as_ref(), &outcome.changes) {
                        Ok(()) => report.changes = Some(outcome.changes.summary()),
                        Err(e) => {
                            warn!("Changes for root {} rolled back: {}", root.name, e);
                            report.errors.push(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!("Skipping root {}: {}", root.name, e);
                    report.errors.push(e.to_string());
                }
            }

            reports.push(report);
        }

        Ok(reports)
    }

    /// Read headers of every file without an image
    pub fn extract(&self, events: &EventSender) -> Result<ExtractionReport, CatalogError> {
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Extracting,
        }));

        Ok(self.extractor.extract_with_events(
            self.store.as_ref(),
            self.filesystems.as_ref(),
            events,
            &self.cancel,
        )?)
    }

    /// Assign every classifiable image to a set
    pub fn group(&self, events: &EventSender) -> Result<GroupingOutcome, CatalogError> {
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Grouping,
        }));

        Ok(self
            .grouper
            .combine_with_events(self.store.as_ref(), events, &self.cancel)?)
    }

    /// Run every stage over all roots without events
    pub fn run(&self) -> Result<PipelineReport, CatalogError> {
        self.run_with_events(&null_sender())
    }

    /// Run every stage over all roots with event reporting
    pub fn run_with_events(&self, events: &EventSender) -> Result<PipelineReport, CatalogError> {
        let start_time = Instant::now();
        events.send(Event::Pipeline(PipelineEvent::Started));

        let result = self.run_stages(events, start_time);

        match &result {
            Ok(report) if report.cancelled => {
                info!("Pipeline cancelled after {} ms", report.duration_ms);
                events.send(Event::Pipeline(PipelineEvent::Cancelled));
            }
            Ok(report) => {
                info!("Pipeline finished in {} ms", report.duration_ms);
                events.send(Event::Pipeline(PipelineEvent::Completed {
                    summary: report.summary(),
                }));
            }
            Err(e) => {
                events.send(Event::Pipeline(PipelineEvent::Error {
                    message: e.to_string(),
                }));
            }
        }

        result
    }

    fn run_stages(
        &self,
        events: &EventSender,
        start_time: Instant,
    ) -> Result<PipelineReport, CatalogError> {
        let mut report = PipelineReport {
            roots: self.scan_roots(&[], events)?,
            ..Default::default()
        };

        if !self.cancel.is_cancelled() {
            report.extraction = Some(self.extract(events)?);
        }
        if !self.cancel.is_cancelled() {
            report.grouping = Some(self.group(events)?);
        }

        report.cancelled = self.cancel.is_cancelled();
        report.duration_ms = start_time.elapsed().as_millis() as u64;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::in_transaction;
    use crate::core::vfs::MemoryFs;
    use crate::events::EventChannel;
    use std::path::Path;

    fn light_header(filter: &str) -> Vec<u8> {
        let lines = [
            "SIMPLE  =                    T".to_string(),
            "IMAGETYP= 'LIGHT   '".to_string(),
            format!("FILTER  = '{}'", filter),
            "EXPOSURE=                   30".to_string(),
            "DATE-LOC= '2020-05-30T02:22:49'".to_string(),
            "END".to_string(),
        ];
        let mut bytes = Vec::new();
        for line in &lines {
            let mut card = line.as_bytes().to_vec();
            card.resize(80, b' ');
            bytes.extend_from_slice(&card);
        }
        bytes.resize(2880, b' ');
        bytes
    }

    fn memory_pipeline(fs: Arc<MemoryFs>) -> Pipeline {
        let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
        in_transaction(store.as_ref(), |tx| tx.add_root("archive", Path::new("/mnt/astro")))
            .unwrap();

        Pipeline::builder()
            .store(store)
            .workers(2)
            .filesystems(move |_: &Root| -> Result<Arc<dyn Filesystem>, ScanError> {
                Ok(fs.clone())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn pipeline_builder_applies_settings() {
        let pipeline = Pipeline::builder()
            .bad_marker("reject")
            .workers(3)
            .temperature_tolerance(0.5)
            .build()
            .unwrap();

        assert_eq!(pipeline.config().scan.bad_marker, "reject");
        assert_eq!(pipeline.config().extract.workers, 3);
        assert_eq!(pipeline.config().grouping.temperature_tolerance, 0.5);
    }

    #[test]
    fn pipeline_rejects_zero_workers() {
        assert!(matches!(
            Pipeline::builder().workers(0).build(),
            Err(CatalogError::Config(_))
        ));
    }

    #[test]
    fn run_catalogs_extracts_and_groups() {
        let fs = Arc::new(MemoryFs::new());
        fs.write("Light/a.fits", &light_header("R")).unwrap();
        fs.write("Light/b.fits", &light_header("R")).unwrap();
        fs.write("Light/c.fits", &light_header("B")).unwrap();
        let pipeline = memory_pipeline(fs);

        let (sender, receiver) = EventChannel::new();
        let report = pipeline.run_with_events(&sender).unwrap();
        let summary = report.summary();

        assert_eq!(summary.files_added, 3);
        assert_eq!(summary.images_created, 3);
        assert_eq!(summary.images_grouped, 3);
        assert_eq!(summary.sets_created, 2);
        assert!(report.errors().is_empty());
        assert!(receiver
            .drain()
            .iter()
            .any(|e| matches!(e, Event::Pipeline(PipelineEvent::Completed { .. }))));
    }

    #[test]
    fn second_run_changes_nothing() {
        let fs = Arc::new(MemoryFs::new());
        fs.write("Light/a.fits", &light_header("R")).unwrap();
        let pipeline = memory_pipeline(fs);

        pipeline.run().unwrap();
        let summary = pipeline.run().unwrap().summary();

        assert_eq!(summary.files_added + summary.files_changed + summary.files_removed, 0);
        assert_eq!(summary.images_created, 0);
        assert_eq!(summary.sets_created, 0);
    }

    #[test]
    fn unknown_root_name_is_an_error() {
        let pipeline = memory_pipeline(Arc::new(MemoryFs::new()));
        let result = pipeline.scan_roots(&["nope".to_string()], &null_sender());
        assert!(matches!(
            result,
            Err(CatalogError::Store(StoreError::UnknownRoot(_)))
        ));
    }

    #[test]
    fn missing_local_root_is_reported_per_root() {
        let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
        in_transaction(store.as_ref(), |tx| {
            tx.add_root("gone", Path::new("/definitely/not/here"))
        })
        .unwrap();

        let pipeline = Pipeline::builder().store(store).build().unwrap();
        let reports = pipeline.scan_roots(&[], &null_sender()).unwrap();

        assert_eq!(reports.len(), 1);
        assert!(reports[0].changes.is_none());
        assert!(reports[0].errors[0].contains("gone"));
    }

    #[test]
    fn cancelled_run_stops_before_extraction() {
        let fs = Arc::new(MemoryFs::new());
        fs.write("Light/a.fits", &light_header("R")).unwrap();
        let pipeline = memory_pipeline(fs);
        pipeline.cancellation_token().cancel();

        let report = pipeline.run().unwrap();

        assert!(report.cancelled);
        assert!(report.extraction.is_none());
        assert_eq!(pipeline.store().stats().unwrap().files, 0);
    }
}
