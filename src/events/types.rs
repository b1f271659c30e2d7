//! Event type definitions for progress reporting.

use serde::{Deserialize, Serialize};

/// All events emitted by the catalog pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Change detection events
    Scan(ScanEvent),
    /// Header extraction events
    Extract(ExtractEvent),
    /// Set grouping events
    Group(GroupEvent),
    /// Pipeline-level events
    Pipeline(PipelineEvent),
}

/// Events while walking a root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Walking a root has started
    Started { root: String },
    /// Progress update after each directory
    Progress(ScanProgress),
    /// An entry or directory could not be read; the walk continues
    Error {
        root: String,
        path: String,
        message: String,
    },
    /// Walking a root completed
    Completed {
        root: String,
        new_files: usize,
        changed_files: usize,
        removed_files: usize,
    },
}

/// Progress information during a walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub root: String,
    /// Number of directories listed so far
    pub directories_scanned: usize,
    /// Number of accepted files seen so far
    pub files_seen: usize,
    /// Directory just listed, relative to the root
    pub current_dir: String,
}

/// Events during header extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractEvent {
    /// Extraction has started
    Started { total_files: usize },
    /// Progress update after each batch
    Progress(ExtractProgress),
    /// A file could not be read; it is retried on the next run
    Error { path: String, message: String },
    /// A batch could not be committed and was rolled back
    BatchRolledBack { batch: usize, message: String },
    /// Extraction completed
    Completed { images_created: usize, failed: usize },
}

/// Progress information during extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractProgress {
    /// Number of files handled so far
    pub completed: usize,
    /// Total number of files to handle
    pub total: usize,
    /// Last file of the batch just handled
    pub current_file: String,
}

/// Events during set grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupEvent {
    /// Grouping has started
    Started { total_images: usize },
    /// Progress update after each batch
    Progress(GroupProgress),
    /// Grouping completed
    Completed {
        images_processed: usize,
        sets_created: usize,
    },
}

/// Progress information during grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupProgress {
    /// Number of images examined so far
    pub processed: usize,
    /// Total number of unclassified images
    pub total: usize,
    /// Number of sets created so far
    pub sets_created: usize,
}

/// Pipeline-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Pipeline has started
    Started,
    /// Moving to a new phase
    PhaseChanged { phase: PipelinePhase },
    /// Pipeline completed successfully
    Completed { summary: PipelineSummary },
    /// Pipeline was cancelled
    Cancelled,
    /// Pipeline encountered a fatal error
    Error { message: String },
}

/// Phases of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    Scanning,
    Applying,
    Extracting,
    Grouping,
}

/// Summary of pipeline results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Number of roots walked
    pub roots_scanned: usize,
    pub files_added: usize,
    pub files_changed: usize,
    pub files_removed: usize,
    /// Images created by extraction
    pub images_created: usize,
    /// Images assigned to a set
    pub images_grouped: usize,
    pub sets_created: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Scanning => write!(f, "Scanning"),
            PipelinePhase::Applying => write!(f, "Applying changes"),
            PipelinePhase::Extracting => write!(f, "Extracting headers"),
            PipelinePhase::Grouping => write!(f, "Grouping"),
        }
    }
}
