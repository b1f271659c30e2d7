//! # Pipeline Module
//!
//! Orchestrates the full catalog update.
//!
//! ## Pipeline Stages
//! 1. **Scan** - Walk every root and compute its change set
//! 2. **Apply** - Persist each root's changes in its own transaction
//! 3. **Extract** - Read headers of files without an image
//! 4. **Group** - Assign classified images to sets
//!
//! ## Parallelism
//! Roots are walked in parallel with rayon; header reads run on the
//! extractor's bounded pool.

mod executor;

pub use executor::{
    Pipeline, PipelineBuilder, PipelineConfig, PipelineReport, RootReport,
};

use crate::core::store::Root;
use crate::core::vfs::Filesystem;
use crate::error::ScanError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Opens the filesystem of a root
pub type FilesystemFactory =
    dyn Fn(&Root) -> Result<Arc<dyn Filesystem>, ScanError> + Send + Sync;

/// Shared flag asking long-running stages to stop.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());

        token.cancel();
        assert!(observer.is_cancelled());
    }
}
