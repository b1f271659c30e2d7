//! # Scanner Module
//!
//! Detects which files of a root appeared, changed or vanished since the
//! last pass.
//!
//! ## Accepted Files
//! - FITS images (.fit, .fits)
//! - The same, compressed (.gz, .xz)
//! - Never entries whose name starts with the bad marker
//!
//! The walk only reads the catalog; the resulting [`ChangeSet`] is applied
//! separately, in one transaction.
//!
//! ## Example
//! ```rust,ignore
//! use fits_catalog::core::scanner::{ChangeDetector, ScanConfig};
//!
//! let detector = ChangeDetector::new(ScanConfig::default());
//! let outcome = detector.scan(&fs, &root, &store)?;
//! outcome.changes.apply(&store)?;
//! ```

mod filter;
mod walker;

pub use filter::FitsFilter;
pub use walker::{local_root, ChangeDetector, ScanConfig};

use crate::core::store::{in_transaction, CatalogStore, FileRecord, NewFile};
use crate::error::{ScanError, StoreError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A persisted file whose size or modification time changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Row to delete, together with its image
    pub old_id: i64,
    /// Record to insert in its place
    pub replacement: NewFile,
}

/// Differences between a root on disk and its persisted files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub root_id: i64,
    pub new_files: Vec<NewFile>,
    pub changed_files: Vec<ChangedFile>,
    pub removed_files: Vec<FileRecord>,
}

/// Counts of a [`ChangeSet`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub new_files: usize,
    pub changed_files: usize,
    pub removed_files: usize,
}

impl ChangeSet {
    /// An empty change set for a root
    pub fn new(root_id: i64) -> Self {
        Self {
            root_id,
            ..Default::default()
        }
    }

    /// Whether the root is in sync with the catalog
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.changed_files.is_empty() && self.removed_files.is_empty()
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            new_files: self.new_files.len(),
            changed_files: self.changed_files.len(),
            removed_files: self.removed_files.len(),
        }
    }

    /// Apply the changes in one transaction.
    ///
    /// Deletions run before insertions so a replaced file can reuse its key.
    /// On failure nothing is applied.
    pub fn apply(&self, store: &dyn CatalogStore) -> Result<(), StoreError> {
        if self.is_empty() {
            return Ok(());
        }

        let doomed: Vec<i64> = self
            .removed_files
            .iter()
            .map(|f| f.id)
            .chain(self.changed_files.iter().map(|c| c.old_id))
            .collect();
        let replacements: Vec<NewFile> = self
            .changed_files
            .iter()
            .map(|c| c.replacement.clone())
            .collect();

        in_transaction(store, |tx| {
            tx.delete_files(&doomed)?;
            tx.insert_files(&self.new_files)?;
            tx.insert_files(&replacements)
        })?;

        let summary = self.summary();
        info!(
            "Applied changes for root {}: {} new, {} changed, {} removed",
            self.root_id, summary.new_files, summary.changed_files, summary.removed_files
        );
        Ok(())
    }
}

/// Apply a change set to the catalog
pub fn apply_changes(store: &dyn CatalogStore, changes: &ChangeSet) -> Result<(), StoreError> {
    changes.apply(store)
}

/// Result of walking one root
#[derive(Debug)]
pub struct ScanOutcome {
    /// Name of the root walked
    pub root: String,
    pub changes: ChangeSet,
    /// Directories and entries that could not be read
    pub errors: Vec<ScanError>,
    /// Number of directories listed
    pub directories_visited: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use std::path::Path;

    fn new_file(root_id: i64, name: &str, mtime_millis: i64) -> NewFile {
        NewFile {
            root_id,
            path: ".".to_string(),
            name: name.to_string(),
            size: 2880,
            mtime_millis,
        }
    }

    #[test]
    fn empty_change_set() {
        let changes = ChangeSet::new(1);
        assert!(changes.is_empty());
        assert_eq!(changes.summary(), ChangeSummary::default());
    }

    #[test]
    fn replacement_reuses_key() {
        let store = MemoryStore::new();
        let root = in_transaction(&store, |tx| tx.add_root("archive", Path::new("/mnt"))).unwrap();

        let mut first = ChangeSet::new(root.id);
        first.new_files.push(new_file(root.id, "a.fits", 1));
        first.apply(&store).unwrap();
        let old = store.files_in_dir(root.id, ".").unwrap().remove(0);

        let mut second = ChangeSet::new(root.id);
        second.changed_files.push(ChangedFile {
            old_id: old.id,
            replacement: new_file(root.id, "a.fits", 2),
        });
        apply_changes(&store, &second).unwrap();

        let files = store.files_in_dir(root.id, ".").unwrap();
        assert_eq!(files.len(), 1);
        assert_ne!(files[0].id, old.id);
        assert_eq!(files[0].mtime_millis, 2);
    }

    #[test]
    fn failed_apply_changes_nothing() {
        let store = MemoryStore::new();
        let root = in_transaction(&store, |tx| tx.add_root("archive", Path::new("/mnt"))).unwrap();

        let mut first = ChangeSet::new(root.id);
        first.new_files.push(new_file(root.id, "a.fits", 1));
        first.apply(&store).unwrap();
        let existing = store.files_in_dir(root.id, ".").unwrap().remove(0);

        let mut clash = ChangeSet::new(root.id);
        clash.removed_files.push(existing.clone());
        clash.new_files.push(new_file(root.id, "b.fits", 1));
        clash.new_files.push(new_file(root.id, "b.fits", 1));

        assert!(clash.apply(&store).is_err());
        assert_eq!(store.files_in_dir(root.id, ".").unwrap(), vec![existing]);
    }
}
