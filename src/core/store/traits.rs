//! Catalog store trait definitions.

use super::{
    CatalogStats, FileRecord, ImageSet, NewFile, Root, UnclassifiedImage, UnprocessedFile,
};
use crate::core::grouper::SetKey;
use crate::core::header::HeaderCard;
use crate::error::StoreError;
use std::collections::BTreeSet;
use std::path::Path;

/// Mutations available inside a transaction
pub trait CatalogTx {
    /// Register a new root. Names are unique.
    fn add_root(&mut self, name: &str, path: &Path) -> Result<Root, StoreError>;

    /// Point an existing root at a new location
    fn set_root_path(&mut self, name: &str, path: &Path) -> Result<Root, StoreError>;

    /// Bulk insert file records
    fn insert_files(&mut self, files: &[NewFile]) -> Result<(), StoreError>;

    /// Delete file records by id, together with their images
    fn delete_files(&mut self, ids: &[i64]) -> Result<(), StoreError>;

    /// Create an image for a file with one metadata row per card
    fn insert_image(&mut self, file_id: i64, cards: &[HeaderCard]) -> Result<i64, StoreError>;

    /// Find the oldest set matching `key`.
    ///
    /// Every field must be equal (absent matches absent) except the camera
    /// temperature, which matches within `tolerance` degrees when present.
    fn find_matching_set(
        &mut self,
        key: &SetKey,
        tolerance: f64,
    ) -> Result<Option<ImageSet>, StoreError>;

    /// Create a new set
    fn create_set(&mut self, key: &SetKey) -> Result<ImageSet, StoreError>;

    /// Assign an image to a set
    fn assign_set(&mut self, image_id: i64, set_id: i64) -> Result<(), StoreError>;
}

/// Trait for catalog store backends
pub trait CatalogStore: Send + Sync {
    /// Run `work` in one transaction.
    ///
    /// Committed when `work` returns `Ok`; otherwise nothing it did is kept.
    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn CatalogTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    /// All roots, ordered by name
    fn roots(&self) -> Result<Vec<Root>, StoreError>;

    /// Look up a root by name
    fn root_by_name(&self, name: &str) -> Result<Option<Root>, StoreError>;

    /// Files persisted under exactly `path` of a root
    fn files_in_dir(&self, root_id: i64, path: &str) -> Result<Vec<FileRecord>, StoreError>;

    /// Distinct directories of a root that hold persisted files
    fn file_dirs(&self, root_id: i64) -> Result<BTreeSet<String>, StoreError>;

    /// Files that have no image yet
    fn unprocessed_files(&self) -> Result<Vec<UnprocessedFile>, StoreError>;

    /// Images that have header cards but no set
    fn unclassified_images(&self) -> Result<Vec<UnclassifiedImage>, StoreError>;

    /// All sets, oldest first
    fn image_sets(&self) -> Result<Vec<ImageSet>, StoreError>;

    /// Image ids assigned to a set
    fn set_members(&self, set_id: i64) -> Result<Vec<i64>, StoreError>;

    /// Row counts
    fn stats(&self) -> Result<CatalogStats, StoreError>;
}

/// Run `work` in a transaction and return its result
pub fn in_transaction<T>(
    store: &dyn CatalogStore,
    work: impl FnOnce(&mut dyn CatalogTx) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut work = Some(work);
    let mut output = None;

    store.transaction(&mut |tx| {
        let work = work
            .take()
            .ok_or_else(|| StoreError::QueryFailed("transaction body ran twice".to_string()))?;
        output = Some(work(tx)?);
        Ok(())
    })?;

    output.ok_or_else(|| StoreError::QueryFailed("transaction produced no result".to_string()))
}
