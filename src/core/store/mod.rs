//! # Store Module
//!
//! Durable catalog of roots, files, images, raw header cards and image sets.
//!
//! ## Entities
//! - `Root` - a named storage location
//! - `FileRecord` - one cataloged file, unique per (root, path, name)
//! - image rows and their header cards, owned by a file
//! - `ImageSet` - images sharing target, frame kind, instrument and session
//!
//! Deleting a root or file removes everything it owns. Every mutation runs
//! inside a [`CatalogTx`] obtained from [`CatalogStore::transaction`].
//!
//! ## Backends
//! - `SqliteStore` - Persistent storage using SQLite
//! - `MemoryStore` - For testing

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{in_transaction, CatalogStore, CatalogTx};

use crate::core::grouper::SetKey;
use crate::core::header::HeaderCard;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A named storage location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub id: i64,
    /// Unique human name
    pub name: String,
    /// Absolute path of the root directory
    pub path: PathBuf,
}

/// A persisted file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub root_id: i64,
    /// Directory relative to the root, `"."` for the root itself
    pub path: String,
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch
    pub mtime_millis: i64,
}

impl FileRecord {
    /// Whether the file on disk still matches this record
    pub fn is_unchanged(&self, size: u64, mtime_millis: i64) -> bool {
        self.size == size && self.mtime_millis == mtime_millis
    }
}

/// A file record not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub root_id: i64,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mtime_millis: i64,
}

/// A file without an image, together with its root
#[derive(Debug, Clone)]
pub struct UnprocessedFile {
    pub file: FileRecord,
    pub root: Root,
}

/// An image with header cards but no set
#[derive(Debug, Clone)]
pub struct UnclassifiedImage {
    pub image_id: i64,
    pub root_id: i64,
    /// Directory of the owning file, relative to the root
    pub path: String,
    pub file_name: String,
    pub cards: Vec<HeaderCard>,
}

/// A persisted image set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSet {
    pub id: i64,
    pub key: SetKey,
}

/// Row counts of a catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub roots: usize,
    pub files: usize,
    pub images: usize,
    pub image_meta: usize,
    pub image_sets: usize,
    /// Images assigned to a set
    pub classified_images: usize,
}
