//! # Filesystem Module
//!
//! Directory enumeration behind a trait so the change detector runs the same
//! way over a local disk and over an in-memory container.
//!
//! Paths handed to a [`Filesystem`] are relative to its root, use `/` as the
//! separator, and the root directory itself is `"."`.

mod local;
mod memory;

pub use local::LocalFs;
pub use memory::MemoryFs;

use serde::{Deserialize, Serialize};
use std::io::{self, Read};

/// Relative path of a filesystem root
pub const ROOT_DIR: &str = ".";

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    /// File or directory name (no path)
    pub name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Last modification time, milliseconds since the Unix epoch
    pub modified_millis: i64,
}

/// Trait for filesystems the scanner can walk
pub trait Filesystem: Send + Sync {
    /// List one directory level.
    ///
    /// The outer error means the directory itself could not be listed; inner
    /// errors are single entries that could not be inspected.
    fn read_dir(&self, dir: &str) -> io::Result<Vec<io::Result<DirEntryInfo>>>;

    /// Open a file for reading
    fn open(&self, dir: &str, name: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Human-readable location, for logs and errors
    fn describe(&self) -> String;
}

/// Join a relative directory and an entry name
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT_DIR || dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_from_root_drops_dot() {
        assert_eq!(join(".", "Lights"), "Lights");
    }

    #[test]
    fn join_nested() {
        assert_eq!(join("2021-12-25/Crab", "Lights"), "2021-12-25/Crab/Lights");
        assert_eq!(join("Darks/", "image.fits"), "Darks/image.fits");
    }
}
