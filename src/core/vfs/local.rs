//! Local disk implementation using walkdir.

use super::{DirEntryInfo, Filesystem, ROOT_DIR};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// A directory tree on the local disk
#[derive(Debug, Clone)]
pub struct LocalFs {
    base: PathBuf,
    follow_symlinks: bool,
}

impl LocalFs {
    /// Create a filesystem rooted at `base`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            follow_symlinks: false,
        }
    }

    /// Follow symbolic links while listing
    pub fn with_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    fn resolve(&self, dir: &str) -> PathBuf {
        if dir == ROOT_DIR || dir.is_empty() {
            self.base.clone()
        } else {
            self.base.join(dir)
        }
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Filesystem for LocalFs {
    fn read_dir(&self, dir: &str) -> io::Result<Vec<io::Result<DirEntryInfo>>> {
        let path = self.resolve(dir);
        // Surface a missing or unreadable directory as a single error
        std::fs::read_dir(&path)?;

        let walker = WalkDir::new(&path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();

        let entries = walker
            .into_iter()
            .map(|entry_result| {
                let entry = entry_result.map_err(io::Error::from)?;
                let metadata = entry.metadata().map_err(io::Error::from)?;
                Ok(DirEntryInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir: metadata.is_dir(),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_millis: modified_millis(&metadata),
                })
            })
            .collect();

        Ok(entries)
    }

    fn open(&self, dir: &str, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(dir).join(name))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn describe(&self) -> String {
        self.base.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lists_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("Darks")).unwrap();
        fs::write(temp_dir.path().join("light.fits"), b"DUMMY CONTENT").unwrap();

        let local = LocalFs::new(temp_dir.path());
        let entries: Vec<_> = local
            .read_dir(".")
            .unwrap()
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(entries.len(), 2);
        let darks = entries.iter().find(|e| e.name == "Darks").unwrap();
        assert!(darks.is_dir);
        let light = entries.iter().find(|e| e.name == "light.fits").unwrap();
        assert!(!light.is_dir);
        assert_eq!(light.size, 13);
        assert!(light.modified_millis > 0);
    }

    #[test]
    fn nested_listing_uses_relative_path() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        fs::write(temp_dir.path().join("a/b/x.fit"), b"x").unwrap();

        let local = LocalFs::new(temp_dir.path());
        let entries = local.read_dir("a/b").unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].as_ref().unwrap().name, "x.fit");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let local = LocalFs::new(temp_dir.path());

        assert!(local.read_dir("does/not/exist").is_err());
    }

    #[test]
    fn open_reads_content() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("x.fits"), b"abc").unwrap();

        let local = LocalFs::new(temp_dir.path());
        let mut content = String::new();
        local
            .open(".", "x.fits")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        assert_eq!(content, "abc");
    }
}
