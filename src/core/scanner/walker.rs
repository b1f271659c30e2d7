//! Incremental directory walk.
//!
//! The tree is walked depth-first with an explicit stack, one directory per
//! step. Each listing is compared with the files persisted for that exact
//! directory.

use super::{ChangeSet, ChangedFile, FitsFilter, ScanOutcome};
use crate::core::pipeline::CancellationToken;
use crate::core::store::{CatalogStore, FileRecord, NewFile, Root};
use crate::core::vfs::{self, DirEntryInfo, Filesystem, LocalFs, ROOT_DIR};
use crate::error::{CatalogError, ScanError};
use crate::events::{null_sender, Event, EventSender, ScanEvent, ScanProgress};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use tracing::{debug, info, warn};

/// Configuration for the change detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Name prefix of entries to skip, matched case-insensitively
    pub bad_marker: String,
    /// Image extensions to catalog
    pub extensions: Vec<String>,
    /// Compression extensions allowed after an image extension
    pub compressed_extensions: Vec<String>,
    /// Whether to follow symbolic links on local disks
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            bad_marker: "bad".to_string(),
            extensions: vec!["fit".to_string(), "fits".to_string()],
            compressed_extensions: vec!["gz".to_string(), "xz".to_string()],
            follow_symlinks: false,
        }
    }
}

/// Open the local directory of a root.
///
/// Fails when the path is missing or not a directory.
pub fn local_root(root: &Root, follow_symlinks: bool) -> Result<LocalFs, ScanError> {
    if !root.path.exists() {
        return Err(ScanError::RootNotFound {
            root: root.name.clone(),
            path: root.path.clone(),
        });
    }
    if !root.path.is_dir() {
        return Err(ScanError::RootNotDirectory {
            root: root.name.clone(),
            path: root.path.clone(),
        });
    }
    Ok(LocalFs::new(root.path.clone()).with_symlinks(follow_symlinks))
}

/// Compares a filesystem walk with the persisted files of a root
pub struct ChangeDetector {
    filter: FitsFilter,
}

impl ChangeDetector {
    /// Create a detector with the given configuration
    pub fn new(config: ScanConfig) -> Self {
        let filter = FitsFilter::new()
            .with_bad_marker(&config.bad_marker)
            .with_extensions(&config.extensions)
            .with_compressed_extensions(&config.compressed_extensions);
        Self { filter }
    }

    /// Walk a root and compute its change set
    pub fn scan(
        &self,
        fs: &dyn Filesystem,
        root: &Root,
        store: &dyn CatalogStore,
    ) -> Result<ScanOutcome, CatalogError> {
        self.scan_with_events(fs, root, store, &null_sender(), &CancellationToken::new())
    }

    /// Walk a root and compute its change set, reporting progress.
    ///
    /// Unreadable entries and subdirectories are logged and recorded in the
    /// outcome; files under an unreadable directory, or in a directory with
    /// an unreadable entry, are never reported as removed. Failing to list the root itself aborts the walk. A cancelled
    /// walk returns [`ScanError::Cancelled`] since a partial walk cannot tell
    /// removed files from unvisited ones.
    pub fn scan_with_events(
        &self,
        fs: &dyn Filesystem,
        root: &Root,
        store: &dyn CatalogStore,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, CatalogError> {
        info!("Scanning root {} at {}", root.name, fs.describe());
        events.send(Event::Scan(ScanEvent::Started {
            root: root.name.clone(),
        }));

        let mut changes = ChangeSet::new(root.id);
        let mut errors = Vec::new();
        let mut stack = vec![ROOT_DIR.to_string()];
        let mut visited: HashSet<String> = HashSet::new();
        let mut unreadable: Vec<String> = Vec::new();
        let mut files_seen = 0;

        while let Some(dir) = stack.pop() {
            if cancel.is_cancelled() {
                info!("Scan of root {} cancelled", root.name);
                return Err(ScanError::Cancelled.into());
            }

            debug!("Scanning directory {}", dir);
            visited.insert(dir.clone());

            let entries = match fs.read_dir(&dir) {
                Ok(entries) => entries,
                Err(source) if dir == ROOT_DIR => {
                    return Err(root_error(root, fs, source).into());
                }
                Err(source) => {
                    warn!("Cannot read directory {} in root {}: {}", dir, root.name, source);
                    events.send(Event::Scan(ScanEvent::Error {
                        root: root.name.clone(),
                        path: dir.clone(),
                        message: source.to_string(),
                    }));
                    errors.push(ScanError::ReadDirectory {
                        path: dir.clone(),
                        source,
                    });
                    unreadable.push(dir);
                    continue;
                }
            };

            let mut persisted: HashMap<String, FileRecord> = store
                .files_in_dir(root.id, &dir)?
                .into_iter()
                .map(|f| (f.name.clone(), f))
                .collect();
            let mut entry_failed = false;

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(source) => {
                        warn!("Skipping unreadable entry in {}: {}", dir, source);
                        events.send(Event::Scan(ScanEvent::Error {
                            root: root.name.clone(),
                            path: dir.clone(),
                            message: source.to_string(),
                        }));
                        errors.push(ScanError::ReadEntry {
                            path: dir.clone(),
                            source,
                        });
                        entry_failed = true;
                        continue;
                    }
                };

                if entry.is_dir {
                    if self.filter.should_enter(&entry.name) {
                        stack.push(vfs::join(&dir, &entry.name));
                    } else {
                        debug!("Skipping bad directory {}", vfs::join(&dir, &entry.name));
                    }
                    continue;
                }

                if !self.filter.should_include(&entry.name) {
                    continue;
                }
                files_seen += 1;

                match persisted.remove(&entry.name) {
                    None => {
                        debug!("New file {}", vfs::join(&dir, &entry.name));
                        changes.new_files.push(new_file(root, &dir, &entry));
                    }
                    Some(record) if record.is_unchanged(entry.size, entry.modified_millis) => {}
                    Some(record) => {
                        debug!("Changed file {}", vfs::join(&dir, &entry.name));
                        changes.changed_files.push(ChangedFile {
                            old_id: record.id,
                            replacement: new_file(root, &dir, &entry),
                        });
                    }
                }
            }

            // Whatever was not rediscovered is gone, unless it may be the
            // entry that could not be read
            if entry_failed {
                unreadable.push(dir.clone());
            } else {
                for record in persisted.into_values() {
                    debug!("Removed file {}", vfs::join(&record.path, &record.name));
                    changes.removed_files.push(record);
                }
            }

            events.send(Event::Scan(ScanEvent::Progress(ScanProgress {
                root: root.name.clone(),
                directories_scanned: visited.len(),
                files_seen,
                current_dir: dir,
            })));
        }

        // Directories that disappeared entirely
        for dir in store.file_dirs(root.id)? {
            if visited.contains(&dir) || is_below_any(&dir, &unreadable) {
                continue;
            }
            debug!("Directory {} of root {} vanished", dir, root.name);
            changes.removed_files.extend(store.files_in_dir(root.id, &dir)?);
        }

        let summary = changes.summary();
        info!(
            "Root {}: {} new, {} changed, {} removed files",
            root.name, summary.new_files, summary.changed_files, summary.removed_files
        );
        events.send(Event::Scan(ScanEvent::Completed {
            root: root.name.clone(),
            new_files: summary.new_files,
            changed_files: summary.changed_files,
            removed_files: summary.removed_files,
        }));

        Ok(ScanOutcome {
            root: root.name.clone(),
            changes,
            errors,
            directories_visited: visited.len(),
        })
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

fn new_file(root: &Root, dir: &str, entry: &DirEntryInfo) -> NewFile {
    NewFile {
        root_id: root.id,
        path: dir.to_string(),
        name: entry.name.clone(),
        size: entry.size,
        mtime_millis: entry.modified_millis,
    }
}

fn root_error(root: &Root, fs: &dyn Filesystem, source: io::Error) -> ScanError {
    match source.kind() {
        io::ErrorKind::NotFound => ScanError::RootNotFound {
            root: root.name.clone(),
            path: root.path.clone(),
        },
        _ => ScanError::ReadDirectory {
            path: fs.describe(),
            source,
        },
    }
}

fn is_below_any(dir: &str, parents: &[String]) -> bool {
    parents
        .iter()
        .any(|p| dir == p || dir.starts_with(&format!("{}/", p)))
}
