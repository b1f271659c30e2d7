//! Entry filtering logic for the scanner.

use std::collections::HashSet;

/// Decides which directories are walked and which files are cataloged
#[derive(Debug, Clone)]
pub struct FitsFilter {
    /// Lowercased name prefix marking an entry as bad
    bad_marker: String,
    /// Image extensions, lowercased, without the dot
    extensions: HashSet<String>,
    /// Compression extensions stripped before the image extension check
    compressed_extensions: HashSet<String>,
}

impl FitsFilter {
    /// Create a filter with the default marker and extensions
    pub fn new() -> Self {
        Self {
            bad_marker: "bad".to_string(),
            extensions: ["fit", "fits"].iter().map(|s| s.to_string()).collect(),
            compressed_extensions: ["gz", "xz"].iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the bad-entry marker (matched case-insensitively)
    pub fn with_bad_marker(mut self, marker: &str) -> Self {
        self.bad_marker = marker.to_lowercase();
        self
    }

    /// Override the accepted image extensions
    pub fn with_extensions(mut self, extensions: &[String]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Override the recognised compression extensions
    pub fn with_compressed_extensions(mut self, extensions: &[String]) -> Self {
        self.compressed_extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Whether the entry name carries the bad marker.
    ///
    /// An empty marker marks nothing.
    pub fn is_bad(&self, name: &str) -> bool {
        !self.bad_marker.is_empty() && name.to_lowercase().starts_with(&self.bad_marker)
    }

    /// Whether a directory should be descended into
    pub fn should_enter(&self, name: &str) -> bool {
        !self.is_bad(name)
    }

    /// Whether a file should be cataloged
    pub fn should_include(&self, name: &str) -> bool {
        if self.is_bad(name) {
            return false;
        }

        let lower = name.to_lowercase();
        let stem = match lower.rsplit_once('.') {
            Some((stem, ext)) if self.compressed_extensions.contains(ext) => stem,
            _ => lower.as_str(),
        };

        match stem.rsplit_once('.') {
            Some((_, ext)) => self.extensions.contains(ext),
            None => false,
        }
    }
}

impl Default for FitsFilter {
    fn default() -> Self {
        Self::new()
    }
}
