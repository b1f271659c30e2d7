//! # Core Module
//!
//! The catalog engine, independent of any front end.
//!
//! ## Modules
//! - `vfs` - Filesystem capability over disk or memory
//! - `scanner` - Detects new, changed and removed files per root
//! - `header` - Reads FITS primary headers
//! - `normalizer` - Maps raw header cards to typed metadata
//! - `store` - Persists roots, files, images and sets
//! - `extractor` - Reads headers of uncatalogued files in parallel
//! - `grouper` - Groups images into sets
//! - `pipeline` - Orchestrates the full update

pub mod extractor;
pub mod grouper;
pub mod header;
pub mod normalizer;
pub mod pipeline;
pub mod scanner;
pub mod store;
pub mod vfs;

// Re-export commonly used types
pub use grouper::SetKey;
pub use header::HeaderCard;
pub use normalizer::{FrameKind, NormalizedMeta};
pub use scanner::ChangeSet;
pub use store::{CatalogStore, Root};
