//! # FITS Catalog
//!
//! Keeps a catalog of astronomical FITS images in step with the folders
//! they live in, and groups them into sets for stacking.
//!
//! ## Architecture
//! The library is split into a core engine and presentation layers:
//! - `core` - Change detection, header extraction, normalization, grouping
//! - `events` - Event-driven progress reporting
//! - `error` - Error types
//! - `cli` - Command-line interface (binary only)

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{CatalogError, Result};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. Filtering follows
/// `RUST_LOG`, falling back to `default_directive`. A second call is a no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
