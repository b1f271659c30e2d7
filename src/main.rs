//! # fitscat
//!
//! Command-line interface for the FITS catalog.
//!
//! ## Usage
//! ```bash
//! fitscat root add archive /mnt/astro
//! fitscat update --workers 4
//! fitscat stats --json
//! ```

mod cli;

use fits_catalog::Result;

fn main() -> Result<()> {
    cli::run()
}
