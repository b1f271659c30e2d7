//! # Header Module
//!
//! Turns a capture file into an ordered list of header cards.
//!
//! Only the primary header is read; pixel data is never touched. Compressed
//! files (`.gz`, `.xz`) are decoded transparently, so callers never need to
//! know compression was used.

mod fits;

pub use fits::FitsHeaderReader;

use crate::core::vfs::{self, Filesystem};
use crate::error::HeaderError;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Read;
use xz2::read::XzDecoder;

/// One key/value header entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderCard {
    pub key: String,
    pub value: String,
}

impl HeaderCard {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The card value, repaired at most once.
    ///
    /// Tabs are common in hand-typed OBJECT values but are not printable, so a
    /// failing value has its tabs replaced by spaces and is checked again. A
    /// value that still fails is an error.
    pub fn checked_value(&self) -> Result<Cow<'_, str>, HeaderError> {
        if is_printable(&self.value) {
            return Ok(Cow::Borrowed(&self.value));
        }

        let repaired = self.value.replace('\t', " ");
        if is_printable(&repaired) {
            Ok(Cow::Owned(repaired))
        } else {
            Err(HeaderError::NonPrintable {
                key: self.key.clone(),
            })
        }
    }
}

fn is_printable(value: &str) -> bool {
    !value.chars().any(char::is_control)
}

/// Trait for header readers
pub trait HeaderReader: Send + Sync {
    /// Read the header cards of an already-decoded stream
    fn read_cards(&self, source: &mut dyn Read, origin: &str) -> Result<Vec<HeaderCard>, HeaderError>;
}

/// Stream compression recognised by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
}

impl Compression {
    /// Detect compression from a file name
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".gz") {
            Compression::Gzip
        } else if lower.ends_with(".xz") {
            Compression::Xz
        } else {
            Compression::None
        }
    }
}

/// Wrap a raw stream in the decoder its file name calls for
pub fn open_decoded(name: &str, raw: Box<dyn Read + Send>) -> Box<dyn Read + Send> {
    match Compression::from_name(name) {
        Compression::Gzip => Box::new(MultiGzDecoder::new(raw)),
        Compression::Xz => Box::new(XzDecoder::new(raw)),
        Compression::None => raw,
    }
}

/// Open, decode and read the header cards of one file
pub fn read_file_cards(
    reader: &dyn HeaderReader,
    fs: &dyn Filesystem,
    dir: &str,
    name: &str,
) -> Result<Vec<HeaderCard>, HeaderError> {
    let origin = vfs::join(dir, name);
    let raw = fs.open(dir, name).map_err(|source| HeaderError::Open {
        path: origin.clone(),
        source,
    })?;

    let mut decoded = open_decoded(name, raw);
    reader.read_cards(&mut decoded, &origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vfs::MemoryFs;

    #[test]
    fn printable_value_is_borrowed() {
        let card = HeaderCard::new("OBJECT", "M57");
        assert!(matches!(card.checked_value().unwrap(), Cow::Borrowed("M57")));
    }

    #[test]
    fn tab_is_repaired_once() {
        let card = HeaderCard::new("OBJECT", "Crab\tNebula");
        assert_eq!(card.checked_value().unwrap(), "Crab Nebula");
    }

    #[test]
    fn other_control_characters_fail_after_repair() {
        let card = HeaderCard::new("OBJECT", "Crab\tNe\u{7}bula");
        let error = card.checked_value().unwrap_err();
        assert!(matches!(error, HeaderError::NonPrintable { ref key } if key == "OBJECT"));
    }

    fn header_bytes(lines: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for line in lines.iter().chain(std::iter::once(&"END")) {
            let mut card = line.as_bytes().to_vec();
            card.resize(80, b' ');
            bytes.extend_from_slice(&card);
        }
        bytes.resize(2880, b' ');
        bytes
    }

    #[test]
    fn xz_file_is_decoded() {
        use std::io::Write;
        use xz2::write::XzEncoder;

        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder
            .write_all(&header_bytes(&["SIMPLE  =                    T", "FILTER  = 'Ha'"]))
            .unwrap();
        let fs = MemoryFs::new();
        fs.write("Light/m42_Ha.fits.xz", &encoder.finish().unwrap())
            .unwrap();

        let cards =
            read_file_cards(&FitsHeaderReader::new(), &fs, "Light", "m42_Ha.fits.xz").unwrap();
        assert_eq!(
            cards,
            vec![HeaderCard::new("SIMPLE", "T"), HeaderCard::new("FILTER", "Ha")]
        );
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let fs = MemoryFs::new();
        let error = read_file_cards(&FitsHeaderReader::new(), &fs, ".", "gone.fits").unwrap_err();
        assert!(matches!(error, HeaderError::Open { ref path, .. } if path == "gone.fits"));
    }

    #[test]
    fn compression_from_name() {
        assert_eq!(Compression::from_name("a.fits.gz"), Compression::Gzip);
        assert_eq!(Compression::from_name("a.FITS.XZ"), Compression::Xz);
        assert_eq!(Compression::from_name("a.fits"), Compression::None);
    }
}
