//! Default header-to-metadata mapping shared by all profiles.

use super::{FrameKind, NormalizedMeta};
use crate::core::header::HeaderCard;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

const FRAME_KINDS: &[(&str, FrameKind)] = &[
    ("LIGHT", FrameKind::Light),
    ("DARK", FrameKind::Dark),
    ("FLAT", FrameKind::Flat),
    ("BIAS", FrameKind::Bias),
    ("Light Frame", FrameKind::Light),
    ("Dark Frame", FrameKind::Dark),
    ("Flat Frame", FrameKind::Flat),
    ("Bias Frame", FrameKind::Bias),
    ("Master Bias", FrameKind::MasterBias),
    ("Master Dark", FrameKind::MasterDark),
    ("Master Flat", FrameKind::MasterFlat),
    ("Master DarkFlat", FrameKind::MasterDarkFlat),
    ("Bad Pixel Map", FrameKind::BadPixelMap),
    ("Integration", FrameKind::Integration),
];

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Look up the first of `keys` present in the header.
///
/// Values are repaired once; a value that stays unreadable counts as absent.
fn lookup(cards: &[HeaderCard], keys: &[&str]) -> Option<String> {
    let card = keys
        .iter()
        .find_map(|key| cards.iter().find(|c| c.key == *key))?;

    match card.checked_value() {
        Ok(value) => {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        Err(e) => {
            warn!("Ignoring header value: {}", e);
            None
        }
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    // Fortran-style exponents show up in older headers
    let value: f64 = raw.trim().replace(['D', 'd'], "E").parse().ok()?;
    value.is_finite().then_some(value)
}

fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    let value = parse_float(raw)?;
    (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
}

/// Parse a header timestamp.
///
/// Accepts ISO date-times with a `T` or space separator and an optional
/// fractional second, or a bare date (taken as midnight).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn frame_kind(raw: Option<String>) -> FrameKind {
    raw.and_then(|name| {
        FRAME_KINDS
            .iter()
            .find(|(label, _)| *label == name)
            .map(|(_, kind)| *kind)
    })
    .unwrap_or(FrameKind::Unknown)
}

/// Map the well-known header keys onto a [`NormalizedMeta`].
///
/// Total over its input: anything missing or unparsable is `None`, and an
/// unrecognised frame type is [`FrameKind::Unknown`].
pub fn default_mapping(cards: &[HeaderCard]) -> NormalizedMeta {
    let float = |keys: &[&str]| lookup(cards, keys).as_deref().and_then(parse_float);
    let int = |keys: &[&str]| lookup(cards, keys).as_deref().and_then(parse_int);
    let timestamp = |keys: &[&str]| lookup(cards, keys).as_deref().and_then(parse_timestamp);

    NormalizedMeta {
        profile: String::new(),
        frame_kind: frame_kind(lookup(cards, &["IMAGETYP"])),
        camera_name: lookup(cards, &["INSTRUME"]),
        exposure: float(&["EXPOSURE", "EXPTIME"]),
        camera_temperature: float(&["CCD-TEMP", "SET-TEMP"]),
        object_name: lookup(cards, &["OBJECT"]),
        filter: lookup(cards, &["FILTER"]),
        xbin: int(&["XBINNING"]),
        ybin: int(&["YBINNING"]),
        gain: int(&["GAIN"]),
        offset: int(&["OFFSET"]),
        telescope: lookup(cards, &["TELESCOP"]),
        datetime_local: timestamp(&["DATE-LOC"]),
        datetime_utc: timestamp(&["DATE-OBS"]).map(|t| t.and_utc()),
    }
}
