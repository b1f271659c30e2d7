//! # Normalizer Module
//!
//! Maps raw header cards onto one canonical record, whichever capture
//! program wrote the file.
//!
//! ## How It Works
//! 1. Walk the profile list in priority order
//! 2. The first profile that accepts the cards maps them
//! 3. The generic profile accepts everything, so a record is always produced
//!
//! Fields that cannot be resolved are left as `None`; normalization never fails.

mod mapping;
mod profiles;

pub use mapping::{default_mapping, parse_timestamp};
pub use profiles::{builtin_profiles, Detection, Profile};

use crate::core::header::HeaderCard;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Category of an exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Unknown,
    Bias,
    Dark,
    Flat,
    Light,
    BadPixelMap,
    MasterFlat,
    MasterDark,
    MasterDarkFlat,
    MasterBias,
    Integration,
}

impl FrameKind {
    /// Whether frames of this kind are grouped into sets automatically
    pub fn is_combinable(&self) -> bool {
        matches!(
            self,
            FrameKind::Bias | FrameKind::Dark | FrameKind::Flat | FrameKind::Light
        )
    }

    /// Stable name used in the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Unknown => "UNKNOWN",
            FrameKind::Bias => "BIAS",
            FrameKind::Dark => "DARK",
            FrameKind::Flat => "FLAT",
            FrameKind::Light => "LIGHT",
            FrameKind::BadPixelMap => "BADPIXELMAP",
            FrameKind::MasterFlat => "MASTER_FLAT",
            FrameKind::MasterDark => "MASTER_DARK",
            FrameKind::MasterDarkFlat => "MASTER_DARKFLAT",
            FrameKind::MasterBias => "MASTER_BIAS",
            FrameKind::Integration => "INTEGRATION",
        }
    }

    /// Inverse of [`FrameKind::as_str`]; unknown names map to `Unknown`
    pub fn from_name(name: &str) -> Self {
        match name {
            "BIAS" => FrameKind::Bias,
            "DARK" => FrameKind::Dark,
            "FLAT" => FrameKind::Flat,
            "LIGHT" => FrameKind::Light,
            "BADPIXELMAP" => FrameKind::BadPixelMap,
            "MASTER_FLAT" => FrameKind::MasterFlat,
            "MASTER_DARK" => FrameKind::MasterDark,
            "MASTER_DARKFLAT" => FrameKind::MasterDarkFlat,
            "MASTER_BIAS" => FrameKind::MasterBias,
            "INTEGRATION" => FrameKind::Integration,
            _ => FrameKind::Unknown,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical metadata of one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMeta {
    /// Name of the profile that produced this record
    pub profile: String,
    pub frame_kind: FrameKind,
    pub camera_name: Option<String>,
    /// Exposure in seconds
    pub exposure: Option<f64>,
    /// Sensor temperature in degrees Celsius
    pub camera_temperature: Option<f64>,
    pub object_name: Option<String>,
    pub filter: Option<String>,
    pub xbin: Option<i64>,
    pub ybin: Option<i64>,
    pub gain: Option<i64>,
    pub offset: Option<i64>,
    pub telescope: Option<String>,
    /// Capture start in the observer's local time
    pub datetime_local: Option<NaiveDateTime>,
    /// Capture start in UTC
    pub datetime_utc: Option<DateTime<Utc>>,
}

impl Default for NormalizedMeta {
    fn default() -> Self {
        Self {
            profile: String::new(),
            frame_kind: FrameKind::Unknown,
            camera_name: None,
            exposure: None,
            camera_temperature: None,
            object_name: None,
            filter: None,
            xbin: None,
            ybin: None,
            gain: None,
            offset: None,
            telescope: None,
            datetime_local: None,
            datetime_utc: None,
        }
    }
}

impl NormalizedMeta {
    /// The observing night this capture belongs to.
    ///
    /// Local time is preferred over UTC. Captures before noon belong to the
    /// night that started the previous evening.
    pub fn session_date(&self) -> Option<NaiveDate> {
        let capture = self
            .datetime_local
            .or_else(|| self.datetime_utc.map(|t| t.naive_utc()))?;

        if capture.hour() < 12 {
            capture.date().pred_opt()
        } else {
            Some(capture.date())
        }
    }
}

/// Profile dispatcher
///
/// Built once with an explicit, ordered profile list and never modified.
pub struct Normalizer {
    profiles: Vec<Profile>,
}

impl Normalizer {
    /// Create a normalizer over the built-in profiles
    pub fn new() -> Self {
        Self::with_profiles(builtin_profiles())
    }

    /// Create a normalizer over a custom profile list.
    ///
    /// The list is ordered by descending priority; equal priorities keep
    /// their given order.
    pub fn with_profiles(mut profiles: Vec<Profile>) -> Self {
        profiles.sort_by_key(|p| std::cmp::Reverse(p.priority));
        Self { profiles }
    }

    /// Normalize the cards of one image. `origin` names the file for logs.
    pub fn normalize(&self, cards: &[HeaderCard], origin: &str) -> NormalizedMeta {
        match self.profiles.iter().find(|p| p.accepts(cards)) {
            Some(profile) => {
                if profile.detection == Detection::Always {
                    info!(
                        "Cannot determine creator software of {}, falling back to {} profile",
                        origin, profile.name
                    );
                }
                profile.normalize(cards)
            }
            None => {
                info!("No profile accepted {}, leaving metadata unmapped", origin);
                NormalizedMeta::default()
            }
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}
