//! Matching key of an image set.

use crate::core::normalizer::{FrameKind, NormalizedMeta};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The fields two images must share to belong to one set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetKey {
    pub root_id: i64,
    /// Directory of the images, relative to the root
    pub path: String,
    pub frame_kind: FrameKind,
    pub session_date: Option<NaiveDate>,
    pub object_name: Option<String>,
    pub filter: Option<String>,
    pub exposure: Option<f64>,
    pub camera_name: Option<String>,
    pub xbin: Option<i64>,
    pub ybin: Option<i64>,
    pub gain: Option<i64>,
    pub offset: Option<i64>,
    pub telescope: Option<String>,
    pub camera_temperature: Option<f64>,
}

impl SetKey {
    /// Build the key of an image located at `path` under root `root_id`
    pub fn from_meta(root_id: i64, path: &str, meta: &NormalizedMeta) -> Self {
        Self {
            root_id,
            path: path.to_string(),
            frame_kind: meta.frame_kind,
            session_date: meta.session_date(),
            object_name: meta.object_name.clone(),
            filter: meta.filter.clone(),
            exposure: meta.exposure,
            camera_name: meta.camera_name.clone(),
            xbin: meta.xbin,
            ybin: meta.ybin,
            gain: meta.gain,
            offset: meta.offset,
            telescope: meta.telescope.clone(),
            camera_temperature: meta.camera_temperature,
        }
    }

    /// Whether an image with this key belongs to the set keyed `candidate`.
    ///
    /// All fields are compared exactly, absent matching absent. A present
    /// temperature matches within `tolerance` degrees (inclusive); an absent
    /// one only matches a set without temperature.
    pub fn matches(&self, candidate: &SetKey, tolerance: f64) -> bool {
        let temperature = match (self.camera_temperature, candidate.camera_temperature) {
            (Some(t), Some(c)) => c >= t - tolerance && c <= t + tolerance,
            (None, None) => true,
            _ => false,
        };

        temperature
            && self.root_id == candidate.root_id
            && self.path == candidate.path
            && self.frame_kind == candidate.frame_kind
            && self.session_date == candidate.session_date
            && self.object_name == candidate.object_name
            && self.filter == candidate.filter
            && self.exposure == candidate.exposure
            && self.camera_name == candidate.camera_name
            && self.xbin == candidate.xbin
            && self.ybin == candidate.ybin
            && self.gain == candidate.gain
            && self.offset == candidate.offset
            && self.telescope == candidate.telescope
    }
}
