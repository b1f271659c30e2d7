//! Capture-program profiles.

use super::mapping::default_mapping;
use super::NormalizedMeta;
use crate::core::header::HeaderCard;

/// Priority of profiles that recognise a specific capture program
pub const DEFAULT_PRIORITY: u32 = 1000;

/// How a profile recognises the files it handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The value of `key` contains `needle`
    HeaderContains {
        key: &'static str,
        needle: &'static str,
    },
    /// Accepts every header
    Always,
}

impl Detection {
    fn accepts(&self, cards: &[HeaderCard]) -> bool {
        match self {
            Detection::HeaderContains { key, needle } => cards
                .iter()
                .find(|c| c.key == *key)
                .is_some_and(|c| c.value.contains(needle)),
            Detection::Always => true,
        }
    }
}

/// A capture program and the mapping used for its headers
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: &'static str,
    pub priority: u32,
    pub detection: Detection,
    pub mapper: fn(&[HeaderCard]) -> NormalizedMeta,
}

impl Profile {
    /// Whether this profile handles the given header
    pub fn accepts(&self, cards: &[HeaderCard]) -> bool {
        self.detection.accepts(cards)
    }

    /// Map the header and tag the record with this profile's name
    pub fn normalize(&self, cards: &[HeaderCard]) -> NormalizedMeta {
        let mut meta = (self.mapper)(cards);
        meta.profile = self.name.to_string();
        meta
    }
}

fn creator(name: &'static str, key: &'static str, needle: &'static str) -> Profile {
    Profile {
        name,
        priority: DEFAULT_PRIORITY,
        detection: Detection::HeaderContains { key, needle },
        mapper: default_mapping,
    }
}

/// The built-in profiles, highest priority first
pub fn builtin_profiles() -> Vec<Profile> {
    vec![
        creator("Sequence Generator Pro", "CREATOR", "Sequence Generator Pro"),
        creator("N.I.N.A.", "SWCREATE", "N.I.N.A."),
        creator("Astro Photography Tool", "SWCREATE", "Astro Photography Tool"),
        creator("MaxIm DL", "SWCREATE", "MaxIm DL"),
        creator("SharpCap", "SWCREATE", "SharpCap"),
        Profile {
            name: "Generic",
            priority: 0,
            detection: Detection::Always,
            mapper: default_mapping,
        },
    ]
}
