use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Capability name of decoded audio.
pub const AUDIO_RAW: &str = "audio/x-raw";
/// Capability name of decoded video.
pub const VIDEO_RAW: &str = "video/x-raw";

/// Negotiated type/format label of the data flowing through a port,
/// e.g. `audio/x-raw` or `video/x-h264`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Caps(String);

impl Caps {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Top level media family (`audio`, `video`, `text`, ...).
    pub fn family(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl Display for Caps {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Caps {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// What a port template is able to carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapsFilter {
    Any,
    /// Anything of one media family, e.g. `audio`.
    Family(String),
}

impl CapsFilter {
    pub fn family(family: &str) -> Self {
        Self::Family(family.to_string())
    }

    pub fn accepts(&self, caps: &Caps) -> bool {
        match self {
            CapsFilter::Any => true,
            CapsFilter::Family(family) => caps.family() == family,
        }
    }

    pub fn intersects(&self, other: &CapsFilter) -> bool {
        match (self, other) {
            (CapsFilter::Any, _) | (_, CapsFilter::Any) => true,
            (CapsFilter::Family(a), CapsFilter::Family(b)) => a == b,
        }
    }
}

impl From<&Caps> for CapsFilter {
    fn from(caps: &Caps) -> Self {
        CapsFilter::family(caps.family())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }

    /// Request template of the muxer input for this media type.
    pub fn muxer_template(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio_%u",
            MediaType::Video => "video_%u",
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a discovered stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamClass {
    Audio,
    Video,
    Unsupported,
}

impl StreamClass {
    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            StreamClass::Audio => Some(MediaType::Audio),
            StreamClass::Video => Some(MediaType::Video),
            StreamClass::Unsupported => None,
        }
    }
}

/// Only decoded audio and decoded video have a branch to go to.
pub fn classify(caps: &Caps) -> StreamClass {
    if caps.has_prefix(AUDIO_RAW) {
        StreamClass::Audio
    } else if caps.has_prefix(VIDEO_RAW) {
        StreamClass::Video
    } else {
        StreamClass::Unsupported
    }
}
