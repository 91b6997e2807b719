//! Video codec identifiers.

use serde::{Deserialize, Serialize};

/// Video codec identifier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    #[default]
    H265,
    Mpeg2,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// Human readable name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
            Self::Mpeg2 => "MPEG-2",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
        }
    }

    /// Numeric identifier passed across the codec-runtime ABI.
    pub fn runtime_id(self) -> i32 {
        match self {
            Self::H264 => 1,
            Self::H265 => 2,
            Self::Mpeg2 => 3,
            Self::Vp9 => 4,
            Self::Av1 => 5,
        }
    }

    /// Inverse of [`VideoCodec::runtime_id`].
    pub fn from_runtime_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::H264),
            2 => Some(Self::H265),
            3 => Some(Self::Mpeg2),
            4 => Some(Self::Vp9),
            5 => Some(Self::Av1),
            _ => None,
        }
    }
}
