//! Stream geometry, surface layout, and output descriptor types.

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;

/// Round `value` up to the next multiple of `alignment` (a power of two).
pub fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Native pixel layout of a decoded surface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FourCc {
    /// Y plane + interleaved UV at half resolution.
    #[default]
    Nv12,
    /// Packed 8-bit BGRA.
    Rgb4,
    /// Packed 10-bit RGB with 2-bit alpha.
    A2Rgb10,
}

impl FourCc {
    /// Storage cost of one pixel across all planes.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Nv12 => 12,
            Self::Rgb4 | Self::A2Rgb10 => 32,
        }
    }

    /// Packed RGB-family formats carry no separate chroma plane.
    pub fn is_packed_rgb(self) -> bool {
        matches!(self, Self::Rgb4 | Self::A2Rgb10)
    }

    /// Four-character code as transmitted across the runtime ABI.
    pub fn code(self) -> u32 {
        let tag = match self {
            Self::Nv12 => b"NV12",
            Self::Rgb4 => b"RGB4",
            Self::A2Rgb10 => b"RG10",
        };
        u32::from_le_bytes(*tag)
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match &code.to_le_bytes() {
            b"NV12" => Some(Self::Nv12),
            b"RGB4" => Some(Self::Rgb4),
            b"RG10" => Some(Self::A2Rgb10),
            _ => None,
        }
    }
}

/// Chroma subsampling of the coded stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaFormat {
    Monochrome,
    #[default]
    Yuv420,
    Yuv422,
    Yuv444,
}

impl ChromaFormat {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Monochrome),
            1 => Some(Self::Yuv420),
            2 => Some(Self::Yuv422),
            3 => Some(Self::Yuv444),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            Self::Monochrome => 0,
            Self::Yuv420 => 1,
            Self::Yuv422 => 2,
            Self::Yuv444 => 3,
        }
    }
}

/// Where the decoder writes its output surfaces.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoPattern {
    /// Surfaces live in host memory owned by the engine.
    #[default]
    SystemMemory,
    /// Surfaces live in device memory owned by the runtime.
    VideoMemory,
}

/// Sub-region of an aligned surface holding the true picture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A crop is only honoured when both dimensions are positive.
    pub fn is_set(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Geometry of a decoded surface as negotiated with the runtime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameInfo {
    pub fourcc: FourCc,
    pub chroma_format: ChromaFormat,
    /// Surface width (coded, possibly padded).
    pub width: u32,
    /// Surface height (coded, possibly padded).
    pub height: u32,
    pub crop: CropRect,
}

impl FrameInfo {
    /// The region that holds picture content: the crop rectangle when it is
    /// set, otherwise the whole surface.
    pub fn visible_rect(&self) -> CropRect {
        if self.crop.is_set() {
            self.crop
        } else {
            CropRect::new(0, 0, self.width, self.height)
        }
    }

    /// Same geometry with width/height rounded up to `alignment`.
    pub fn aligned(&self, alignment: u32) -> Self {
        Self {
            width: align_up(self.width, alignment),
            height: align_up(self.height, alignment),
            ..*self
        }
    }
}

/// Parameters parsed from the stream header. Immutable once negotiated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParameters {
    pub codec: VideoCodec,
    pub io_pattern: IoPattern,
    pub frame_info: FrameInfo,
}

/// Surface count the runtime needs for a given set of parameters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub min: u16,
    pub suggested: u16,
    pub info: FrameInfo,
}

/// Header describing the most recently produced planar frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub width: u32,
    pub height: u32,
    /// Total bytes of the planar frame (`width * height * 3 / 2` for 4:2:0).
    pub byte_size: u32,
}

impl OutputDescriptor {
    /// Descriptor for a 4:2:0 planar frame of the given size.
    pub fn yuv420(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            byte_size: width * height * 3 / 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.byte_size == 0
    }
}

/// Order of the chroma planes in the planar output.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanarLayout {
    /// Y, then V, then U.
    #[default]
    Yv12,
    /// Y, then U, then V.
    I420,
}

/// How the output buffer sizes itself for each produced frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Keep capacity across frames, grow only when a larger frame arrives.
    #[default]
    Amortized,
    /// Allocate exactly the frame size on every frame.
    Exact,
}
