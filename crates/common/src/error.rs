//! Central error types for the decode pipeline (thiserror-based).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::FourCc;

/// Integer status codes surfaced across the C ABI.
pub mod status {
    /// One frame is available through the frame accessor.
    pub const OK: i32 = 0;
    /// Normal end of stream: the decoder holds no more frames.
    pub const STREAM_EXHAUSTED: i32 = 1;
    pub const INITIALIZATION_FAILED: i32 = -1;
    pub const RESOURCE_EXHAUSTED: i32 = -2;
    pub const TIMEOUT: i32 = -3;
    pub const DEVICE_BUSY: i32 = -4;
    pub const RUNTIME_FAILURE: i32 = -5;
    pub const UNSUPPORTED_SURFACE: i32 = -6;
    pub const INVALID_ARGUMENT: i32 = -7;
    pub const CONFIG: i32 = -8;
}

/// The initialization step that failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InitStage {
    OpenSession,
    DeclareCodec,
    DecodeHeader,
    ValidateParameters,
    QuerySurfaces,
    AllocatePool,
    InitDecoder,
}

impl InitStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenSession => "open session",
            Self::DeclareCodec => "declare codec",
            Self::DecodeHeader => "decode header",
            Self::ValidateParameters => "validate parameters",
            Self::QuerySurfaces => "query surfaces",
            Self::AllocatePool => "allocate frame pool",
            Self::InitDecoder => "init decoder",
        }
    }
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode engine errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Decoder initialization failed at {stage}: {reason}")]
    Initialization { stage: InitStage, reason: String },

    #[error("Decoder unusable after a non-retryable initialization failure: {0}")]
    Poisoned(String),

    #[error("No free frame buffer among {capacity} surfaces")]
    ResourceExhausted { capacity: usize },

    #[error("Synchronize did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Device still busy after {retries} retries")]
    DeviceBusy { retries: u32 },

    #[error("End of stream: no buffered frames remain")]
    StreamExhausted,

    #[error("{operation} failed: {reason}")]
    Runtime {
        operation: &'static str,
        reason: String,
    },

    #[error("Unsupported surface format for planar output: {0:?}")]
    UnsupportedFormat(FourCc),

    #[error("Invalid surface geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Frame pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DecodeError {
    /// Map to the integer taxonomy of the C ABI. Never returns `status::OK`.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Initialization { .. } | Self::Poisoned(_) => status::INITIALIZATION_FAILED,
            Self::ResourceExhausted { .. } => status::RESOURCE_EXHAUSTED,
            Self::Timeout(_) => status::TIMEOUT,
            Self::DeviceBusy { .. } => status::DEVICE_BUSY,
            Self::StreamExhausted => status::STREAM_EXHAUSTED,
            Self::Runtime { .. } => status::RUNTIME_FAILURE,
            Self::UnsupportedFormat(_) | Self::InvalidGeometry(_) | Self::Pool(_) => {
                status::UNSUPPORTED_SURFACE
            }
            Self::InvalidArgument(_) => status::INVALID_ARGUMENT,
            Self::Config(_) => status::CONFIG,
        }
    }

    /// End of stream is a normal condition, not a broken stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::StreamExhausted)
    }
}

/// Frame pool construction and bookkeeping errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Frame pool needs at least one surface")]
    NoSurfaces,

    #[error("Invalid surface dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Surface alignment must be a power of two, got {0}")]
    InvalidAlignment(u32),

    #[error("Failed to reserve {bytes} bytes for the frame pool arena")]
    AllocationFailed { bytes: usize },

    #[error("Frame pool size overflows: {surfaces} surfaces of {surface_size} bytes")]
    SizeOverflow { surfaces: usize, surface_size: usize },

    #[error("Plane of surface {index} ends at {end}, beyond arena of {arena} bytes")]
    PlaneOutOfBounds {
        index: usize,
        end: usize,
        arena: usize,
    },

    #[error("Surface index {index} out of range (pool holds {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Convenience Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_is_distinct_from_failures() {
        let eos = DecodeError::StreamExhausted;
        assert!(eos.is_end_of_stream());
        assert_eq!(eos.status_code(), status::STREAM_EXHAUSTED);

        let timeout = DecodeError::Timeout(Duration::from_secs(60));
        assert!(!timeout.is_end_of_stream());
        assert!(timeout.status_code() < 0);
    }

    #[test]
    fn failures_never_report_ok() {
        let errors = [
            DecodeError::Initialization {
                stage: InitStage::DecodeHeader,
                reason: "no header".into(),
            },
            DecodeError::Poisoned("unsupported".into()),
            DecodeError::ResourceExhausted { capacity: 4 },
            DecodeError::DeviceBusy { retries: 10 },
            DecodeError::Runtime {
                operation: "submit",
                reason: "device failed".into(),
            },
            DecodeError::UnsupportedFormat(FourCc::Rgb4),
            DecodeError::Pool(PoolError::NoSurfaces),
        ];
        for err in &errors {
            assert_ne!(err.status_code(), status::OK, "{err}");
        }
    }

    #[test]
    fn init_error_names_stage() {
        let err = DecodeError::Initialization {
            stage: InitStage::QuerySurfaces,
            reason: "status -3".into(),
        };
        assert!(err.to_string().contains("query surfaces"));
    }
}
