//! Codec runtime boundary.
//!
//! The decode engine never talks to a codec implementation directly. It
//! drives a [`CodecRuntime`] through a fixed protocol:
//!
//! 1. `open_session` / `declare_codec`
//! 2. `decode_header` (non-consuming peek at the first payload)
//! 3. `validate` / `query_surfaces`
//! 4. the engine allocates a [`FramePool`] and hands it to `init_decoder`
//! 5. per frame: `submit` → (`DeviceBusy` retry) → `synchronize`
//! 6. `close`
//!
//! Two backends are provided:
//!
//! - [`DynamicRuntime`]: a codec runtime shim loaded at run time with
//!   `libloading` (see [`ffi`]).
//! - [`SimulatedRuntime`]: an in-process device with fault injection, used
//!   by tests and for running without hardware.

use std::time::Duration;

use thiserror::Error;

use vd_common::{
    Implementation, IoPattern, PoolError, StreamParameters, SurfaceRequest, VideoCodec,
};

use crate::bitstream::BitstreamView;
use crate::pool::FramePool;

mod dynamic;
pub mod ffi;
mod sim;

pub use dynamic::DynamicRuntime;
pub use ffi::{RuntimeLibrary, RuntimeLoadError};
pub use sim::{
    rendered_luma, FaultPlan, InitFault, SequenceHeader, SimStats, SimStream, SimulatedRuntime,
    UnitType,
};

/// Token for a pending asynchronous decode operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SyncPoint(pub u64);

/// Outcome of one asynchronous submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    /// A decode was scheduled. `output` is the pool index that will hold the
    /// picture once `sync` completes.
    Scheduled { sync: SyncPoint, output: usize },
    /// The runtime needs more compressed input (or, when draining, has no
    /// buffered pictures left).
    MoreData,
    /// The work surface was consumed; submit again with another free one.
    MoreSurface,
    /// Transient: the device cannot accept work right now.
    DeviceBusy,
}

/// Failures reported by a codec runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("operation did not complete within {0:?}")]
    WaitTimeout(Duration),

    #[error("no sequence header found in the bitstream")]
    HeaderNotFound,

    #[error("{operation}: not supported by this runtime")]
    Unsupported { operation: &'static str },

    #[error("decoder not initialized")]
    NotInitialized,

    #[error("unknown sync point {0:?}")]
    UnknownSyncPoint(SyncPoint),

    #[error("surface {0} is still locked by the runtime")]
    SurfaceLocked(usize),

    #[error("input of {0} bytes does not fit the runtime's 32-bit window")]
    InputTooLarge(usize),

    #[error("{operation} returned status {status}")]
    Status { operation: &'static str, status: i32 },

    #[error("frame pool: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Load(#[from] RuntimeLoadError),
}

impl RuntimeError {
    /// Unsupported codecs and formats will not start working on retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// A codec runtime the decode engine can drive.
pub trait CodecRuntime {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn open_session(&mut self, implementation: Implementation) -> Result<(), RuntimeError>;

    fn declare_codec(&mut self, codec: VideoCodec, io_pattern: IoPattern)
        -> Result<(), RuntimeError>;

    /// Parse stream parameters from the header without consuming input.
    fn decode_header(&mut self, bitstream: &BitstreamView<'_>)
        -> Result<StreamParameters, RuntimeError>;

    /// Check `params` against what the runtime supports, returning the
    /// (possibly corrected) parameters to use.
    fn validate(&mut self, params: &StreamParameters) -> Result<StreamParameters, RuntimeError>;

    fn query_surfaces(&mut self, params: &StreamParameters) -> Result<SurfaceRequest, RuntimeError>;

    /// Commit parameters. The pool stays owned by the engine and is passed
    /// back on every submit/synchronize.
    fn init_decoder(
        &mut self,
        params: &StreamParameters,
        pool: &mut FramePool,
    ) -> Result<(), RuntimeError>;

    /// Submit an asynchronous decode. `None` drains buffered pictures.
    /// Lock flags in `pool` are updated to reflect what the runtime holds.
    fn submit(
        &mut self,
        bitstream: Option<&mut BitstreamView<'_>>,
        work_surface: usize,
        pool: &mut FramePool,
    ) -> Result<Submission, RuntimeError>;

    /// Block until `sync` completes or `timeout` elapses.
    fn synchronize(
        &mut self,
        sync: SyncPoint,
        pool: &mut FramePool,
        timeout: Duration,
    ) -> Result<(), RuntimeError>;

    /// Release the session. Safe to call more than once.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unsupported_is_fatal() {
        assert!(RuntimeError::Unsupported { operation: "declare codec" }.is_fatal());
        assert!(!RuntimeError::HeaderNotFound.is_fatal());
        assert!(!RuntimeError::WaitTimeout(Duration::from_millis(5)).is_fatal());
        assert!(!RuntimeError::Status {
            operation: "init",
            status: -17
        }
        .is_fatal());
    }
}
