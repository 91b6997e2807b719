//! `vd-decoder`: Hardware video decode pipeline.
//!
//! Feeds compressed elementary-stream bytes into a codec runtime, manages a
//! pool of decode surfaces, drives the asynchronous submit/synchronize
//! protocol and converts decoded NV12 surfaces into tightly packed planar
//! 4:2:0 frames.
//!
//! # Modules
//!
//! - [`pool`]: frame pool: one arena, bounds-checked plane offsets, lock flags
//! - [`bitstream`]: cursor over caller-owned compressed bytes
//! - [`runtime`]: the [`CodecRuntime`] trait plus the `vdrt` library and
//!   simulated backends
//! - [`engine`]: lazy negotiation and the two-phase decode loop
//! - [`transform`]: semi-planar to planar conversion with crop
//! - [`output`]: single-slot output buffer with a capacity policy
//! - [`api`]: the [`FrameDecoder`] trait and [`create`]
//! - [`capi`] `extern "C"` exports for the `cdylib`

pub mod api;
pub mod bitstream;
pub mod capi;
pub mod engine;
pub mod output;
pub mod pool;
pub mod runtime;
pub mod transform;

pub use api::{create, Frame, FrameDecoder};
pub use bitstream::BitstreamView;
pub use engine::{DecodeEngine, EngineState, EngineStats, Session};
pub use output::OutputBuffer;
pub use pool::{FrameBuffer, FramePool, PlaneLayout, Surface, SurfaceMut};
pub use runtime::{
    CodecRuntime, DynamicRuntime, FaultPlan, RuntimeError, SimulatedRuntime, Submission, SyncPoint,
};
