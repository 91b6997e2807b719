//! `vd-common`: Shared types, configuration, and errors for the vd decode pipeline.
//!
//! This crate is the vocabulary the decoder crate (and any embedding
//! application) speaks:
//!
//! - **Codec**: `VideoCodec`
//! - **Types**: `FrameInfo`, `CropRect`, `StreamParameters`, `SurfaceRequest`,
//!   `OutputDescriptor` (stream geometry and the produced-frame header)
//! - **Policies**: `PlanarLayout`, `CapacityPolicy`
//! - **Config**: `DecoderConfig`, `RuntimeBackend`
//! - **Errors**: `DecodeError`, `PoolError`, `ConfigError` (thiserror-based)

pub mod codec;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::VideoCodec;
pub use config::{DecoderConfig, Implementation, RuntimeBackend};
pub use error::{status, ConfigError, DecodeError, DecodeResult, InitStage, PoolError};
pub use types::{
    align_up, CapacityPolicy, ChromaFormat, CropRect, FourCc, FrameInfo, IoPattern,
    OutputDescriptor, PlanarLayout, StreamParameters, SurfaceRequest,
};
