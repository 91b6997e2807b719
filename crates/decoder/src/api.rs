//! Backend-neutral decoder interface.
//!
//! [`create`] builds a [`DecodeEngine`] over the runtime selected in the
//! config and returns it behind the [`FrameDecoder`] trait. Dropping the
//! box destroys the engine and releases the pool and output memory.

use tracing::info;

use vd_common::{DecodeResult, DecoderConfig, OutputDescriptor, RuntimeBackend};

use crate::engine::{DecodeEngine, EngineStats};
use crate::runtime::{CodecRuntime, DynamicRuntime, FaultPlan, SimulatedRuntime};

/// The latest planar frame, borrowed from the decoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub descriptor: OutputDescriptor,
    /// Y plane, then both chroma planes, tightly packed.
    pub data: &'a [u8],
}

/// A single-stream decoder producing one planar frame per call.
pub trait FrameDecoder: Send {
    /// Feed compressed bytes. `Ok` means [`frame`](Self::frame) holds a new
    /// picture; [`DecodeError::StreamExhausted`](vd_common::DecodeError::StreamExhausted)
    /// is the normal end-of-stream signal.
    fn decode_frame(&mut self, chunk: &[u8]) -> DecodeResult<()>;

    /// Latest frame, or `None` before the first successful decode.
    fn frame(&self) -> Option<Frame<'_>>;

    fn descriptor(&self) -> OutputDescriptor;

    /// Input bytes the last call consumed.
    fn bytes_consumed(&self) -> usize;

    fn stats(&self) -> EngineStats;
}

impl<R: CodecRuntime + Send> FrameDecoder for DecodeEngine<R> {
    fn decode_frame(&mut self, chunk: &[u8]) -> DecodeResult<()> {
        DecodeEngine::decode_frame(self, chunk)
    }

    fn frame(&self) -> Option<Frame<'_>> {
        DecodeEngine::frame(self)
    }

    fn descriptor(&self) -> OutputDescriptor {
        DecodeEngine::descriptor(self)
    }

    fn bytes_consumed(&self) -> usize {
        DecodeEngine::bytes_consumed(self)
    }

    fn stats(&self) -> EngineStats {
        DecodeEngine::stats(self)
    }
}

/// Build an uninitialized decoder for `config`.
///
/// Nothing touches the codec runtime yet; the first `decode_frame` call
/// negotiates the session.
pub fn create(config: &DecoderConfig) -> DecodeResult<Box<dyn FrameDecoder>> {
    info!(
        codec = config.codec.display_name(),
        backend = ?config.runtime,
        "Creating decoder"
    );
    let decoder: Box<dyn FrameDecoder> = match &config.runtime {
        RuntimeBackend::Library { path } => Box::new(DecodeEngine::new(
            DynamicRuntime::new(path.clone()),
            config.clone(),
        )?),
        RuntimeBackend::Simulated => Box::new(DecodeEngine::new(
            SimulatedRuntime::new(FaultPlan::default()),
            config.clone(),
        )?),
    };
    Ok(decoder)
}
