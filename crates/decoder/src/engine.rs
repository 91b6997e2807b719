//! Decode engine: lazy negotiation plus the two-phase submit/sync loop.
//!
//! The engine starts `Uninitialized`. The first `decode_frame` call
//! negotiates with the codec runtime using that call's bytes (open session,
//! declare codec, peek the header, query and allocate surfaces, init). Every
//! decode call then runs:
//!
//! - **Phase A**: submit the caller's bytes with a free work surface. Busy
//!   reports are retried after a short sleep; "need another surface" picks a
//!   new work surface; a scheduled decode is synchronized (bounded wait),
//!   converted to planar and returned. "Need more data" ends the phase.
//! - **Phase B**: submit with no bitstream to drain pictures the runtime
//!   still holds. If nothing comes out the stream is exhausted.
//!
//! At most one frame is produced per call. `bytes_consumed` reports how far
//! the runtime got into the caller's buffer so the remainder can be fed
//! again.

use std::thread;

use tracing::{debug, info, trace, warn};

use vd_common::{
    DecodeError, DecodeResult, DecoderConfig, FrameInfo, InitStage, OutputDescriptor,
    StreamParameters, SurfaceRequest,
};

use crate::api::Frame;
use crate::bitstream::BitstreamView;
use crate::output::OutputBuffer;
use crate::pool::FramePool;
use crate::runtime::{CodecRuntime, RuntimeError, Submission};
use crate::transform;

/// Negotiated decoder state owned by an initialized engine.
#[derive(Debug)]
pub struct Session {
    params: StreamParameters,
    request: SurfaceRequest,
    pool: FramePool,
}

impl Session {
    pub fn params(&self) -> &StreamParameters {
        &self.params
    }

    pub fn request(&self) -> &SurfaceRequest {
        &self.request
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }
}

/// Engine lifecycle.
#[derive(Debug)]
pub enum EngineState {
    Uninitialized,
    Initialized(Session),
    /// A non-retryable initialization failure. Every later call fails.
    Poisoned(String),
}

/// Counters for the engine's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub init_attempts: u64,
    /// Frames produced, including drained ones.
    pub frames_decoded: u64,
    /// Frames produced by the end-of-stream drain.
    pub frames_drained: u64,
    pub busy_retries: u64,
    pub timeouts: u64,
}

struct InitFailure {
    stage: InitStage,
    reason: String,
    fatal: bool,
}

impl InitFailure {
    fn runtime(stage: InitStage) -> impl FnOnce(RuntimeError) -> Self {
        move |err| Self {
            stage,
            fatal: err.is_fatal(),
            reason: err.to_string(),
        }
    }
}

fn runtime_error(operation: &'static str) -> impl FnOnce(RuntimeError) -> DecodeError {
    move |err| match err {
        RuntimeError::Pool(pool) => DecodeError::Pool(pool),
        other => DecodeError::Runtime {
            operation,
            reason: other.to_string(),
        },
    }
}

/// Result of one phase.
enum Outcome {
    /// Pool index of the surface holding a finished picture.
    Frame(usize),
    NeedData,
}

/// Single-stream decode engine over a codec runtime.
pub struct DecodeEngine<R: CodecRuntime> {
    runtime: R,
    config: DecoderConfig,
    state: EngineState,
    output: OutputBuffer,
    descriptor: OutputDescriptor,
    stats: EngineStats,
    bytes_consumed: usize,
}

impl<R: CodecRuntime> DecodeEngine<R> {
    /// Build an uninitialized engine. Fails if `config` does not validate.
    pub fn new(runtime: R, config: DecoderConfig) -> DecodeResult<Self> {
        config.validate()?;
        let output = OutputBuffer::new(config.output_capacity);
        Ok(Self {
            runtime,
            config,
            state: EngineState::Uninitialized,
            output,
            descriptor: OutputDescriptor::default(),
            stats: EngineStats::default(),
            bytes_consumed: 0,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, EngineState::Initialized(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            EngineState::Initialized(session) => Some(session),
            _ => None,
        }
    }

    pub fn pool(&self) -> Option<&FramePool> {
        self.session().map(Session::pool)
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Header of the latest frame; empty before the first success.
    pub fn descriptor(&self) -> OutputDescriptor {
        self.descriptor
    }

    /// The latest planar frame. Stays valid until the next decode call.
    pub fn frame(&self) -> Option<Frame<'_>> {
        if self.descriptor.is_empty() {
            return None;
        }
        Some(Frame {
            descriptor: self.descriptor,
            data: self.output.as_slice(),
        })
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Bytes of the last call's input the runtime consumed.
    pub fn bytes_consumed(&self) -> usize {
        self.bytes_consumed
    }

    /// Negotiate with the runtime using `header_chunk`. A no-op once
    /// initialized. Failures roll back the session so a later call starts
    /// from scratch, unless the runtime says the stream is unsupported.
    pub fn initialize(&mut self, header_chunk: &[u8]) -> DecodeResult<()> {
        match &self.state {
            EngineState::Initialized(_) => return Ok(()),
            EngineState::Poisoned(reason) => return Err(DecodeError::Poisoned(reason.clone())),
            EngineState::Uninitialized => {}
        }

        self.stats.init_attempts += 1;
        match self.negotiate(header_chunk) {
            Ok(session) => {
                info!(
                    runtime = self.runtime.name(),
                    codec = session.params.codec.display_name(),
                    width = session.params.frame_info.width,
                    height = session.params.frame_info.height,
                    surfaces = session.pool.capacity(),
                    "Decode engine initialized"
                );
                self.state = EngineState::Initialized(session);
                Ok(())
            }
            Err(failure) => {
                self.runtime.close();
                warn!(
                    stage = %failure.stage,
                    reason = %failure.reason,
                    fatal = failure.fatal,
                    "Decoder initialization failed"
                );
                if failure.fatal {
                    self.state = EngineState::Poisoned(format!(
                        "{}: {}",
                        failure.stage, failure.reason
                    ));
                }
                Err(DecodeError::Initialization {
                    stage: failure.stage,
                    reason: failure.reason,
                })
            }
        }
    }

    fn negotiate(&mut self, header_chunk: &[u8]) -> Result<Session, InitFailure> {
        let config = &self.config;
        let runtime = &mut self.runtime;

        runtime
            .open_session(config.implementation)
            .map_err(InitFailure::runtime(InitStage::OpenSession))?;
        runtime
            .declare_codec(config.codec, config.io_pattern)
            .map_err(InitFailure::runtime(InitStage::DeclareCodec))?;

        let header = BitstreamView::new(header_chunk);
        let params = runtime
            .decode_header(&header)
            .map_err(InitFailure::runtime(InitStage::DecodeHeader))?;
        let params = runtime
            .validate(&params)
            .map_err(InitFailure::runtime(InitStage::ValidateParameters))?;
        let request = runtime
            .query_surfaces(&params)
            .map_err(InitFailure::runtime(InitStage::QuerySurfaces))?;
        debug!(
            min = request.min,
            suggested = request.suggested,
            extra = config.extra_surfaces,
            "Surface request"
        );

        let count = usize::from(request.suggested.max(request.min))
            + usize::from(config.extra_surfaces);
        // The request sizes the surfaces; crop and format stay those of the
        // negotiated stream.
        let stream = params.frame_info;
        let surface = FrameInfo {
            width: request.info.width.max(stream.width),
            height: request.info.height.max(stream.height),
            ..request.info
        };
        let mut pool = FramePool::allocate(&surface, count, config.surface_alignment)
            .map(|pool| pool.with_stream_info(stream))
            .map_err(|err| InitFailure {
                stage: InitStage::AllocatePool,
                reason: err.to_string(),
                fatal: false,
            })?;

        runtime
            .init_decoder(&params, &mut pool)
            .map_err(InitFailure::runtime(InitStage::InitDecoder))?;

        Ok(Session {
            params,
            request,
            pool,
        })
    }

    /// Decode until one frame is available or the stream is exhausted.
    ///
    /// On success [`frame`](Self::frame) holds the new picture. On failure
    /// the previous frame is left untouched.
    pub fn decode_frame(&mut self, chunk: &[u8]) -> DecodeResult<()> {
        self.initialize(chunk)?;

        let mut bitstream = BitstreamView::new(chunk);
        let result = self.run_phases(&mut bitstream);
        self.bytes_consumed = bitstream.offset();
        result
    }

    fn run_phases(&mut self, bitstream: &mut BitstreamView<'_>) -> DecodeResult<()> {
        let Self {
            runtime,
            config,
            state,
            output,
            descriptor,
            stats,
            ..
        } = self;
        let EngineState::Initialized(session) = state else {
            return Err(DecodeError::Initialization {
                stage: InitStage::OpenSession,
                reason: "engine not initialized".to_string(),
            });
        };

        let mut cycle = Cycle {
            runtime,
            pool: &mut session.pool,
            config: &*config,
            stats: &mut *stats,
        };

        let (surface, drained) = match cycle.run(Some(&mut *bitstream))? {
            Outcome::Frame(surface) => (surface, false),
            Outcome::NeedData => {
                debug!(consumed = bitstream.offset(), "Input exhausted, draining decoder");
                match cycle.run(None)? {
                    Outcome::Frame(surface) => (surface, true),
                    Outcome::NeedData => {
                        debug!("Decoder drained, end of stream");
                        return Err(DecodeError::StreamExhausted);
                    }
                }
            }
        };

        let view = session.pool.surface(surface)?;
        let produced = transform::to_planar(&view, config.output_layout, output)?;
        *descriptor = produced;
        stats.frames_decoded += 1;
        if drained {
            stats.frames_drained += 1;
        }
        debug!(
            surface,
            drained,
            width = produced.width,
            height = produced.height,
            bytes = produced.byte_size,
            "Frame produced"
        );
        Ok(())
    }
}

/// Borrowed state for one submit/synchronize phase.
struct Cycle<'e, R> {
    runtime: &'e mut R,
    pool: &'e mut FramePool,
    config: &'e DecoderConfig,
    stats: &'e mut EngineStats,
}

impl<R: CodecRuntime> Cycle<'_, R> {
    fn free_surface(&self) -> DecodeResult<usize> {
        self.pool.first_free().ok_or(DecodeError::ResourceExhausted {
            capacity: self.pool.capacity(),
        })
    }

    /// Submit until a picture is ready (`Frame`) or the runtime wants more
    /// input (`NeedData`). `None` drains.
    fn run(&mut self, mut bitstream: Option<&mut BitstreamView<'_>>) -> DecodeResult<Outcome> {
        let mut work = self.free_surface()?;
        let mut busy: u32 = 0;

        loop {
            let submission = self
                .runtime
                .submit(bitstream.as_deref_mut(), work, self.pool)
                .map_err(runtime_error("submit"))?;

            match submission {
                Submission::DeviceBusy => {
                    if let Some(max) = self.config.max_busy_retries {
                        if busy >= max {
                            warn!(retries = busy, "Device busy, giving up");
                            return Err(DecodeError::DeviceBusy { retries: busy });
                        }
                    }
                    busy += 1;
                    self.stats.busy_retries += 1;
                    trace!(retry = busy, surface = work, "Device busy, resubmitting");
                    thread::sleep(self.config.busy_wait());
                }
                Submission::MoreSurface => {
                    work = self.free_surface()?;
                }
                Submission::MoreData => return Ok(Outcome::NeedData),
                Submission::Scheduled { sync, output } => {
                    let timeout = self.config.sync_timeout();
                    return match self.runtime.synchronize(sync, self.pool, timeout) {
                        Ok(()) => Ok(Outcome::Frame(output)),
                        Err(RuntimeError::WaitTimeout(_)) => {
                            self.stats.timeouts += 1;
                            warn!(
                                surface = output,
                                timeout_ms = timeout.as_millis() as u64,
                                "Synchronize timed out, surface treated as leaked"
                            );
                            Err(DecodeError::Timeout(timeout))
                        }
                        Err(err) => Err(runtime_error("synchronize")(err)),
                    };
                }
            }
        }
    }
}

impl<R: CodecRuntime> Drop for DecodeEngine<R> {
    fn drop(&mut self) {
        self.runtime.close();
        let peak_locked = self.pool().map_or(0, FramePool::peak_locked);
        info!(
            frames = self.stats.frames_decoded,
            drained = self.stats.frames_drained,
            busy_retries = self.stats.busy_retries,
            timeouts = self.stats.timeouts,
            peak_locked,
            "Decode engine destroyed"
        );
    }
}

impl<R: CodecRuntime> std::fmt::Debug for DecodeEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeEngine")
            .field("runtime", &self.runtime.name())
            .field("state", &self.state)
            .field("descriptor", &self.descriptor)
            .field("stats", &self.stats)
            .finish()
    }
}
