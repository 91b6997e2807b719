//! In-process simulated codec device.
//!
//! Decodes a trivial framed elementary stream so the whole engine can run
//! without hardware. Each unit is
//!
//! ```text
//! 00 00 01 | type (u8) | payload length (u32 BE) | payload
//! ```
//!
//! A sequence header carries the coded size, crop rectangle, fourcc and
//! chroma format. A picture carries three bytes `(luma, u, v)`; the decoded
//! surface gets `Y[r][c] = luma + r + c` (wrapping) and every chroma pair set
//! to `(u, v)`, which makes plane order and crop offsets checkable.
//!
//! Faults are scripted through [`FaultPlan`]. Counters are published through
//! a shared [`SimStats`] handle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use parking_lot::Mutex;
use tracing::{debug, trace};

use vd_common::{
    align_up, ChromaFormat, CropRect, FourCc, FrameInfo, Implementation, InitStage, IoPattern,
    StreamParameters, SurfaceRequest, VideoCodec,
};

use super::ffi::status;
use super::{CodecRuntime, RuntimeError, Submission, SyncPoint};
use crate::bitstream::BitstreamView;
use crate::pool::{FramePool, SurfaceMut};

const START_CODE: [u8; 3] = [0, 0, 1];
const UNIT_HEADER_LEN: usize = 8;
const SEQUENCE_PAYLOAD_LEN: usize = 17;
const PICTURE_PAYLOAD_LEN: usize = 3;

/// Coded size granularity of the simulated device.
const MACROBLOCK: u32 = 16;

/// Unit type byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitType {
    SequenceHeader = 0x01,
    Picture = 0x02,
}

/// Sequence header contents, as written by [`SimStream`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SequenceHeader {
    pub width: u16,
    pub height: u16,
    pub crop: CropRect,
    pub fourcc: FourCc,
    pub chroma_format: ChromaFormat,
}

impl SequenceHeader {
    /// 4:2:0 NV12 stream whose crop covers the whole picture.
    pub fn nv12(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            crop: CropRect::new(0, 0, width.into(), height.into()),
            fourcc: FourCc::Nv12,
            chroma_format: ChromaFormat::Yuv420,
        }
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_fourcc(mut self, fourcc: FourCc) -> Self {
        self.fourcc = fourcc;
        self
    }
}

/// Builder for simulated elementary streams.
#[derive(Clone, Debug, Default)]
pub struct SimStream {
    bytes: Vec<u8>,
}

impl SimStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(self, header: SequenceHeader) -> Self {
        let mut payload = [0u8; SEQUENCE_PAYLOAD_LEN];
        BigEndian::write_u16(&mut payload[0..2], header.width);
        BigEndian::write_u16(&mut payload[2..4], header.height);
        BigEndian::write_u16(&mut payload[4..6], header.crop.x as u16);
        BigEndian::write_u16(&mut payload[6..8], header.crop.y as u16);
        BigEndian::write_u16(&mut payload[8..10], header.crop.width as u16);
        BigEndian::write_u16(&mut payload[10..12], header.crop.height as u16);
        BigEndian::write_u32(&mut payload[12..16], header.fourcc.code());
        payload[16] = header.chroma_format.as_raw() as u8;
        self.unit(UnitType::SequenceHeader as u8, &payload)
    }

    pub fn picture(self, luma: u8, u: u8, v: u8) -> Self {
        self.unit(UnitType::Picture as u8, &[luma, u, v])
    }

    /// Append an arbitrary unit. Unknown types are skipped by the decoder.
    pub fn unit(mut self, kind: u8, payload: &[u8]) -> Self {
        let mut header = [0u8; UNIT_HEADER_LEN];
        header[..3].copy_from_slice(&START_CODE);
        header[3] = kind;
        BigEndian::write_u32(&mut header[4..], payload.len() as u32);
        self.bytes.extend_from_slice(&header);
        self.bytes.extend_from_slice(payload);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Luma value the simulator writes at `(row, col)` for a picture with `luma`.
pub fn rendered_luma(luma: u8, row: usize, col: usize) -> u8 {
    luma.wrapping_add((row + col) as u8)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Picture {
    luma: u8,
    u: u8,
    v: u8,
}

#[derive(Copy, Clone, Debug)]
struct RawSequence {
    width: u16,
    height: u16,
    crop: CropRect,
    fourcc: u32,
    chroma_format: u8,
}

enum Unit {
    Sequence(RawSequence),
    Picture(Picture),
    Other,
}

fn malformed(operation: &'static str) -> RuntimeError {
    RuntimeError::Status {
        operation,
        status: status::ERR_UNKNOWN,
    }
}

/// Parse the unit at the start of `data`. `Ok(None)` means the unit is
/// incomplete (or `data` is empty) and more input is needed.
fn next_unit(data: &[u8], operation: &'static str) -> Result<Option<(Unit, usize)>, RuntimeError> {
    if data.len() < UNIT_HEADER_LEN {
        return Ok(None);
    }
    if data[..3] != START_CODE {
        return Err(malformed(operation));
    }
    let kind = data[3];
    let len = BigEndian::read_u32(&data[4..UNIT_HEADER_LEN]) as usize;
    let end = UNIT_HEADER_LEN
        .checked_add(len)
        .ok_or_else(|| malformed(operation))?;
    if data.len() < end {
        return Ok(None);
    }

    let mut payload = &data[UNIT_HEADER_LEN..end];
    let unit = if kind == UnitType::SequenceHeader as u8 {
        if payload.len() < SEQUENCE_PAYLOAD_LEN {
            return Err(malformed(operation));
        }
        let mut read = || payload.read_u16::<BigEndian>().map_err(|_| malformed(operation));
        let width = read()?;
        let height = read()?;
        let crop = CropRect::new(read()?.into(), read()?.into(), read()?.into(), read()?.into());
        let fourcc = payload
            .read_u32::<BigEndian>()
            .map_err(|_| malformed(operation))?;
        let chroma_format = payload.read_u8().map_err(|_| malformed(operation))?;
        Unit::Sequence(RawSequence {
            width,
            height,
            crop,
            fourcc,
            chroma_format,
        })
    } else if kind == UnitType::Picture as u8 {
        if payload.len() < PICTURE_PAYLOAD_LEN {
            return Err(malformed(operation));
        }
        Unit::Picture(Picture {
            luma: payload[0],
            u: payload[1],
            v: payload[2],
        })
    } else {
        Unit::Other
    };
    Ok(Some((unit, end)))
}

/// Fail an initialization step a number of times before letting it pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InitFault {
    pub stage: InitStage,
    pub times: u32,
}

/// Scripted misbehaviour for the simulated device.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    /// Report `DeviceBusy` on this many submissions before accepting work.
    pub busy_reports: u32,
    /// Synchronize never completes: it waits out the timeout and fails.
    pub hang_sync: bool,
    /// Pictures held back before output. Zero emits each picture on the
    /// submission that carries it.
    pub reorder_depth: usize,
    pub init_fault: Option<InitFault>,
    /// Codecs `declare_codec` rejects as unsupported.
    pub unsupported_codecs: Vec<VideoCodec>,
}

/// Counters published by the simulated device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub init_failures: u64,
    pub submits: u64,
    pub busy_reported: u64,
    pub pictures_scheduled: u64,
    pub frames_rendered: u64,
    pub syncs: u64,
    pub sync_timeouts: u64,
}

#[derive(Copy, Clone, Debug)]
struct Pending {
    surface: usize,
    picture: Picture,
}

/// Simulated [`CodecRuntime`].
#[derive(Debug)]
pub struct SimulatedRuntime {
    plan: FaultPlan,
    stats: Arc<Mutex<SimStats>>,
    session_open: bool,
    codec: Option<VideoCodec>,
    io_pattern: IoPattern,
    params: Option<StreamParameters>,
    busy_remaining: u32,
    init_faults_remaining: u32,
    /// Decoded pictures not yet handed out, oldest first.
    reorder: VecDeque<Pending>,
    in_flight: HashMap<SyncPoint, Pending>,
    /// Output surface the caller still reads; released on the next submit.
    release: Option<usize>,
    next_sync: u64,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new(FaultPlan::default())
    }
}

impl SimulatedRuntime {
    pub fn new(plan: FaultPlan) -> Self {
        let busy_remaining = plan.busy_reports;
        let init_faults_remaining = plan.init_fault.map_or(0, |f| f.times);
        Self {
            plan,
            stats: Arc::new(Mutex::new(SimStats::default())),
            session_open: false,
            codec: None,
            io_pattern: IoPattern::default(),
            params: None,
            busy_remaining,
            init_faults_remaining,
            reorder: VecDeque::new(),
            in_flight: HashMap::new(),
            release: None,
            next_sync: 1,
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SimStats {
        self.stats.lock().clone()
    }

    /// Shared handle that stays valid after the runtime moves into an engine.
    pub fn stats_handle(&self) -> Arc<Mutex<SimStats>> {
        Arc::clone(&self.stats)
    }

    /// Pictures decoded but not yet scheduled for output.
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    pub fn is_open(&self) -> bool {
        self.session_open
    }

    fn inject(&mut self, stage: InitStage) -> Result<(), RuntimeError> {
        match self.plan.init_fault {
            Some(fault) if fault.stage == stage && self.init_faults_remaining > 0 => {
                self.init_faults_remaining -= 1;
                self.stats.lock().init_failures += 1;
                debug!(stage = %stage, "Simulated initialization fault");
                Err(RuntimeError::Status {
                    operation: stage.as_str(),
                    status: status::ERR_DEVICE_FAILED,
                })
            }
            _ => Ok(()),
        }
    }

    fn require_session(&self) -> Result<(), RuntimeError> {
        if self.session_open {
            Ok(())
        } else {
            Err(RuntimeError::NotInitialized)
        }
    }

    fn schedule_oldest(&mut self) -> Submission {
        let Some(pending) = self.reorder.pop_front() else {
            return Submission::MoreData;
        };
        let sync = SyncPoint(self.next_sync);
        self.next_sync += 1;
        self.in_flight.insert(sync, pending);
        self.stats.lock().pictures_scheduled += 1;
        trace!(surface = pending.surface, sync = sync.0, "Simulated decode scheduled");
        Submission::Scheduled {
            sync,
            output: pending.surface,
        }
    }
}

fn render(surface: SurfaceMut<'_>, picture: Picture) {
    for (row, line) in surface.luma.chunks_exact_mut(surface.pitch).enumerate() {
        for (col, px) in line.iter_mut().enumerate() {
            *px = rendered_luma(picture.luma, row, col);
        }
    }
    for pair in surface.chroma.chunks_exact_mut(2) {
        pair[0] = picture.u;
        pair[1] = picture.v;
    }
}

impl CodecRuntime for SimulatedRuntime {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open_session(&mut self, implementation: Implementation) -> Result<(), RuntimeError> {
        self.inject(InitStage::OpenSession)?;
        if !self.session_open {
            self.session_open = true;
            self.stats.lock().sessions_opened += 1;
            debug!(implementation = ?implementation, "Simulated session opened");
        }
        Ok(())
    }

    fn declare_codec(&mut self, codec: VideoCodec, io_pattern: IoPattern) -> Result<(), RuntimeError> {
        self.require_session()?;
        if self.plan.unsupported_codecs.contains(&codec) {
            return Err(RuntimeError::Unsupported {
                operation: "declare codec",
            });
        }
        self.inject(InitStage::DeclareCodec)?;
        self.codec = Some(codec);
        self.io_pattern = io_pattern;
        Ok(())
    }

    fn decode_header(&mut self, bitstream: &BitstreamView<'_>) -> Result<StreamParameters, RuntimeError> {
        self.require_session()?;
        let codec = self.codec.ok_or(RuntimeError::NotInitialized)?;
        self.inject(InitStage::DecodeHeader)?;

        let mut data = bitstream.remaining();
        let raw = loop {
            match next_unit(data, "decode header")? {
                Some((Unit::Sequence(raw), _)) => break raw,
                Some((_, used)) => data = &data[used..],
                None => return Err(RuntimeError::HeaderNotFound),
            }
        };

        let unsupported = RuntimeError::Unsupported {
            operation: "decode header",
        };
        let fourcc = FourCc::from_code(raw.fourcc).ok_or(unsupported.clone())?;
        let chroma_format = ChromaFormat::from_raw(raw.chroma_format.into()).ok_or(unsupported)?;
        let width = u32::from(raw.width);
        let height = u32::from(raw.height);

        Ok(StreamParameters {
            codec,
            io_pattern: self.io_pattern,
            frame_info: FrameInfo {
                fourcc,
                chroma_format,
                width: align_up(width, MACROBLOCK),
                height: align_up(height, MACROBLOCK),
                crop: raw.crop,
            },
        })
    }

    fn validate(&mut self, params: &StreamParameters) -> Result<StreamParameters, RuntimeError> {
        self.require_session()?;
        self.inject(InitStage::ValidateParameters)?;
        let info = &params.frame_info;
        if info.fourcc == FourCc::Nv12 && info.chroma_format != ChromaFormat::Yuv420 {
            return Err(RuntimeError::Unsupported {
                operation: "query parameters",
            });
        }
        Ok(*params)
    }

    fn query_surfaces(&mut self, params: &StreamParameters) -> Result<SurfaceRequest, RuntimeError> {
        self.require_session()?;
        self.inject(InitStage::QuerySurfaces)?;
        // Held pictures, the one being decoded, and the one the caller reads.
        let depth = u16::try_from(self.plan.reorder_depth).unwrap_or(u16::MAX);
        Ok(SurfaceRequest {
            min: depth.saturating_add(1),
            suggested: depth.saturating_add(2),
            info: params.frame_info,
        })
    }

    fn init_decoder(&mut self, params: &StreamParameters, pool: &mut FramePool) -> Result<(), RuntimeError> {
        self.require_session()?;
        self.inject(InitStage::InitDecoder)?;
        let min = self.plan.reorder_depth.saturating_add(1);
        if pool.capacity() < min {
            return Err(RuntimeError::Status {
                operation: "init decoder",
                status: status::ERR_NOT_ENOUGH_BUFFER,
            });
        }
        self.params = Some(*params);
        debug!(surfaces = pool.capacity(), min, "Simulated decoder initialized");
        Ok(())
    }

    fn submit(
        &mut self,
        bitstream: Option<&mut BitstreamView<'_>>,
        work_surface: usize,
        pool: &mut FramePool,
    ) -> Result<Submission, RuntimeError> {
        if self.params.is_none() {
            return Err(RuntimeError::NotInitialized);
        }
        self.stats.lock().submits += 1;

        if let Some(index) = self.release.take() {
            pool.unlock(index)?;
        }

        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            self.stats.lock().busy_reported += 1;
            return Ok(Submission::DeviceBusy);
        }

        let Some(view) = bitstream else {
            return Ok(self.schedule_oldest());
        };

        loop {
            let Some((unit, used)) = next_unit(view.remaining(), "decode frame")? else {
                return Ok(Submission::MoreData);
            };
            view.advance(used);

            let Unit::Picture(picture) = unit else {
                continue;
            };
            if pool.is_locked(work_surface)? {
                return Err(RuntimeError::SurfaceLocked(work_surface));
            }
            pool.lock(work_surface)?;
            self.reorder.push_back(Pending {
                surface: work_surface,
                picture,
            });

            if self.reorder.len() > self.plan.reorder_depth {
                return Ok(self.schedule_oldest());
            }
            return Ok(if view.is_exhausted() {
                Submission::MoreData
            } else {
                Submission::MoreSurface
            });
        }
    }

    fn synchronize(
        &mut self,
        sync: SyncPoint,
        pool: &mut FramePool,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.stats.lock().syncs += 1;
        if self.plan.hang_sync {
            std::thread::sleep(timeout);
            self.stats.lock().sync_timeouts += 1;
            return Err(RuntimeError::WaitTimeout(timeout));
        }

        let pending = self
            .in_flight
            .remove(&sync)
            .ok_or(RuntimeError::UnknownSyncPoint(sync))?;
        render(pool.surface_mut(pending.surface)?, pending.picture);
        self.release = Some(pending.surface);
        self.stats.lock().frames_rendered += 1;
        Ok(())
    }

    fn close(&mut self) {
        if !self.session_open {
            return;
        }
        self.session_open = false;
        self.codec = None;
        self.params = None;
        self.reorder.clear();
        self.in_flight.clear();
        self.release = None;
        self.stats.lock().sessions_closed += 1;
        debug!("Simulated session closed");
    }
}
