//! [`CodecRuntime`] backed by the dynamically loaded `vdrt` library.
//!
//! The library decodes straight into the engine's frame pool: the surface
//! table handed across the ABI points into the pool arena, and the lock
//! counters the library writes are mirrored back into the pool after every
//! call so the engine's free-surface scan sees the runtime's view.

use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use vd_common::{
    Implementation, IoPattern, PoolError, StreamParameters, SurfaceRequest, VideoCodec,
};

use super::ffi::{
    is_error, status, RuntimeLibrary, VdrtBitstream, VdrtFrameAllocRequest, VdrtFrameInfo,
    VdrtSession, VdrtStatus, VdrtSurface, VdrtSyncPoint, VdrtVideoParam,
};
use super::{CodecRuntime, RuntimeError, Submission, SyncPoint};
use crate::bitstream::BitstreamView;
use crate::pool::FramePool;

/// Codec runtime session driven through the `vdrt` C ABI.
pub struct DynamicRuntime {
    /// `None` = platform default library name.
    path: Option<PathBuf>,
    lib: Option<Arc<RuntimeLibrary>>,
    session: VdrtSession,
    codec: VideoCodec,
    io_pattern: IoPattern,
    params: Option<VdrtVideoParam>,
    /// One entry per pool surface, pointing into the pool arena.
    surfaces: Vec<VdrtSurface>,
}

// SAFETY: the session handle and surface pointers are only used from the
// thread that currently owns the runtime; the runtime is never shared.
unsafe impl Send for DynamicRuntime {}

impl std::fmt::Debug for DynamicRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicRuntime")
            .field("path", &self.path)
            .field("loaded", &self.lib.is_some())
            .field("session_open", &!self.session.is_null())
            .field("codec", &self.codec)
            .field("surfaces", &self.surfaces.len())
            .finish()
    }
}

fn io_pattern_raw(pattern: IoPattern) -> u16 {
    match pattern {
        IoPattern::SystemMemory => 1,
        IoPattern::VideoMemory => 2,
    }
}

/// Map an error status. Warnings have already been filtered out.
fn status_error(operation: &'static str, result: VdrtStatus) -> RuntimeError {
    match result {
        status::ERR_UNSUPPORTED => RuntimeError::Unsupported { operation },
        status::ERR_NOT_FOUND => RuntimeError::HeaderNotFound,
        _ => RuntimeError::Status {
            operation,
            status: result,
        },
    }
}

/// The ABI counts bitstream bytes in `u32`.
fn abi_len(bytes: usize) -> Result<u32, RuntimeError> {
    u32::try_from(bytes).map_err(|_| RuntimeError::InputTooLarge(bytes))
}

fn abi_window(view: &BitstreamView<'_>) -> Result<VdrtBitstream, RuntimeError> {
    Ok(VdrtBitstream {
        data: view.data().as_ptr(),
        data_offset: abi_len(view.offset())?,
        data_length: abi_len(view.remaining_len())?,
        max_length: abi_len(view.len())?,
    })
}

fn check(operation: &'static str, result: VdrtStatus) -> Result<(), RuntimeError> {
    if is_error(result) {
        return Err(status_error(operation, result));
    }
    if result == status::WRN_PARTIAL_ACCELERATION {
        debug!(operation, "Runtime reported partial acceleration");
    } else if result != status::NONE {
        debug!(operation, status = result, "Runtime warning ignored");
    }
    Ok(())
}

impl DynamicRuntime {
    /// Runtime that loads the library lazily on `open_session`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lib: None,
            session: ptr::null_mut(),
            codec: VideoCodec::default(),
            io_pattern: IoPattern::default(),
            params: None,
            surfaces: Vec::new(),
        }
    }

    /// Runtime over an already loaded library.
    pub fn with_library(lib: Arc<RuntimeLibrary>) -> Self {
        let mut runtime = Self::new(None);
        runtime.lib = Some(lib);
        runtime
    }

    fn library(&self) -> Result<&RuntimeLibrary, RuntimeError> {
        self.lib.as_deref().ok_or(RuntimeError::NotInitialized)
    }

    fn ensure_loaded(&mut self) -> Result<(), RuntimeError> {
        if self.lib.is_none() {
            let lib = match &self.path {
                Some(path) => RuntimeLibrary::load_from(path)?,
                None => RuntimeLibrary::load()?,
            };
            self.lib = Some(Arc::new(lib));
        }
        Ok(())
    }

    fn session(&self) -> Result<VdrtSession, RuntimeError> {
        if self.session.is_null() {
            Err(RuntimeError::NotInitialized)
        } else {
            Ok(self.session)
        }
    }

    fn base_param(&self, params: &StreamParameters) -> VdrtVideoParam {
        VdrtVideoParam {
            codec_id: params.codec.runtime_id(),
            io_pattern: io_pattern_raw(params.io_pattern),
            reserved: 0,
            frame_info: VdrtFrameInfo::from_common(&params.frame_info),
        }
    }

    /// Copy the library's lock counters into the pool.
    fn mirror_locks(&self, pool: &mut FramePool) -> Result<(), RuntimeError> {
        for (index, surface) in self.surfaces.iter().enumerate() {
            pool.set_locked(index, surface.locked != 0)?;
        }
        Ok(())
    }

    fn surface_index(&self, out: *mut VdrtSurface) -> Option<usize> {
        self.surfaces
            .iter()
            .position(|s| ptr::eq(s as *const VdrtSurface, out as *const VdrtSurface))
    }
}

impl CodecRuntime for DynamicRuntime {
    fn name(&self) -> &'static str {
        "vdrt"
    }

    fn open_session(&mut self, implementation: Implementation) -> Result<(), RuntimeError> {
        self.ensure_loaded()?;
        if !self.session.is_null() {
            return Ok(());
        }
        let lib = self.library()?;
        let mut session: VdrtSession = ptr::null_mut();
        // SAFETY: `session` is a valid out-pointer for the duration of the call.
        let result = unsafe { (lib.vdrt_open)(implementation.as_raw(), &mut session) };
        check("open session", result)?;
        if session.is_null() {
            return Err(RuntimeError::Status {
                operation: "open session",
                status: status::ERR_NULL_PTR,
            });
        }
        self.session = session;
        info!(implementation = ?implementation, "Codec runtime session opened");
        Ok(())
    }

    fn declare_codec(&mut self, codec: VideoCodec, io_pattern: IoPattern) -> Result<(), RuntimeError> {
        let session = self.session()?;
        let lib = self.library()?;
        // SAFETY: `session` was returned by vdrt_open and is still open.
        let result =
            unsafe { (lib.vdrt_declare)(session, codec.runtime_id(), io_pattern_raw(io_pattern)) };
        check("declare codec", result)?;
        self.codec = codec;
        self.io_pattern = io_pattern;
        Ok(())
    }

    fn decode_header(&mut self, bitstream: &BitstreamView<'_>) -> Result<StreamParameters, RuntimeError> {
        let session = self.session()?;
        let lib = self.library()?;

        // The header peek must not move the caller's cursor, so the library
        // works on a copy of the window.
        let mut bs = abi_window(bitstream)?;
        let mut par = VdrtVideoParam {
            codec_id: self.codec.runtime_id(),
            io_pattern: io_pattern_raw(self.io_pattern),
            ..VdrtVideoParam::default()
        };
        // SAFETY: `bs.data` is valid for `max_length` bytes for the whole call
        // and the library never writes through it.
        let result = unsafe { (lib.vdrt_decode_header)(session, &mut bs, &mut par) };
        if result == status::ERR_MORE_DATA {
            return Err(RuntimeError::HeaderNotFound);
        }
        check("decode header", result)?;

        let frame_info = par.frame_info.to_common().ok_or(RuntimeError::Unsupported {
            operation: "decode header",
        })?;
        Ok(StreamParameters {
            codec: self.codec,
            io_pattern: self.io_pattern,
            frame_info,
        })
    }

    fn validate(&mut self, params: &StreamParameters) -> Result<StreamParameters, RuntimeError> {
        let session = self.session()?;
        let lib = self.library()?;
        let input = self.base_param(params);
        let mut output = input;
        // SAFETY: both pointers reference live stack values.
        let result = unsafe { (lib.vdrt_query)(session, &input, &mut output) };
        check("query parameters", result)?;

        let frame_info = output.frame_info.to_common().ok_or(RuntimeError::Unsupported {
            operation: "query parameters",
        })?;
        if frame_info != params.frame_info {
            debug!(from = ?params.frame_info, to = ?frame_info, "Runtime corrected stream parameters");
        }
        Ok(StreamParameters {
            frame_info,
            ..*params
        })
    }

    fn query_surfaces(&mut self, params: &StreamParameters) -> Result<SurfaceRequest, RuntimeError> {
        let session = self.session()?;
        let lib = self.library()?;
        let par = self.base_param(params);
        let mut request = VdrtFrameAllocRequest::default();
        // SAFETY: both pointers reference live stack values.
        let result = unsafe { (lib.vdrt_query_io_surf)(session, &par, &mut request) };
        check("query surfaces", result)?;

        Ok(SurfaceRequest {
            min: request.num_min,
            suggested: request.num_suggested.max(request.num_min),
            info: request.info.to_common().unwrap_or(params.frame_info),
        })
    }

    fn init_decoder(&mut self, params: &StreamParameters, pool: &mut FramePool) -> Result<(), RuntimeError> {
        let session = self.session()?;
        let par = self.base_param(params);

        let base = pool.arena_ptr();
        let surfaces = pool
            .buffers()
            .iter()
            .map(|buffer| {
                let layout = buffer.layout();
                // SAFETY: offsets were validated against the arena length when
                // the pool was built, so both pointers stay inside it.
                let (y, uv) = unsafe {
                    (
                        base.add(layout.luma_offset),
                        base.add(layout.chroma_offset),
                    )
                };
                VdrtSurface {
                    y,
                    uv,
                    pitch: layout.pitch as u32,
                    locked: 0,
                    reserved: 0,
                    info: VdrtFrameInfo::from_common(buffer.info()),
                }
            })
            .collect();
        self.surfaces = surfaces;

        let lib = self.library()?;
        // SAFETY: `par` is a live stack value.
        let result = unsafe { (lib.vdrt_init)(session, &par) };
        check("init decoder", result)?;
        self.params = Some(par);
        info!(
            codec = self.codec.display_name(),
            surfaces = self.surfaces.len(),
            "Codec runtime decoder initialized"
        );
        Ok(())
    }

    fn submit(
        &mut self,
        bitstream: Option<&mut BitstreamView<'_>>,
        work_surface: usize,
        pool: &mut FramePool,
    ) -> Result<Submission, RuntimeError> {
        let session = self.session()?;
        if self.params.is_none() {
            return Err(RuntimeError::NotInitialized);
        }
        let lib = Arc::clone(self.lib.as_ref().ok_or(RuntimeError::NotInitialized)?);
        let capacity = self.surfaces.len();
        let work: *mut VdrtSurface = self.surfaces.get_mut(work_surface).ok_or(
            RuntimeError::Pool(PoolError::IndexOutOfRange {
                index: work_surface,
                capacity,
            }),
        )?;

        let mut out: *mut VdrtSurface = ptr::null_mut();
        let mut sync: VdrtSyncPoint = ptr::null_mut();

        let result = match bitstream {
            Some(view) => {
                let mut bs = abi_window(view)?;
                // SAFETY: the bitstream window is valid for the call; `work`
                // points into `self.surfaces`, whose planes reference the pool
                // arena that we hold mutably for the duration.
                let result = unsafe {
                    (lib.vdrt_decode_frame_async)(session, &mut bs, work, &mut out, &mut sync)
                };
                view.set_offset(bs.data_offset as usize);
                result
            }
            // SAFETY: as above; a null bitstream asks the runtime to drain.
            None => unsafe {
                (lib.vdrt_decode_frame_async)(session, ptr::null_mut(), work, &mut out, &mut sync)
            },
        };

        self.mirror_locks(pool)?;

        match result {
            status::ERR_MORE_DATA => Ok(Submission::MoreData),
            status::ERR_MORE_SURFACE => Ok(Submission::MoreSurface),
            status::WRN_DEVICE_BUSY => Ok(Submission::DeviceBusy),
            r if is_error(r) => Err(status_error("decode frame", r)),
            r => {
                if sync.is_null() {
                    // A warning without scheduled work (e.g. parameters changed).
                    debug!(status = r, "Submission produced no sync point");
                    return Ok(Submission::MoreSurface);
                }
                let output = self.surface_index(out).ok_or(RuntimeError::Status {
                    operation: "decode frame",
                    status: status::ERR_NULL_PTR,
                })?;
                Ok(Submission::Scheduled {
                    sync: SyncPoint(sync as usize as u64),
                    output,
                })
            }
        }
    }

    fn synchronize(
        &mut self,
        sync: SyncPoint,
        pool: &mut FramePool,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let session = self.session()?;
        let lib = self.library()?;
        let wait_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        let handle = sync.0 as usize as VdrtSyncPoint;
        // SAFETY: `handle` came from vdrt_decode_frame_async on this session.
        let result = unsafe { (lib.vdrt_sync_operation)(session, handle, wait_ms) };
        self.mirror_locks(pool)?;
        match result {
            status::WRN_IN_EXECUTION => Err(RuntimeError::WaitTimeout(timeout)),
            r => check("synchronize", r),
        }
    }

    fn close(&mut self) {
        if self.session.is_null() {
            return;
        }
        if let Some(lib) = self.lib.as_deref() {
            debug!("Closing codec runtime session");
            // SAFETY: the session is open and closed exactly once here.
            let result = unsafe { (lib.vdrt_close)(self.session) };
            if is_error(result) {
                error!(status = result, "Failed to close codec runtime session");
            }
        } else {
            warn!("Session handle present without a loaded library");
        }
        self.session = ptr::null_mut();
        self.params = None;
        self.surfaces.clear();
    }
}

impl Drop for DynamicRuntime {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DecodeEngine;
    use fake::Step;
    use vd_common::{DecoderConfig, OutputDescriptor};

    /// In-process `vdrt` with behaviour scripted per test thread.
    mod fake {
        use std::cell::RefCell;
        use std::collections::VecDeque;

        use vd_common::FourCc;

        use crate::runtime::ffi::{
            status, RuntimeLibrary, VdrtBitstream, VdrtFrameAllocRequest, VdrtFrameInfo,
            VdrtSession, VdrtStatus, VdrtSurface, VdrtSyncPoint, VdrtVideoParam,
        };

        const SESSION: usize = 0x5E55;
        const SYNC: usize = 0x5C;

        /// Reply to one `vdrt_decode_frame_async` call.
        #[derive(Clone, Copy, Default)]
        pub struct Step {
            pub status: VdrtStatus,
            /// Bytes taken from the input window.
            pub consume: u32,
            /// Lock the work surface, write `fill` to its first luma byte
            /// and hand it back with a sync point.
            pub schedule: bool,
            pub fill: u8,
        }

        #[derive(Default)]
        pub struct Script {
            pub header: VdrtFrameInfo,
            pub submits: VecDeque<Step>,
            pub syncs: VecDeque<VdrtStatus>,
            pub drains: u32,
            pub closes: u32,
        }

        thread_local! {
            static SCRIPT: RefCell<Script> = RefCell::new(Script::default());
        }

        pub fn with<T>(f: impl FnOnce(&mut Script) -> T) -> T {
            SCRIPT.with(|script| f(&mut script.borrow_mut()))
        }

        /// 64x48 coded NV12 stream showing 64x40.
        pub fn reset() {
            with(|script| {
                *script = Script {
                    header: VdrtFrameInfo {
                        fourcc: FourCc::Nv12.code(),
                        chroma_format: 1,
                        width: 64,
                        height: 48,
                        crop_w: 64,
                        crop_h: 40,
                        ..VdrtFrameInfo::default()
                    },
                    ..Script::default()
                }
            });
        }

        unsafe extern "C" fn open(_implementation: i32, session: *mut VdrtSession) -> VdrtStatus {
            *session = SESSION as VdrtSession;
            status::NONE
        }

        unsafe extern "C" fn declare(_session: VdrtSession, _codec: i32, _io: u16) -> VdrtStatus {
            status::NONE
        }

        unsafe extern "C" fn decode_header(
            _session: VdrtSession,
            bs: *mut VdrtBitstream,
            par: *mut VdrtVideoParam,
        ) -> VdrtStatus {
            if (*bs).data_length == 0 {
                return status::ERR_MORE_DATA;
            }
            (*par).frame_info = with(|script| script.header);
            status::NONE
        }

        unsafe extern "C" fn query(
            _session: VdrtSession,
            input: *const VdrtVideoParam,
            output: *mut VdrtVideoParam,
        ) -> VdrtStatus {
            *output = *input;
            status::NONE
        }

        /// Surface geometry comes back without a crop rectangle.
        unsafe extern "C" fn query_io_surf(
            _session: VdrtSession,
            par: *const VdrtVideoParam,
            request: *mut VdrtFrameAllocRequest,
        ) -> VdrtStatus {
            let info = VdrtFrameInfo {
                crop_x: 0,
                crop_y: 0,
                crop_w: 0,
                crop_h: 0,
                ..(*par).frame_info
            };
            *request = VdrtFrameAllocRequest {
                num_min: 2,
                num_suggested: 3,
                info,
            };
            status::NONE
        }

        unsafe extern "C" fn init(_session: VdrtSession, _par: *const VdrtVideoParam) -> VdrtStatus {
            status::NONE
        }

        unsafe extern "C" fn decode_frame_async(
            _session: VdrtSession,
            bs: *mut VdrtBitstream,
            work: *mut VdrtSurface,
            out: *mut *mut VdrtSurface,
            sync: *mut VdrtSyncPoint,
        ) -> VdrtStatus {
            let step = with(|script| {
                if bs.is_null() {
                    script.drains += 1;
                }
                script.submits.pop_front()
            })
            .unwrap_or(Step {
                status: status::ERR_MORE_DATA,
                ..Step::default()
            });
            if let Some(bs) = bs.as_mut() {
                let taken = step.consume.min(bs.data_length);
                bs.data_offset += taken;
                bs.data_length -= taken;
            }
            if step.schedule {
                (*work).locked = 1;
                *(*work).y = step.fill;
                *out = work;
                *sync = SYNC as VdrtSyncPoint;
            }
            step.status
        }

        unsafe extern "C" fn sync_operation(
            _session: VdrtSession,
            sync: VdrtSyncPoint,
            _wait_ms: u32,
        ) -> VdrtStatus {
            if sync as usize != SYNC {
                return status::ERR_NULL_PTR;
            }
            with(|script| script.syncs.pop_front()).unwrap_or(status::NONE)
        }

        unsafe extern "C" fn close(_session: VdrtSession) -> VdrtStatus {
            with(|script| script.closes += 1);
            status::NONE
        }

        pub fn library() -> RuntimeLibrary {
            RuntimeLibrary {
                library: None,
                vdrt_open: open,
                vdrt_declare: declare,
                vdrt_decode_header: decode_header,
                vdrt_query: query,
                vdrt_query_io_surf: query_io_surf,
                vdrt_init: init,
                vdrt_decode_frame_async: decode_frame_async,
                vdrt_sync_operation: sync_operation,
                vdrt_close: close,
            }
        }
    }

    fn open_fake(stream: &[u8]) -> (DynamicRuntime, FramePool) {
        fake::reset();
        let mut runtime = DynamicRuntime::with_library(Arc::new(fake::library()));
        runtime.open_session(Implementation::Auto).unwrap();
        runtime
            .declare_codec(VideoCodec::H264, IoPattern::SystemMemory)
            .unwrap();
        let view = BitstreamView::new(stream);
        let params = runtime.decode_header(&view).unwrap();
        assert_eq!(view.offset(), 0);
        let params = runtime.validate(&params).unwrap();
        let request = runtime.query_surfaces(&params).unwrap();
        let mut pool = FramePool::allocate(&request.info, usize::from(request.suggested), 16)
            .unwrap()
            .with_stream_info(params.frame_info);
        runtime.init_decoder(&params, &mut pool).unwrap();
        (runtime, pool)
    }

    fn scheduled(fill: u8, consume: u32) -> Step {
        Step {
            status: status::NONE,
            consume,
            schedule: true,
            fill,
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_error("declare codec", status::ERR_UNSUPPORTED),
            RuntimeError::Unsupported {
                operation: "declare codec"
            }
        );
        assert_eq!(
            status_error("decode header", status::ERR_NOT_FOUND),
            RuntimeError::HeaderNotFound
        );
        assert!(check("init", status::WRN_PARTIAL_ACCELERATION).is_ok());
        assert!(matches!(
            check("init", status::ERR_DEVICE_FAILED),
            Err(RuntimeError::Status { status: -17, .. })
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn lengths_beyond_u32_are_rejected() {
        assert_eq!(abi_len(4096), Ok(4096));
        let huge = u32::MAX as usize + 1;
        assert_eq!(abi_len(huge), Err(RuntimeError::InputTooLarge(huge)));
    }

    #[test]
    fn calls_before_open_are_rejected() {
        let mut runtime = DynamicRuntime::new(None);
        assert_eq!(
            runtime.declare_codec(VideoCodec::H264, IoPattern::SystemMemory),
            Err(RuntimeError::NotInitialized)
        );
        runtime.close();
    }

    #[test]
    fn missing_library_fails_open() {
        let mut runtime = DynamicRuntime::new(Some(PathBuf::from("/nonexistent/libvdrt.so")));
        let err = runtime.open_session(Implementation::Auto).unwrap_err();
        assert!(matches!(err, RuntimeError::Load(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn submit_statuses_map_to_submissions() {
        let stream = [0u8; 32];
        let (mut runtime, mut pool) = open_fake(&stream);
        fake::with(|script| {
            script.submits.extend([
                Step {
                    status: status::ERR_MORE_SURFACE,
                    consume: 4,
                    ..Step::default()
                },
                Step {
                    status: status::WRN_DEVICE_BUSY,
                    ..Step::default()
                },
                Step {
                    status: status::WRN_VIDEO_PARAM_CHANGED,
                    ..Step::default()
                },
                scheduled(0xAB, 8),
                Step {
                    status: status::ERR_MORE_DATA,
                    consume: 100,
                    ..Step::default()
                },
            ])
        });

        let mut view = BitstreamView::new(&stream);
        assert_eq!(
            runtime.submit(Some(&mut view), 0, &mut pool),
            Ok(Submission::MoreSurface)
        );
        assert_eq!(view.offset(), 4);
        assert_eq!(
            runtime.submit(Some(&mut view), 1, &mut pool),
            Ok(Submission::DeviceBusy)
        );
        // A warning without a sync point asks for another surface.
        assert_eq!(
            runtime.submit(Some(&mut view), 1, &mut pool),
            Ok(Submission::MoreSurface)
        );

        let submission = runtime.submit(Some(&mut view), 2, &mut pool).unwrap();
        assert!(matches!(submission, Submission::Scheduled { output: 2, .. }));
        assert_eq!(view.offset(), 12);
        assert!(pool.is_locked(2).unwrap());
        assert_eq!(pool.first_free(), Some(0));
        assert_eq!(pool.surface(2).unwrap().luma[0], 0xAB);

        assert_eq!(
            runtime.submit(Some(&mut view), 0, &mut pool),
            Ok(Submission::MoreData)
        );
        assert_eq!(view.offset(), stream.len());
    }

    #[test]
    fn drain_submits_without_a_bitstream() {
        let (mut runtime, mut pool) = open_fake(&[0u8; 8]);
        fake::with(|script| script.submits.push_back(scheduled(7, 0)));

        let submission = runtime.submit(None, 1, &mut pool).unwrap();
        assert!(matches!(submission, Submission::Scheduled { output: 1, .. }));
        assert_eq!(runtime.submit(None, 0, &mut pool), Ok(Submission::MoreData));
        assert_eq!(fake::with(|script| script.drains), 2);
    }

    #[test]
    fn synchronize_statuses() {
        let stream = [0u8; 8];
        let (mut runtime, mut pool) = open_fake(&stream);
        fake::with(|script| {
            script.submits.push_back(scheduled(1, 8));
            script.syncs.extend([
                status::WRN_IN_EXECUTION,
                status::ERR_DEVICE_FAILED,
                status::WRN_PARTIAL_ACCELERATION,
            ]);
        });

        let mut view = BitstreamView::new(&stream);
        let Ok(Submission::Scheduled { sync, .. }) = runtime.submit(Some(&mut view), 0, &mut pool)
        else {
            panic!("expected a scheduled decode");
        };
        let timeout = Duration::from_millis(5);
        assert_eq!(
            runtime.synchronize(sync, &mut pool, timeout),
            Err(RuntimeError::WaitTimeout(timeout))
        );
        assert!(matches!(
            runtime.synchronize(sync, &mut pool, timeout),
            Err(RuntimeError::Status { status: -17, .. })
        ));
        assert_eq!(runtime.synchronize(sync, &mut pool, timeout), Ok(()));
        assert!(pool.is_locked(0).unwrap());
    }

    #[test]
    fn work_surface_out_of_range_is_a_pool_error() {
        let (mut runtime, mut pool) = open_fake(&[0u8; 8]);
        let capacity = pool.capacity();
        assert_eq!(
            runtime.submit(None, capacity, &mut pool),
            Err(RuntimeError::Pool(PoolError::IndexOutOfRange {
                index: capacity,
                capacity
            }))
        );
    }

    #[test]
    fn drop_closes_the_session_once() {
        let (mut runtime, _pool) = open_fake(&[0u8; 8]);
        runtime.close();
        drop(runtime);
        assert_eq!(fake::with(|script| script.closes), 1);
    }

    #[test]
    fn engine_decodes_through_the_library_table() {
        fake::reset();
        fake::with(|script| script.submits.push_back(scheduled(0x55, 16)));
        let runtime = DynamicRuntime::with_library(Arc::new(fake::library()));
        let config = DecoderConfig {
            codec: VideoCodec::H264,
            busy_wait_ms: 0,
            ..DecoderConfig::default()
        };
        let mut engine = DecodeEngine::new(runtime, config).unwrap();

        engine.decode_frame(&[0u8; 16]).unwrap();
        assert_eq!(engine.bytes_consumed(), 16);
        // Crop comes from the header even though the surface request had none.
        let frame = engine.frame().unwrap();
        assert_eq!(frame.descriptor, OutputDescriptor::yuv420(64, 40));
        assert_eq!(frame.data[0], 0x55);

        drop(engine);
        assert_eq!(fake::with(|script| script.closes), 1);
    }
}
