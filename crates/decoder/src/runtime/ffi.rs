//! Raw FFI bindings for the `vdrt` codec runtime shim.
//!
//! The shim wraps a vendor media SDK behind a small C ABI so the engine can
//! load it at run time via `libloading` instead of linking against it. The
//! call sequence and status convention follow the usual media-SDK shape:
//! negative statuses are errors, positive ones are warnings.

use std::ffi::c_void;
use std::path::Path;

use libloading::Library;
use tracing::{debug, info};

use vd_common::{ChromaFormat, CropRect, FourCc, FrameInfo};

// ---------------------------------------------------------------------------
// Handles and status codes
// ---------------------------------------------------------------------------

/// Opaque runtime session handle.
pub type VdrtSession = *mut c_void;

/// Opaque handle for a pending asynchronous operation.
pub type VdrtSyncPoint = *mut c_void;

/// Runtime return type. 0 is success.
pub type VdrtStatus = i32;

pub mod status {
    use super::VdrtStatus;

    pub const NONE: VdrtStatus = 0;
    pub const ERR_UNKNOWN: VdrtStatus = -1;
    pub const ERR_NULL_PTR: VdrtStatus = -2;
    pub const ERR_UNSUPPORTED: VdrtStatus = -3;
    pub const ERR_MEMORY_ALLOC: VdrtStatus = -4;
    pub const ERR_NOT_ENOUGH_BUFFER: VdrtStatus = -5;
    pub const ERR_NOT_FOUND: VdrtStatus = -9;
    pub const ERR_MORE_DATA: VdrtStatus = -10;
    pub const ERR_MORE_SURFACE: VdrtStatus = -11;
    pub const ERR_DEVICE_FAILED: VdrtStatus = -17;

    /// Synchronize returned before the operation finished.
    pub const WRN_IN_EXECUTION: VdrtStatus = 1;
    pub const WRN_DEVICE_BUSY: VdrtStatus = 2;
    pub const WRN_VIDEO_PARAM_CHANGED: VdrtStatus = 3;
    pub const WRN_PARTIAL_ACCELERATION: VdrtStatus = 4;
}

// ---------------------------------------------------------------------------
// Parameter structs
// ---------------------------------------------------------------------------

/// Surface geometry. Matches `vdrtFrameInfo`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VdrtFrameInfo {
    pub fourcc: u32,
    pub chroma_format: u16,
    pub width: u16,
    pub height: u16,
    pub crop_x: u16,
    pub crop_y: u16,
    pub crop_w: u16,
    pub crop_h: u16,
    pub reserved: u16,
}

impl VdrtFrameInfo {
    pub fn from_common(info: &FrameInfo) -> Self {
        Self {
            fourcc: info.fourcc.code(),
            chroma_format: info.chroma_format.as_raw(),
            width: clamp_u16(info.width),
            height: clamp_u16(info.height),
            crop_x: clamp_u16(info.crop.x),
            crop_y: clamp_u16(info.crop.y),
            crop_w: clamp_u16(info.crop.width),
            crop_h: clamp_u16(info.crop.height),
            reserved: 0,
        }
    }

    /// `None` if the runtime reported a fourcc or chroma format we do not model.
    pub fn to_common(&self) -> Option<FrameInfo> {
        Some(FrameInfo {
            fourcc: FourCc::from_code(self.fourcc)?,
            chroma_format: ChromaFormat::from_raw(self.chroma_format)?,
            width: self.width.into(),
            height: self.height.into(),
            crop: CropRect::new(
                self.crop_x.into(),
                self.crop_y.into(),
                self.crop_w.into(),
                self.crop_h.into(),
            ),
        })
    }
}

fn clamp_u16(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

/// Decoder parameters. Matches `vdrtVideoParam`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VdrtVideoParam {
    pub codec_id: i32,
    /// 1 = system memory, 2 = video memory.
    pub io_pattern: u16,
    pub reserved: u16,
    pub frame_info: VdrtFrameInfo,
}

/// Surface count request. Matches `vdrtFrameAllocRequest`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VdrtFrameAllocRequest {
    pub num_min: u16,
    pub num_suggested: u16,
    pub info: VdrtFrameInfo,
}

/// Compressed input window. The runtime advances `data_offset` and shrinks
/// `data_length` as it consumes bytes; it never writes through `data`.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct VdrtBitstream {
    pub data: *const u8,
    pub data_offset: u32,
    pub data_length: u32,
    pub max_length: u32,
}

/// One decode surface. Plane pointers reference the engine's frame pool
/// arena. `locked` is maintained by the runtime.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct VdrtSurface {
    pub y: *mut u8,
    pub uv: *mut u8,
    pub pitch: u32,
    pub locked: u16,
    pub reserved: u16,
    pub info: VdrtFrameInfo,
}

// ---------------------------------------------------------------------------
// Dynamic library wrapper
// ---------------------------------------------------------------------------

type OpenFn = unsafe extern "C" fn(implementation: i32, session: *mut VdrtSession) -> VdrtStatus;
type DeclareFn =
    unsafe extern "C" fn(session: VdrtSession, codec_id: i32, io_pattern: u16) -> VdrtStatus;
type DecodeHeaderFn = unsafe extern "C" fn(
    session: VdrtSession,
    bs: *mut VdrtBitstream,
    par: *mut VdrtVideoParam,
) -> VdrtStatus;
type QueryFn = unsafe extern "C" fn(
    session: VdrtSession,
    input: *const VdrtVideoParam,
    output: *mut VdrtVideoParam,
) -> VdrtStatus;
type QueryIoSurfFn = unsafe extern "C" fn(
    session: VdrtSession,
    par: *const VdrtVideoParam,
    request: *mut VdrtFrameAllocRequest,
) -> VdrtStatus;
type InitFn = unsafe extern "C" fn(session: VdrtSession, par: *const VdrtVideoParam) -> VdrtStatus;
type DecodeFrameAsyncFn = unsafe extern "C" fn(
    session: VdrtSession,
    bs: *mut VdrtBitstream,
    surface_work: *mut VdrtSurface,
    surface_out: *mut *mut VdrtSurface,
    sync: *mut VdrtSyncPoint,
) -> VdrtStatus;
type SyncOperationFn =
    unsafe extern "C" fn(session: VdrtSession, sync: VdrtSyncPoint, wait_ms: u32) -> VdrtStatus;
type CloseFn = unsafe extern "C" fn(session: VdrtSession) -> VdrtStatus;

/// Dynamically loaded `vdrt` library with typed function pointers.
pub struct RuntimeLibrary {
    /// Must outlive every function pointer below. `None` when the table
    /// points at functions linked into this binary.
    pub(crate) library: Option<Library>,

    pub vdrt_open: OpenFn,
    pub vdrt_declare: DeclareFn,
    pub vdrt_decode_header: DecodeHeaderFn,
    pub vdrt_query: QueryFn,
    pub vdrt_query_io_surf: QueryIoSurfFn,
    pub vdrt_init: InitFn,
    pub vdrt_decode_frame_async: DecodeFrameAsyncFn,
    pub vdrt_sync_operation: SyncOperationFn,
    pub vdrt_close: CloseFn,
}

// SAFETY: the struct only holds plain function pointers and the library
// handle keeping them valid. Session handles are owned by callers.
unsafe impl Send for RuntimeLibrary {}
unsafe impl Sync for RuntimeLibrary {}

impl std::fmt::Debug for RuntimeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeLibrary")
            .field("loaded", &self.library.is_some())
            .finish()
    }
}

/// Copy a typed symbol out of `lib`.
///
/// # Safety
/// `T` must be the exact function pointer type of the exported symbol.
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, RuntimeLoadError> {
    let sym = lib.get::<T>(name).map_err(|e| {
        let printable = String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]);
        RuntimeLoadError::SymbolNotFound(format!("{printable}: {e}"))
    })?;
    Ok(*sym)
}

impl RuntimeLibrary {
    /// Load the runtime from the platform default library name.
    pub fn load() -> Result<Self, RuntimeLoadError> {
        let lib_name = Self::library_name();
        info!(library = %lib_name, "Loading codec runtime library");

        // SAFETY: loading a shared library runs its initializers. The vdrt
        // shim has none beyond registering its exports.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            RuntimeLoadError::LibraryNotFound(format!(
                "Failed to load {lib_name}: {e}. Is the codec runtime installed?"
            ))
        })?;
        Self::from_library(lib)
    }

    /// Load from a specific path (non-standard installs, test doubles).
    pub fn load_from(path: &Path) -> Result<Self, RuntimeLoadError> {
        info!(path = %path.display(), "Loading codec runtime library from custom path");

        // SAFETY: the caller asserts `path` names a vdrt-compatible library.
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            RuntimeLoadError::LibraryNotFound(format!("Failed to load {}: {e}", path.display()))
        })?;
        Self::from_library(lib)
    }

    fn from_library(lib: Library) -> Result<Self, RuntimeLoadError> {
        // SAFETY: every type alias above mirrors the vdrt C header. Function
        // pointers are copied out so the borrow on `lib` ends before it is
        // moved into the struct.
        unsafe {
            let vdrt_open = symbol::<OpenFn>(&lib, b"vdrt_open\0")?;
            let vdrt_declare = symbol::<DeclareFn>(&lib, b"vdrt_declare\0")?;
            let vdrt_decode_header = symbol::<DecodeHeaderFn>(&lib, b"vdrt_decode_header\0")?;
            let vdrt_query = symbol::<QueryFn>(&lib, b"vdrt_query\0")?;
            let vdrt_query_io_surf = symbol::<QueryIoSurfFn>(&lib, b"vdrt_query_io_surf\0")?;
            let vdrt_init = symbol::<InitFn>(&lib, b"vdrt_init\0")?;
            let vdrt_decode_frame_async =
                symbol::<DecodeFrameAsyncFn>(&lib, b"vdrt_decode_frame_async\0")?;
            let vdrt_sync_operation = symbol::<SyncOperationFn>(&lib, b"vdrt_sync_operation\0")?;
            let vdrt_close = symbol::<CloseFn>(&lib, b"vdrt_close\0")?;

            debug!("All codec runtime symbols loaded successfully");

            Ok(Self {
                library: Some(lib),
                vdrt_open,
                vdrt_declare,
                vdrt_decode_header,
                vdrt_query,
                vdrt_query_io_surf,
                vdrt_init,
                vdrt_decode_frame_async,
                vdrt_sync_operation,
                vdrt_close,
            })
        }
    }

    /// Platform-specific library filename.
    pub fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "vdrt.dll"
        } else if cfg!(target_os = "macos") {
            "libvdrt.dylib"
        } else {
            "libvdrt.so.1"
        }
    }
}

// ---------------------------------------------------------------------------
// Error type for library loading
// ---------------------------------------------------------------------------

/// Errors that can occur when loading the runtime library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeLoadError {
    #[error("Codec runtime library not found: {0}")]
    LibraryNotFound(String),

    #[error("Required symbol not found: {0}")]
    SymbolNotFound(String),
}

/// Errors are negative. Warnings pass, except the ones callers must act on,
/// which they check before calling this.
pub fn is_error(result: VdrtStatus) -> bool {
    result < status::NONE
}
