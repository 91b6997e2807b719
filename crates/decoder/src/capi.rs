//! C ABI export surface.
//!
//! Handles are opaque `VdDecoder` pointers created by `vd_create*` and freed
//! by `vd_destroy`. `vd_decode_frame` returns the integer codes from
//! [`vd_common::status`]. The pointer from `vd_get_frame` is owned by the
//! decoder and invalidated by the next decode call or by `vd_destroy`.

use std::ffi::{c_char, CStr};
use std::ptr;
use std::slice;

use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use vd_common::{status, DecoderConfig};

use crate::api::{create, FrameDecoder};

/// Opaque decoder handle.
pub struct VdDecoder {
    inner: Box<dyn FrameDecoder>,
}

/// Frame header written by `vd_get_frame`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VdFrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub byte_size: u32,
}

fn into_handle(config: &DecoderConfig) -> *mut VdDecoder {
    match create(config) {
        Ok(inner) => Box::into_raw(Box::new(VdDecoder { inner })),
        Err(err) => {
            error!(error = %err, "Failed to create decoder");
            ptr::null_mut()
        }
    }
}

/// Create a decoder configured from `VDEC_CONFIG`, or defaults.
/// Returns null on a configuration error.
#[no_mangle]
pub extern "C" fn vd_create() -> *mut VdDecoder {
    match DecoderConfig::from_env() {
        Ok(config) => into_handle(&config),
        Err(err) => {
            error!(error = %err, "Invalid decoder configuration");
            ptr::null_mut()
        }
    }
}

/// Create a decoder from a JSON config string. Returns null on error.
///
/// # Safety
/// `json` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn vd_create_with_config(json: *const c_char) -> *mut VdDecoder {
    if json.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: non-null and NUL-terminated per the contract above.
    let text = match unsafe { CStr::from_ptr(json) }.to_str() {
        Ok(text) => text,
        Err(err) => {
            error!(error = %err, "Decoder config is not UTF-8");
            return ptr::null_mut();
        }
    };
    match DecoderConfig::from_json(text) {
        Ok(config) => into_handle(&config),
        Err(err) => {
            error!(error = %err, "Invalid decoder configuration");
            ptr::null_mut()
        }
    }
}

/// Destroy a decoder. Null is ignored.
///
/// # Safety
/// `handle` must be null or come from `vd_create*` and not be used again.
#[no_mangle]
pub unsafe extern "C" fn vd_destroy(handle: *mut VdDecoder) {
    if handle.is_null() {
        return;
    }
    // SAFETY: the handle was produced by Box::into_raw and is released once.
    drop(unsafe { Box::from_raw(handle) });
}

/// Feed `len` bytes at `data`. Returns 0 when a frame is available.
///
/// # Safety
/// `handle` must be a live decoder. `data` must be valid for `len` bytes
/// (it may be null when `len` is 0).
#[no_mangle]
pub unsafe extern "C" fn vd_decode_frame(handle: *mut VdDecoder, data: *const u8, len: usize) -> i32 {
    // SAFETY: live handle per the contract above.
    let Some(decoder) = (unsafe { handle.as_mut() }) else {
        return status::INVALID_ARGUMENT;
    };
    if data.is_null() && len > 0 {
        return status::INVALID_ARGUMENT;
    }
    let chunk: &[u8] = if len == 0 {
        &[]
    } else {
        // SAFETY: non-null and valid for `len` bytes per the contract above.
        unsafe { slice::from_raw_parts(data, len) }
    };

    match decoder.inner.decode_frame(chunk) {
        Ok(()) => status::OK,
        Err(err) if err.is_end_of_stream() => {
            debug!("End of stream");
            err.status_code()
        }
        Err(err) => {
            warn!(error = %err, "Decode failed");
            err.status_code()
        }
    }
}

/// Return the latest planar frame and write its header to `descriptor`.
/// Returns null (and a zeroed header) before the first successful decode.
///
/// # Safety
/// `handle` must be a live decoder; `descriptor` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn vd_get_frame(
    handle: *const VdDecoder,
    descriptor: *mut VdFrameDescriptor,
) -> *const u8 {
    // SAFETY: live handle per the contract above.
    let frame = unsafe { handle.as_ref() }.and_then(|decoder| decoder.inner.frame());
    let (header, data) = match frame {
        Some(frame) => (
            VdFrameDescriptor {
                width: frame.descriptor.width,
                height: frame.descriptor.height,
                byte_size: frame.descriptor.byte_size,
            },
            frame.data.as_ptr(),
        ),
        None => (VdFrameDescriptor::default(), ptr::null()),
    };
    if !descriptor.is_null() {
        // SAFETY: non-null and writable per the contract above.
        unsafe { descriptor.write(header) };
    }
    data
}

/// Static description of a status code.
#[no_mangle]
pub extern "C" fn vd_status_message(code: i32) -> *const c_char {
    let message: &'static [u8] = match code {
        status::OK => b"ok\0",
        status::STREAM_EXHAUSTED => b"end of stream\0",
        status::INITIALIZATION_FAILED => b"initialization failed\0",
        status::RESOURCE_EXHAUSTED => b"no free frame buffer\0",
        status::TIMEOUT => b"synchronize timed out\0",
        status::DEVICE_BUSY => b"device busy retry limit reached\0",
        status::RUNTIME_FAILURE => b"codec runtime failure\0",
        status::UNSUPPORTED_SURFACE => b"unsupported surface\0",
        status::INVALID_ARGUMENT => b"invalid argument\0",
        status::CONFIG => b"configuration error\0",
        _ => b"unknown status\0",
    };
    message.as_ptr().cast()
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
/// Returns 0 on success, 1 if a subscriber was already installed.
#[no_mangle]
pub extern "C" fn vd_init_logging() -> i32 {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        Ok(()) => 0,
        Err(_) => 1,
    }
}
