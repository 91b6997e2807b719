//! Frame Pool: a fixed set of decode surfaces carved out of one arena.
//!
//! The pool owns a single contiguous allocation sized as
//! `aligned_width * aligned_height * bits_per_pixel / 8 * num_surfaces`.
//! Every [`FrameBuffer`] records typed offsets into that arena for its luma
//! and chroma planes. Offsets are computed once at construction time and
//! validated against the arena size, so plane accessors never reach outside
//! the allocation and no two surfaces share bytes.
//!
//! Surfaces are lent to the codec runtime while it decodes into them or
//! keeps them as references. The runtime reports this through the lock
//! flag; the engine only hands out surfaces whose flag is clear.

use tracing::{debug, info};

use vd_common::{FrameInfo, PoolError};

/// Byte offsets of one surface's planes inside the pool arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    pub luma_offset: usize,
    pub luma_len: usize,
    /// For semi-planar surfaces the chroma plane immediately follows luma.
    pub chroma_offset: usize,
    pub chroma_len: usize,
    /// Row stride in bytes, shared by both planes.
    pub pitch: usize,
}

impl PlaneLayout {
    /// One past the last byte used by this surface.
    pub fn end(&self) -> usize {
        (self.luma_offset + self.luma_len).max(self.chroma_offset + self.chroma_len)
    }
}

/// One pool entry.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    layout: PlaneLayout,
    info: FrameInfo,
    locked: bool,
}

impl FrameBuffer {
    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    /// Stream geometry this surface was allocated for.
    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Read-only view of a decoded surface.
#[derive(Copy, Clone, Debug)]
pub struct Surface<'a> {
    pub info: FrameInfo,
    pub pitch: usize,
    pub luma: &'a [u8],
    pub chroma: &'a [u8],
}

/// Writable view of a surface, used by runtimes that decode in process.
#[derive(Debug)]
pub struct SurfaceMut<'a> {
    pub info: FrameInfo,
    pub pitch: usize,
    pub luma: &'a mut [u8],
    pub chroma: &'a mut [u8],
}

/// Fixed-capacity pool of decode surfaces backed by one arena.
pub struct FramePool {
    arena: Vec<u8>,
    buffers: Vec<FrameBuffer>,
    surface_size: usize,
    peak_locked: usize,
}

impl FramePool {
    /// Allocate `count` surfaces for `info`, with the surface width and
    /// height rounded up to `alignment`.
    pub fn allocate(info: &FrameInfo, count: usize, alignment: u32) -> Result<Self, PoolError> {
        if count == 0 {
            return Err(PoolError::NoSurfaces);
        }
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment(alignment));
        }

        let aligned = info.aligned(alignment);
        if aligned.width == 0 || aligned.height == 0 {
            return Err(PoolError::InvalidDimensions {
                width: info.width,
                height: info.height,
            });
        }

        let width = aligned.width as usize;
        let height = aligned.height as usize;
        let overflow = || PoolError::SizeOverflow {
            surfaces: count,
            surface_size: usize::MAX,
        };

        let surface_size = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(info.fourcc.bits_per_pixel() as usize))
            .map(|bits| bits / 8)
            .ok_or_else(overflow)?;
        let arena_size = surface_size
            .checked_mul(count)
            .ok_or(PoolError::SizeOverflow {
                surfaces: count,
                surface_size,
            })?;

        // Sized from stream headers, so the reservation must be fallible.
        let mut arena = Vec::new();
        arena
            .try_reserve_exact(arena_size)
            .map_err(|_| PoolError::AllocationFailed { bytes: arena_size })?;
        arena.resize(arena_size, 0);

        let (pitch, luma_len, chroma_len) = if info.fourcc.is_packed_rgb() {
            (width * 4, width * 4 * height, 0)
        } else {
            (width, width * height, width * height / 2)
        };

        let mut buffers = Vec::with_capacity(count);
        for index in 0..count {
            let luma_offset = surface_size * index;
            let layout = PlaneLayout {
                luma_offset,
                luma_len,
                chroma_offset: luma_offset + luma_len,
                chroma_len,
                pitch,
            };
            if layout.end() > arena_size || layout.end() > luma_offset + surface_size {
                return Err(PoolError::PlaneOutOfBounds {
                    index,
                    end: layout.end(),
                    arena: arena_size,
                });
            }
            buffers.push(FrameBuffer {
                layout,
                info: *info,
                locked: false,
            });
        }

        info!(
            surfaces = count,
            width = aligned.width,
            height = aligned.height,
            surface_size,
            arena_size,
            fourcc = ?info.fourcc,
            "Frame pool allocated"
        );

        Ok(Self {
            arena,
            buffers,
            surface_size,
            peak_locked: 0,
        })
    }

    /// Record the negotiated stream geometry on every surface. The runtime's
    /// surface request only sizes the arena; crop and pixel format come from
    /// the stream parameters.
    pub fn with_stream_info(mut self, stream: FrameInfo) -> Self {
        for buffer in &mut self.buffers {
            buffer.info = stream;
        }
        self
    }

    /// Number of surfaces in the pool.
    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    /// Bytes reserved per surface.
    pub fn surface_size(&self) -> usize {
        self.surface_size
    }

    /// Total bytes of the backing arena.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    pub fn buffers(&self) -> &[FrameBuffer] {
        &self.buffers
    }

    pub fn buffer(&self, index: usize) -> Result<&FrameBuffer, PoolError> {
        self.buffers.get(index).ok_or(PoolError::IndexOutOfRange {
            index,
            capacity: self.buffers.len(),
        })
    }

    /// First surface the runtime is not holding, scanning in pool order.
    pub fn first_free(&self) -> Option<usize> {
        self.buffers.iter().position(|b| !b.locked)
    }

    pub fn is_locked(&self, index: usize) -> Result<bool, PoolError> {
        Ok(self.buffer(index)?.locked)
    }

    pub fn lock(&mut self, index: usize) -> Result<(), PoolError> {
        self.set_locked(index, true)
    }

    pub fn unlock(&mut self, index: usize) -> Result<(), PoolError> {
        self.set_locked(index, false)
    }

    pub fn set_locked(&mut self, index: usize, locked: bool) -> Result<(), PoolError> {
        let capacity = self.buffers.len();
        let buffer = self
            .buffers
            .get_mut(index)
            .ok_or(PoolError::IndexOutOfRange { index, capacity })?;
        buffer.locked = locked;
        if locked {
            self.peak_locked = self.peak_locked.max(self.locked_count());
        }
        Ok(())
    }

    /// Clear every lock flag. Only valid once the runtime has been closed.
    pub fn unlock_all(&mut self) {
        let held = self.locked_count();
        if held > 0 {
            debug!(held, "Releasing all frame pool locks");
        }
        for buffer in &mut self.buffers {
            buffer.locked = false;
        }
    }

    pub fn locked_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.locked).count()
    }

    /// Highest number of simultaneously locked surfaces seen so far.
    pub fn peak_locked(&self) -> usize {
        self.peak_locked
    }

    /// Borrow a surface's planes.
    pub fn surface(&self, index: usize) -> Result<Surface<'_>, PoolError> {
        let buffer = self.buffer(index)?;
        let layout = buffer.layout;
        Ok(Surface {
            info: buffer.info,
            pitch: layout.pitch,
            luma: &self.arena[layout.luma_offset..layout.luma_offset + layout.luma_len],
            chroma: &self.arena[layout.chroma_offset..layout.chroma_offset + layout.chroma_len],
        })
    }

    /// Mutably borrow a surface's planes.
    pub fn surface_mut(&mut self, index: usize) -> Result<SurfaceMut<'_>, PoolError> {
        let buffer = self.buffer(index)?;
        let layout = buffer.layout;
        let info = buffer.info;

        let region = &mut self.arena[layout.luma_offset..layout.end()];
        let (luma, rest) = region.split_at_mut(layout.luma_len);
        let chroma_start = layout.chroma_offset - (layout.luma_offset + layout.luma_len);
        Ok(SurfaceMut {
            info,
            pitch: layout.pitch,
            luma,
            chroma: &mut rest[chroma_start..chroma_start + layout.chroma_len],
        })
    }

    /// Raw base pointer of the arena, for runtimes that write surfaces
    /// through a C ABI. Valid for the pool's lifetime; the arena is never
    /// reallocated after construction.
    pub(crate) fn arena_ptr(&mut self) -> *mut u8 {
        self.arena.as_mut_ptr()
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("capacity", &self.buffers.len())
            .field("surface_size", &self.surface_size)
            .field("locked", &self.locked_count())
            .field("peak_locked", &self.peak_locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vd_common::{CropRect, FourCc};

    fn hd_info() -> FrameInfo {
        FrameInfo {
            width: 1920,
            height: 1080,
            crop: CropRect::new(0, 0, 1920, 1080),
            ..FrameInfo::default()
        }
    }

    #[test]
    fn arena_is_sized_from_aligned_geometry() {
        let pool = FramePool::allocate(&hd_info(), 5, 32).unwrap();
        let surface_size = 1920 * 1088 * 12 / 8;
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.surface_size(), surface_size);
        assert_eq!(pool.arena_len(), surface_size * 5);
    }

    #[test]
    fn chroma_follows_luma() {
        let pool = FramePool::allocate(&hd_info(), 3, 32).unwrap();
        for (i, buffer) in pool.buffers().iter().enumerate() {
            let layout = buffer.layout();
            assert_eq!(layout.pitch, 1920);
            assert_eq!(layout.luma_offset, i * pool.surface_size());
            assert_eq!(layout.chroma_offset, layout.luma_offset + 1920 * 1088);
            assert_eq!(layout.chroma_len, 1920 * 1088 / 2);
            assert!(layout.end() <= pool.arena_len());
        }
    }

    #[test]
    fn surfaces_do_not_overlap() {
        let pool = FramePool::allocate(&hd_info(), 4, 32).unwrap();
        let layouts: Vec<_> = pool.buffers().iter().map(|b| *b.layout()).collect();
        for pair in layouts.windows(2) {
            assert!(pair[0].end() <= pair[1].luma_offset);
        }
    }

    #[test]
    fn buffers_keep_stream_geometry() {
        let pool = FramePool::allocate(&hd_info(), 2, 32).unwrap();
        let surface = pool.surface(1).unwrap();
        assert_eq!(surface.info.crop, CropRect::new(0, 0, 1920, 1080));
        assert_eq!(surface.luma.len(), 1920 * 1088);
        assert_eq!(surface.chroma.len(), 1920 * 544);
    }

    #[test]
    fn zero_surfaces_rejected() {
        assert_eq!(
            FramePool::allocate(&hd_info(), 0, 32).unwrap_err(),
            PoolError::NoSurfaces
        );
    }

    #[test]
    fn bad_alignment_rejected() {
        for alignment in [0, 3, 48] {
            assert_eq!(
                FramePool::allocate(&hd_info(), 2, alignment).unwrap_err(),
                PoolError::InvalidAlignment(alignment)
            );
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_arena_is_an_error() {
        let info = FrameInfo {
            width: 65535,
            height: 65535,
            ..FrameInfo::default()
        };
        assert!(matches!(
            FramePool::allocate(&info, 2_000_000_000, 32),
            Err(PoolError::AllocationFailed { .. })
        ));
    }

    #[test]
    fn stream_info_replaces_request_geometry() {
        let request = FrameInfo {
            width: 1920,
            height: 1088,
            ..FrameInfo::default()
        };
        let pool = FramePool::allocate(&request, 2, 32)
            .unwrap()
            .with_stream_info(FrameInfo {
                crop: CropRect::new(0, 0, 1920, 1080),
                ..request
            });
        for index in 0..2 {
            let surface = pool.surface(index).unwrap();
            assert_eq!(surface.info.crop, CropRect::new(0, 0, 1920, 1080));
            assert_eq!(surface.luma.len(), 1920 * 1088);
        }
    }

    #[test]
    fn zero_dimensions_rejected() {
        let info = FrameInfo::default();
        assert!(matches!(
            FramePool::allocate(&info, 2, 32),
            Err(PoolError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn free_scan_skips_locked() {
        let mut pool = FramePool::allocate(&hd_info(), 3, 32).unwrap();
        assert_eq!(pool.first_free(), Some(0));
        pool.lock(0).unwrap();
        pool.lock(1).unwrap();
        assert_eq!(pool.first_free(), Some(2));
        pool.lock(2).unwrap();
        assert_eq!(pool.first_free(), None);
        pool.unlock(1).unwrap();
        assert_eq!(pool.first_free(), Some(1));
        assert_eq!(pool.locked_count(), 2);
        assert_eq!(pool.peak_locked(), 3);
    }

    #[test]
    fn lock_out_of_range() {
        let mut pool = FramePool::allocate(&hd_info(), 2, 32).unwrap();
        assert_eq!(
            pool.lock(2).unwrap_err(),
            PoolError::IndexOutOfRange {
                index: 2,
                capacity: 2
            }
        );
    }

    #[test]
    fn surface_writes_stay_in_their_slot() {
        let info = FrameInfo {
            width: 32,
            height: 32,
            ..FrameInfo::default()
        };
        let mut pool = FramePool::allocate(&info, 2, 32).unwrap();
        {
            let surface = pool.surface_mut(1).unwrap();
            surface.luma.fill(0xAA);
            surface.chroma.fill(0x55);
        }
        let first = pool.surface(0).unwrap();
        assert!(first.luma.iter().all(|&b| b == 0));
        assert!(first.chroma.iter().all(|&b| b == 0));
        let second = pool.surface(1).unwrap();
        assert!(second.luma.iter().all(|&b| b == 0xAA));
        assert!(second.chroma.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn packed_rgb_has_no_chroma_plane() {
        let info = FrameInfo {
            fourcc: FourCc::Rgb4,
            width: 64,
            height: 32,
            ..FrameInfo::default()
        };
        let pool = FramePool::allocate(&info, 2, 32).unwrap();
        let layout = pool.buffer(0).unwrap().layout();
        assert_eq!(layout.pitch, 256);
        assert_eq!(layout.chroma_len, 0);
        assert_eq!(pool.surface_size(), 64 * 32 * 4);
    }

    #[test]
    fn unlock_all_clears_flags() {
        let mut pool = FramePool::allocate(&hd_info(), 2, 32).unwrap();
        pool.lock(0).unwrap();
        pool.lock(1).unwrap();
        pool.unlock_all();
        assert_eq!(pool.locked_count(), 0);
        assert_eq!(pool.peak_locked(), 2);
    }
}
