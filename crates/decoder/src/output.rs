//! Single-slot output buffer holding the latest planar frame.

use vd_common::CapacityPolicy;

/// Reusable byte buffer with an explicit capacity policy.
///
/// The logical length always equals the last frame's byte size. Under
/// [`CapacityPolicy::Amortized`] the allocation is kept and only grows;
/// under [`CapacityPolicy::Exact`] every frame gets a fresh allocation of
/// exactly its size.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    policy: CapacityPolicy,
    allocations: u64,
}

impl OutputBuffer {
    pub fn new(policy: CapacityPolicy) -> Self {
        Self {
            bytes: Vec::new(),
            policy,
            allocations: 0,
        }
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Resize the logical length to `len` and return the writable bytes.
    pub(crate) fn prepare(&mut self, len: usize) -> &mut [u8] {
        match self.policy {
            CapacityPolicy::Exact => {
                self.bytes = vec![0u8; len];
                self.allocations += 1;
            }
            CapacityPolicy::Amortized => {
                if len > self.bytes.capacity() {
                    self.allocations += 1;
                }
                self.bytes.resize(len, 0);
            }
        }
        &mut self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Number of heap allocations performed so far.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}
