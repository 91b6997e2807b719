//! Bitstream cursor over caller-owned compressed bytes.

/// Non-owning view of compressed input with a consumption offset.
///
/// The runtime advances the offset as it consumes encoded data. The view
/// never copies or frees the underlying bytes.
#[derive(Clone, Debug)]
pub struct BitstreamView<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BitstreamView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// The full underlying buffer.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Mark `count` more bytes as consumed, saturating at the end of input.
    pub fn advance(&mut self, count: usize) {
        self.offset = self.offset.saturating_add(count).min(self.data.len());
    }

    /// Set the consumed offset reported by a runtime, saturating at the end.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.data.len());
    }
}
