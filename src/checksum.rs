//! Rolling CRC32 accumulator.
//!
//! Every REQ/RES/ERR frame ends with a big-endian CRC32 of the plaintext
//! processed so far in that direction. The accumulator keeps running
//! across frames, so it needs a non-consuming read of the current value;
//! `crc32fast::Hasher::finalize` consumes, hence the clone in `value`.

/// Incremental CRC32 (polynomial 0xEDB88320, init/xor 0xFFFFFFFF).
#[derive(Clone)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Create a fresh accumulator.
    pub fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Feed more plaintext into the accumulator.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Current checksum over everything fed so far.
    #[inline]
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Reset to the initial state.
    pub fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("value", &self.value())
            .finish()
    }
}
