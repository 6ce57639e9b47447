#![forbid(unsafe_code)]

/// CRC32 accumulated over several byte slices.
#[derive(Clone, Default)]
pub struct Crc32(crc32fast::Hasher);

impl Crc32 {
    /// Starts an empty checksum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` and returns the updated checksum.
    pub fn chain(mut self, bytes: &[u8]) -> Self {
        self.0.update(bytes);
        self
    }

    /// The checksum of everything fed so far.
    pub fn value(self) -> u32 {
        self.0.finalize()
    }
}

/// Checksum of a stored page image, bound to its page number and the file salt.
pub fn page_crc32(page_no: u32, salt: u64, payload: &[u8]) -> u32 {
    Crc32::new()
        .chain(&page_no.to_be_bytes())
        .chain(&salt.to_be_bytes())
        .chain(payload)
        .value()
}
