/// Byte frequency histogram of a range of the logical content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteProfile {
    counts: [u64; 256],
}

impl ByteProfile {
    pub fn new() -> Self {
        Self { counts: [0; 256] }
    }

    pub fn add(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.counts[usize::from(b)] += 1;
        }
    }

    pub fn count(&self, byte: u8) -> u64 {
        self.counts[usize::from(byte)]
    }

    pub fn counts(&self) -> &[u64; 256] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bytes in the 7-bit ASCII range
    pub fn ascii_count(&self) -> u64 {
        self.counts[..128].iter().sum()
    }
}

impl Default for ByteProfile {
    fn default() -> Self {
        Self::new()
    }
}
