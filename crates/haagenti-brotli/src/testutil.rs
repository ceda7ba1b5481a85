//! Test-only helpers for building bit streams.

/// Accumulates values least-significant-bit first, the order Brotli streams
/// are written in.
pub struct BitSink {
    bytes: Vec<u8>,
    acc: u64,
    n: u32,
}

impl BitSink {
    pub fn new() -> Self {
        BitSink {
            bytes: Vec::new(),
            acc: 0,
            n: 0,
        }
    }

    pub fn push(&mut self, value: u32, bits: u32) {
        assert!(bits <= 32);
        if bits < 32 {
            assert!(value < (1 << bits), "value {} too wide for {} bits", value, bits);
        }
        self.acc |= (value as u64) << self.n;
        self.n += bits;
        while self.n >= 8 {
            self.bytes.push(self.acc as u8);
            self.acc >>= 8;
            self.n -= 8;
        }
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        assert_eq!(self.n % 8, 0, "push_bytes requires byte alignment");
        for &b in data {
            self.push(b as u32, 8);
        }
    }

    /// Pad to the next byte boundary with zero bits.
    pub fn align(&mut self) {
        if self.n > 0 {
            self.push(0, 8 - self.n);
        }
    }

    /// Pad the final partial byte with zeros and return the stream.
    pub fn finish(mut self) -> Vec<u8> {
        if self.n > 0 {
            self.bytes.push(self.acc as u8);
        }
        self.bytes
    }
}
