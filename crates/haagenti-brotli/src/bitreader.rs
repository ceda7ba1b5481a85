//! Bit-level input over a byte stream.
//!
//! Brotli streams are read least-significant-bit first. Input is pulled from
//! the source in 4096-byte batches, staged as 16-bit half-words, and served
//! from a 32-bit accumulator. The staging buffer keeps 64 spare bytes past
//! the batch so the accumulator can always be topped up without bounds
//! juggling in the hot path.

use std::io::Read;

use haagenti_core::{Error, Result};

/// Staged bytes per input batch.
const BATCH_SIZE: usize = 4096;

/// Half-word capacity of one batch.
const HALF_WATERLINE: usize = 2048;

/// Refill is required once fewer than 18 half-words remain.
const HALF_THRESHOLD: usize = 2030;

/// Little-endian bit reader with end-of-stream accounting.
pub struct BitReader<R> {
    src: R,
    byte_buffer: Box<[u8; BATCH_SIZE + 64]>,
    half_buffer: Box<[u16; HALF_WATERLINE + 32]>,
    accumulator: u32,
    bit_offset: u32,
    half_offset: usize,
    tail_bytes: i32,
    end_of_stream: bool,
    total_read: usize,
}

impl<R: Read> BitReader<R> {
    /// Create a reader and stage the first batch of input.
    pub fn new(src: R) -> Result<Self> {
        let mut reader = BitReader {
            src,
            byte_buffer: Box::new([0u8; BATCH_SIZE + 64]),
            half_buffer: Box::new([0u16; HALF_WATERLINE + 32]),
            accumulator: 0,
            bit_offset: 32,
            half_offset: HALF_WATERLINE,
            tail_bytes: 0,
            end_of_stream: false,
            total_read: 0,
        };
        reader.prepare()?;
        Ok(reader)
    }

    /// Number of staged half-words not yet consumed. Negative once the
    /// accumulator has been fed past the declared end of stream.
    fn half_available(&self) -> i32 {
        let limit = if self.end_of_stream {
            (self.tail_bytes + 1) >> 1
        } else {
            HALF_WATERLINE as i32
        };
        limit - self.half_offset as i32
    }

    /// Move one staged half-word into the accumulator.
    #[inline(always)]
    fn fetch_half(&mut self) {
        self.accumulator =
            ((self.half_buffer[self.half_offset] as u32) << 16) | (self.accumulator >> 16);
        self.half_offset += 1;
        self.bit_offset -= 16;
    }

    /// Top up the accumulator if fewer than 16 valid bits remain.
    #[inline(always)]
    pub fn fill(&mut self) {
        if self.bit_offset >= 16 {
            self.fetch_half();
        }
    }

    /// Pull more input if the staging buffer is running low.
    pub fn ensure_input(&mut self) -> Result<()> {
        if self.half_offset > HALF_THRESHOLD {
            self.pull()?;
        }
        Ok(())
    }

    /// Compact the staging buffer and read from the source until the batch
    /// is full or the source is exhausted.
    fn pull(&mut self) -> Result<()> {
        if self.end_of_stream {
            if self.half_available() >= -2 {
                return Ok(());
            }
            return Err(Error::unexpected_eof(self.total_read));
        }
        let read_offset = self.half_offset << 1;
        let mut bytes_in_buffer = BATCH_SIZE - read_offset;
        self.byte_buffer.copy_within(read_offset..BATCH_SIZE, 0);
        self.half_offset = 0;
        while bytes_in_buffer < BATCH_SIZE {
            let len = self.src.read(&mut self.byte_buffer[bytes_in_buffer..BATCH_SIZE])?;
            if len == 0 {
                self.end_of_stream = true;
                self.tail_bytes = bytes_in_buffer as i32;
                bytes_in_buffer += 1;
                break;
            }
            self.total_read += len;
            bytes_in_buffer += len;
        }
        self.stage_halves(bytes_in_buffer);
        Ok(())
    }

    fn stage_halves(&mut self, byte_len: usize) {
        let half_len = byte_len >> 1;
        for i in 0..half_len {
            self.half_buffer[i] =
                u16::from_le_bytes([self.byte_buffer[i * 2], self.byte_buffer[i * 2 + 1]]);
        }
    }

    /// Verify the read position against the declared end of stream.
    ///
    /// With `at_end` set, also reject streams that declare more bytes than
    /// the decoder consumed.
    pub fn check_health(&self, at_end: bool) -> Result<()> {
        if !self.end_of_stream {
            return Ok(());
        }
        let byte_offset =
            (self.half_offset as i32) * 2 + ((self.bit_offset as i32 + 7) >> 3) - 4;
        if byte_offset > self.tail_bytes {
            return Err(Error::corrupted("read past end of stream"));
        }
        if at_end && byte_offset != self.tail_bytes {
            return Err(Error::corrupted("unused bytes after end of stream"));
        }
        Ok(())
    }

    /// Refill the whole accumulator. Only valid when it is fully drained.
    fn prepare(&mut self) -> Result<()> {
        if self.half_offset > HALF_THRESHOLD {
            self.pull()?;
        }
        self.check_health(false)?;
        self.fetch_half();
        self.fetch_half();
        Ok(())
    }

    /// Refill the accumulator after a byte-aligned bulk operation.
    pub fn reload(&mut self) -> Result<()> {
        if self.bit_offset == 32 {
            self.prepare()?;
        }
        Ok(())
    }

    /// Read up to 16 bits. The accumulator must hold enough valid bits.
    #[inline(always)]
    pub fn read_few_bits(&mut self, n: u32) -> u32 {
        let val = (self.accumulator >> self.bit_offset) & ((1u32 << n) - 1);
        self.bit_offset += n;
        val
    }

    /// Read 17 to 32 bits.
    pub fn read_many_bits(&mut self, n: u32) -> u32 {
        let low = self.read_few_bits(16);
        self.fetch_half();
        low | (self.read_few_bits(n - 16) << 16)
    }

    /// Peek at the accumulator without consuming bits.
    #[inline(always)]
    pub fn peek_bits(&self) -> u32 {
        self.accumulator >> self.bit_offset
    }

    /// Consume `n` already-peeked bits.
    #[inline(always)]
    pub fn skip_bits(&mut self, n: u32) {
        self.bit_offset += n;
    }

    /// Skip to the next byte boundary, rejecting non-zero padding.
    pub fn jump_to_byte_boundary(&mut self) -> Result<()> {
        let padding = (32 - self.bit_offset) & 7;
        if padding != 0 && self.read_few_bits(padding) != 0 {
            return Err(Error::corrupted("corrupted padding bits"));
        }
        Ok(())
    }

    /// Copy `length` raw bytes into `data` at `offset`.
    ///
    /// The reader must be byte aligned. Drains the accumulator, then the
    /// staging buffer, then reads the remainder straight from the source.
    pub fn copy_raw_bytes(&mut self, data: &mut [u8], offset: usize, length: usize) -> Result<()> {
        if self.bit_offset & 7 != 0 {
            return Err(Error::corrupted("unaligned raw byte copy"));
        }
        let mut offset = offset;
        let mut length = length;
        while self.bit_offset != 32 && length != 0 {
            data[offset] = (self.accumulator >> self.bit_offset) as u8;
            offset += 1;
            self.bit_offset += 8;
            length -= 1;
        }
        if length == 0 {
            return Ok(());
        }
        let copy_halves = self.half_available().min((length >> 1) as i32);
        if copy_halves > 0 {
            let read_offset = self.half_offset << 1;
            let delta = (copy_halves as usize) << 1;
            data[offset..offset + delta]
                .copy_from_slice(&self.byte_buffer[read_offset..read_offset + delta]);
            offset += delta;
            length -= delta;
            self.half_offset += copy_halves as usize;
        }
        if length == 0 {
            return Ok(());
        }
        if self.half_available() > 0 {
            self.fill();
            while length != 0 {
                data[offset] = (self.accumulator >> self.bit_offset) as u8;
                offset += 1;
                self.bit_offset += 8;
                length -= 1;
            }
            return self.check_health(false);
        }
        while length > 0 {
            let len = self.src.read(&mut data[offset..offset + length])?;
            if len == 0 {
                return Err(Error::unexpected_eof(self.total_read));
            }
            self.total_read += len;
            offset += len;
            length -= len;
        }
        Ok(())
    }
}

// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_few_bits_lsb_first() {
        // 0xb5 = 1011_0101: reading 3 then 5 bits yields 0b101 and 0b10110.
        let data = [0xb5u8, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut br = BitReader::new(&data[..]).unwrap();
        assert_eq!(br.read_few_bits(3), 0b101);
        assert_eq!(br.read_few_bits(5), 0b10110);
    }

    #[test]
    fn test_read_many_bits_spans_halves() {
        let value: u32 = 0x00cafe77;
        let data = value.to_le_bytes();
        let mut padded = data.to_vec();
        padded.extend_from_slice(&[0u8; 8]);
        let mut br = BitReader::new(&padded[..]).unwrap();
        assert_eq!(br.read_many_bits(24), 0xcafe77);
    }

    #[test]
    fn test_bit_roundtrip_mixed_widths() {
        // Pack values LSB-first, then read them back with the same widths.
        let widths = [1u32, 7, 4, 16, 3, 9, 2, 14, 5, 11];
        let values = [1u32, 0x5a, 0xc, 0xbeef, 0x5, 0x1aa, 0x3, 0x2f0f, 0x11, 0x4d2];
        let mut bits: u64 = 0;
        let mut acc: u128 = 0;
        for (w, v) in widths.iter().zip(values.iter()) {
            acc |= (*v as u128) << bits;
            bits += *w as u64;
        }
        let mut data = Vec::new();
        for i in 0..((bits as usize + 7) / 8) {
            data.push((acc >> (i * 8)) as u8);
        }
        data.extend_from_slice(&[0u8; 8]);
        let mut br = BitReader::new(&data[..]).unwrap();
        for (w, v) in widths.iter().zip(values.iter()) {
            br.fill();
            let got = if *w <= 16 {
                br.read_few_bits(*w)
            } else {
                br.read_many_bits(*w)
            };
            assert_eq!(got, *v & ((1 << *w) - 1));
        }
    }

    #[test]
    fn test_jump_to_byte_boundary_rejects_nonzero_padding() {
        let data = [0xffu8, 0x00, 0x00, 0x00, 0x00];
        let mut br = BitReader::new(&data[..]).unwrap();
        br.read_few_bits(3);
        let err = br.jump_to_byte_boundary().unwrap_err();
        assert!(err.to_string().contains("padding"));
    }

    #[test]
    fn test_jump_to_byte_boundary_accepts_zero_padding() {
        let data = [0x07u8, 0x00, 0x00, 0x00, 0x00];
        let mut br = BitReader::new(&data[..]).unwrap();
        br.read_few_bits(3);
        br.jump_to_byte_boundary().unwrap();
    }

    #[test]
    fn test_copy_raw_bytes_after_alignment() {
        let mut data = vec![0x00u8]; // one byte consumed before the raw run
        let payload: Vec<u8> = (0u32..600).map(|i| (i * 7) as u8).collect();
        data.extend_from_slice(&payload);
        let mut br = BitReader::new(&data[..]).unwrap();
        br.read_few_bits(8);
        let mut out = vec![0u8; 600];
        br.copy_raw_bytes(&mut out, 0, 600).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_copy_raw_bytes_rejects_unaligned() {
        let data = [0u8; 16];
        let mut br = BitReader::new(&data[..]).unwrap();
        br.read_few_bits(3);
        let err = br.copy_raw_bytes(&mut [0u8; 4], 0, 4).unwrap_err();
        assert!(err.to_string().contains("unaligned"));
    }

    #[test]
    fn test_check_health_flags_unused_tail() {
        // Two bytes staged but only one consumed when the stream claims to end.
        let data = [0xaau8, 0xbb];
        let mut br = BitReader::new(&data[..]).unwrap();
        br.read_few_bits(8);
        let err = br.check_health(true).unwrap_err();
        assert!(err.to_string().contains("unused bytes"));
    }

    #[test]
    fn test_large_input_refill() {
        // More than one 4096-byte batch, consumed 16 bits at a time.
        let data: Vec<u8> = (0u32..10000).map(|i| (i % 251) as u8).collect();
        let mut br = BitReader::new(&data[..]).unwrap();
        for i in 0..5000usize {
            br.ensure_input().unwrap();
            br.fill();
            let expected =
                (data[i * 2] as u32) | ((data[i * 2 + 1] as u32) << 8);
            assert_eq!(br.read_few_bits(16), expected, "half-word {}", i);
        }
    }
}
