//! Compound (attached) dictionaries.
//!
//! Callers may attach byte chunks before decoding starts. The chunks form a
//! contiguous address space consulted when a backward reference reaches past
//! the window, ahead of the static dictionary. Copies can span chunk
//! boundaries and can suspend mid-way when the output fence is reached, so
//! the copy cursor lives outside this module.

use haagenti_core::{Error, Result};

/// Ordered list of attached dictionary chunks.
pub struct CompoundDictionary {
    chunks: Vec<Vec<u8>>,
    /// Cumulative chunk start offsets, one extra entry for the total size.
    chunk_offsets: Vec<i32>,
    total_size: i32,
    /// Shift for the block map, -1 until the map is built.
    block_bits: i32,
    block_map: Vec<u8>,
}

/// Resumable cursor for one compound dictionary copy.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompoundCopy {
    pub chunk_index: usize,
    /// Position inside the current chunk.
    pub chunk_offset: usize,
    pub remaining: i32,
}

impl CompoundDictionary {
    pub fn new() -> Self {
        CompoundDictionary {
            chunks: Vec::new(),
            chunk_offsets: vec![0],
            total_size: 0,
            block_bits: -1,
            block_map: Vec::new(),
        }
    }

    pub fn attach_chunk(&mut self, chunk: Vec<u8>) -> Result<()> {
        if chunk.is_empty() {
            return Err(Error::InvalidDictionary("empty dictionary chunk".into()));
        }
        if self.total_size as i64 + chunk.len() as i64 > 1 << 30 {
            return Err(Error::InvalidDictionary(
                "attached dictionary too large".into(),
            ));
        }
        self.total_size += chunk.len() as i32;
        self.chunk_offsets.push(self.total_size);
        self.chunks.push(chunk);
        self.block_bits = -1;
        Ok(())
    }

    #[inline]
    pub fn total_size(&self) -> i32 {
        self.total_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Builds the block-to-chunk map on first use. Block size is the
    /// smallest power of two that keeps the map at 256 entries or fewer.
    fn ensure_block_map(&mut self) {
        if self.block_bits >= 0 {
            return;
        }
        let mut bits = 8;
        while ((self.total_size - 1) >> bits) >= 256 {
            bits += 1;
        }
        let num_blocks = (((self.total_size - 1) >> bits) + 1) as usize;
        let mut map = vec![0u8; num_blocks];
        let mut chunk = 0usize;
        for (block, slot) in map.iter_mut().enumerate() {
            let start = (block as i32) << bits;
            while self.chunk_offsets[chunk + 1] <= start {
                chunk += 1;
            }
            *slot = chunk as u8;
        }
        self.block_bits = bits;
        self.block_map = map;
    }

    /// Begins a copy of `length` bytes starting at absolute `offset`.
    pub fn start_copy(&mut self, offset: i32, length: i32) -> Result<CompoundCopy> {
        if offset < 0 || length <= 0 || offset as i64 + length as i64 > self.total_size as i64 {
            return Err(Error::corrupted("invalid compound dictionary reference"));
        }
        self.ensure_block_map();
        let mut chunk = self.block_map[(offset >> self.block_bits) as usize] as usize;
        while self.chunk_offsets[chunk + 1] <= offset {
            chunk += 1;
        }
        Ok(CompoundCopy {
            chunk_index: chunk,
            chunk_offset: (offset - self.chunk_offsets[chunk]) as usize,
            remaining: length,
        })
    }

    /// Copies pending bytes into `dst` starting at `dst_pos`, stopping at
    /// `limit`. Returns the number of bytes written; the cursor keeps any
    /// remainder for a later call.
    pub fn copy_into(
        &self,
        dst: &mut [u8],
        dst_pos: usize,
        limit: usize,
        cursor: &mut CompoundCopy,
    ) -> usize {
        let mut pos = dst_pos;
        while cursor.remaining > 0 && pos < limit {
            let chunk = &self.chunks[cursor.chunk_index];
            let available = chunk.len() - cursor.chunk_offset;
            let step = available.min(limit - pos).min(cursor.remaining as usize);
            dst[pos..pos + step]
                .copy_from_slice(&chunk[cursor.chunk_offset..cursor.chunk_offset + step]);
            pos += step;
            cursor.remaining -= step as i32;
            cursor.chunk_offset += step;
            if cursor.chunk_offset == chunk.len() {
                cursor.chunk_index += 1;
                cursor.chunk_offset = 0;
            }
        }
        pos - dst_pos
    }
}

impl Default for CompoundDictionary {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn three_chunks() -> CompoundDictionary {
        let mut cd = CompoundDictionary::new();
        cd.attach_chunk(b"abcde".to_vec()).unwrap();
        cd.attach_chunk(b"XY".to_vec()).unwrap();
        cd.attach_chunk(b"01234567".to_vec()).unwrap();
        cd
    }

    #[test]
    fn test_copy_spans_chunks() {
        let mut cd = three_chunks();
        let mut cursor = cd.start_copy(3, 10).unwrap();
        let mut out = vec![0u8; 16];
        let n = cd.copy_into(&mut out, 0, 16, &mut cursor);
        assert_eq!(n, 10);
        assert_eq!(&out[..10], b"deXY012345");
        assert_eq!(cursor.remaining, 0);
    }

    #[test]
    fn test_copy_suspends_at_limit() {
        let mut cd = three_chunks();
        let mut cursor = cd.start_copy(0, 15).unwrap();
        let mut out = vec![0u8; 15];
        let n = cd.copy_into(&mut out, 0, 6, &mut cursor);
        assert_eq!(n, 6);
        assert_eq!(cursor.remaining, 9);
        let n = cd.copy_into(&mut out, 6, 15, &mut cursor);
        assert_eq!(n, 9);
        assert_eq!(&out[..], b"abcdeXY01234567");
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut cd = three_chunks();
        assert!(cd.start_copy(10, 6).is_err());
        assert!(cd.start_copy(-1, 2).is_err());
        assert!(cd.start_copy(0, 0).is_err());
    }

    #[test]
    fn test_block_map_with_large_chunks() {
        let mut cd = CompoundDictionary::new();
        cd.attach_chunk(vec![1u8; 100_000]).unwrap();
        cd.attach_chunk(vec![2u8; 300_000]).unwrap();
        let mut cursor = cd.start_copy(99_998, 4).unwrap();
        let mut out = vec![0u8; 4];
        cd.copy_into(&mut out, 0, 4, &mut cursor);
        assert_eq!(out, [1, 1, 2, 2]);
    }

    #[test]
    fn test_empty_chunk_rejected() {
        let mut cd = CompoundDictionary::new();
        assert!(cd.attach_chunk(Vec::new()).is_err());
    }
}
