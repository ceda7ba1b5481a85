//! Static dictionary layout.
//!
//! The static dictionary is a flat blob of words grouped by length. For each
//! word length the dictionary holds `1 << size_bits[length]` words packed
//! back to back; a backward reference past the window selects a length, a
//! word index and a transform.
//!
//! The dictionary contents are not bundled with this crate. Callers supply
//! the RFC 7932 blob (or a custom one) through [`StaticDictionary::new`].

use haagenti_core::{Error, Result};

/// Longest word any dictionary may contain.
pub const MAX_WORD_LENGTH: usize = 31;

/// Word counts per length for the RFC 7932 dictionary, as log2.
pub const RFC_SIZE_BITS: [u8; 25] = [
    0, 0, 0, 0, 10, 10, 11, 11, 10, 10, 10, 10, 10, 9, 9, 8, 7, 7, 8, 7, 7, 6, 6, 5, 5,
];

/// Size of the RFC 7932 dictionary blob.
pub const RFC_DICTIONARY_SIZE: usize = 122784;

/// A validated static dictionary.
#[derive(Debug)]
pub struct StaticDictionary {
    pub(crate) data: Vec<u8>,
    pub(crate) offsets: [i32; 32],
    pub(crate) size_bits: [i32; 32],
}

impl StaticDictionary {
    /// Build a dictionary from its packed word data.
    ///
    /// # Arguments
    /// * `data` - Words of each length packed back to back, shortest first
    /// * `size_bits` - Per-length log2 word count, indexed by word length
    ///
    /// # Returns
    /// The dictionary, or `InvalidDictionary` when the blob size does not
    /// match the declared word counts.
    pub fn new(data: Vec<u8>, size_bits: &[u8]) -> Result<Self> {
        if size_bits.len() > 32 {
            return Err(Error::InvalidDictionary(format!(
                "too many word lengths: {}",
                size_bits.len()
            )));
        }
        let mut bits = [0i32; 32];
        let mut offsets = [0i32; 32];
        let mut position: i64 = 0;
        for (length, &b) in size_bits.iter().enumerate() {
            if b != 0 && length < 4 {
                return Err(Error::InvalidDictionary(format!(
                    "word length {} below minimum",
                    length
                )));
            }
            if b > 24 {
                return Err(Error::InvalidDictionary(format!(
                    "size bits {} out of range for length {}",
                    b, length
                )));
            }
            bits[length] = b as i32;
            offsets[length] = position as i32;
            if b != 0 {
                position += (length as i64) << b;
            }
        }
        for length in size_bits.len()..32 {
            offsets[length] = position as i32;
        }
        if position != data.len() as i64 {
            return Err(Error::InvalidDictionary(format!(
                "data size {} does not match declared words ({} expected)",
                data.len(),
                position
            )));
        }
        Ok(StaticDictionary {
            data,
            offsets,
            size_bits: bits,
        })
    }

    /// Build a dictionary using the RFC 7932 word counts.
    pub fn rfc(data: Vec<u8>) -> Result<Self> {
        Self::new(data, &RFC_SIZE_BITS)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte offset of word `index` of the given length.
    #[inline]
    pub(crate) fn word_offset(&self, length: usize, index: i32) -> usize {
        (self.offsets[length] + index * length as i32) as usize
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic() -> StaticDictionary {
        // 4 words of length 4, then 2 words of length 5.
        let mut bits = [0u8; 6];
        bits[4] = 2;
        bits[5] = 1;
        let data = b"aaaabbbbccccddddeeeeefffff".to_vec();
        StaticDictionary::new(data, &bits).unwrap()
    }

    #[test]
    fn test_offsets_and_word_lookup() {
        let dict = synthetic();
        assert_eq!(dict.offsets[4], 0);
        assert_eq!(dict.offsets[5], 16);
        assert_eq!(dict.offsets[6], 26);
        let off = dict.word_offset(4, 2);
        assert_eq!(&dict.data()[off..off + 4], b"cccc");
        let off = dict.word_offset(5, 1);
        assert_eq!(&dict.data()[off..off + 5], b"fffff");
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut bits = [0u8; 6];
        bits[4] = 2;
        let err = StaticDictionary::new(vec![0u8; 15], &bits).unwrap_err();
        assert!(matches!(err, Error::InvalidDictionary(_)));
    }

    #[test]
    fn test_short_word_lengths_rejected() {
        let mut bits = [0u8; 4];
        bits[2] = 1;
        assert!(StaticDictionary::new(vec![0u8; 4], &bits).is_err());
    }

    #[test]
    fn test_rfc_shape() {
        let dict = StaticDictionary::rfc(vec![0u8; RFC_DICTIONARY_SIZE]).unwrap();
        assert_eq!(dict.size_bits[4], 10);
        assert_eq!(dict.size_bits[24], 5);
        assert_eq!(dict.size_bits[25], 0);
        assert_eq!(dict.offsets[24] + (24 << 5), RFC_DICTIONARY_SIZE as i32);
    }
}
