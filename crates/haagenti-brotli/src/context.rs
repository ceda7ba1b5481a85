//! Literal context modelling.
//!
//! Brotli selects the Huffman tree for each literal from a 6-bit context id
//! computed from the previous two output bytes. Four context modes exist
//! (LSB6, MSB6, UTF8, SIGNED); each mode occupies a 512-entry span of a
//! single shared lookup table, split into a slice for the first previous
//! byte and a slice for the second.

use std::sync::LazyLock;

/// Packed description of the UTF8-mode first-byte contexts. Each character,
/// minus 32, is a quarter of the context value for the corresponding byte.
const UTF8_CONTEXT_MAP: &[u8; 128] = b"         !!  !                  \"#$##%#$&'##(#)#++++++++++((&*'##,---,---,-----,-----,-----&#'###.///.///./////./////./////&#'# ";

/// Run lengths for the UTF8-mode second-byte contexts, stored as
/// character code minus 32. The 19 runs cover all 256 byte values.
const UTF8_RUN_LENGTHS: &[u8; 19] = b"A/*  ':  & : $  \x81 @";

/// Context id table for all four modes, 512 entries per mode.
///
/// Layout per mode: `lookup[mode << 9 | p1]` is combined (bitwise or) with
/// `lookup[(mode << 9) + 256 + p2]` where `p1` and `p2` are the last two
/// bytes written.
pub static CONTEXT_LOOKUP: LazyLock<[u8; 2048]> = LazyLock::new(|| {
    let mut lookup = [0u8; 2048];

    // LSB6, MSB6 and the SIGNED second-byte slice.
    for i in 0..256 {
        lookup[i] = (i & 0x3f) as u8;
        lookup[512 + i] = (i >> 2) as u8;
        lookup[1792 + i] = 2 + (i >> 6) as u8;
    }

    // UTF8 first-byte contexts for the ASCII range.
    for i in 0..128 {
        lookup[1024 + i] = 4 * (UTF8_CONTEXT_MAP[i] - 32);
    }
    for i in 0..64 {
        lookup[1152 + i] = (i & 1) as u8;
        lookup[1216 + i] = 2 + (i & 1) as u8;
    }

    // UTF8 second-byte contexts, run-length encoded.
    let mut offset = 1280;
    for (k, &run) in UTF8_RUN_LENGTHS.iter().enumerate() {
        let value = (k & 3) as u8;
        let rep = (run - 32) as usize;
        lookup[offset..offset + rep].fill(value);
        offset += rep;
    }

    // SIGNED second-byte refinements.
    lookup[1792..1808].fill(1);
    lookup[2032..2048].fill(6);
    lookup[1792] = 0;
    lookup[2047] = 7;

    // SIGNED first-byte contexts derive from the second-byte slice.
    for i in 0..256 {
        lookup[1536 + i] = lookup[1792 + i] << 3;
    }

    lookup
});

// ============================================================================
// Tests
// ============================================================================
