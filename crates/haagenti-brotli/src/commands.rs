//! Insert-and-copy command alphabet.
//!
//! Each of the 704 command symbols encodes an insert length range, a copy
//! length range and whether the distance is implicit (reuse the most recent
//! one). The ranges are expanded here into a lookup table consulted once per
//! command.

use std::sync::LazyLock;

const INSERT_LENGTH_N_BITS: [u8; 24] = [
    0, 0, 0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 7, 8, 9, 10, 12, 14, 24,
];

const COPY_LENGTH_N_BITS: [u8; 24] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 7, 8, 9, 10, 24,
];

/// Expanded form of one command symbol.
#[derive(Clone, Copy, Debug)]
pub struct InsertCopyCode {
    /// Extra bits to read for the insert length.
    pub insert_bits: u8,
    /// Extra bits to read for the copy length.
    pub copy_bits: u8,
    /// Base insert length for this symbol.
    pub insert_offset: i32,
    /// Base copy length for this symbol.
    pub copy_offset: i32,
    /// Distance context id (0..=3), or negative when the command reuses the
    /// most recent distance without reading one from the stream.
    pub distance_context: i8,
}

/// All 704 command symbols, indexed by the decoded symbol value.
pub static CMD_LOOKUP: LazyLock<[InsertCopyCode; 704]> = LazyLock::new(|| {
    let mut insert_offsets = [0i32; 24];
    let mut copy_offsets = [0i32; 24];
    copy_offsets[0] = 2;
    for i in 0..23 {
        insert_offsets[i + 1] = insert_offsets[i] + (1 << INSERT_LENGTH_N_BITS[i]);
        copy_offsets[i + 1] = copy_offsets[i] + (1 << COPY_LENGTH_N_BITS[i]);
    }

    let mut table = [InsertCopyCode {
        insert_bits: 0,
        copy_bits: 0,
        insert_offset: 0,
        copy_offset: 0,
        distance_context: 0,
    }; 704];

    for (cmd_code, entry) in table.iter_mut().enumerate() {
        let mut range_idx = cmd_code >> 6;
        let mut distance_context_offset = -4i32;
        if range_idx >= 2 {
            range_idx -= 2;
            distance_context_offset = 0;
        }
        let insert_code =
            (((0x29850 >> (range_idx * 2)) & 0x3) << 3) | ((cmd_code >> 3) & 7);
        let copy_code = (((0x26244 >> (range_idx * 2)) & 0x3) << 3) | (cmd_code & 7);
        let copy_length_offset = copy_offsets[copy_code];
        let distance_context = distance_context_offset
            + if copy_length_offset > 4 {
                3
            } else {
                copy_length_offset - 2
            };
        *entry = InsertCopyCode {
            insert_bits: INSERT_LENGTH_N_BITS[insert_code],
            copy_bits: COPY_LENGTH_N_BITS[copy_code],
            insert_offset: insert_offsets[insert_code],
            copy_offset: copy_length_offset,
            distance_context: distance_context as i8,
        };
    }
    table
});

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_command_is_implicit_minimal() {
        let cmd = CMD_LOOKUP[0];
        assert_eq!(cmd.insert_bits, 0);
        assert_eq!(cmd.copy_bits, 0);
        assert_eq!(cmd.insert_offset, 0);
        assert_eq!(cmd.copy_offset, 2);
        assert_eq!(cmd.distance_context, -4);
    }

    #[test]
    fn test_last_command_covers_maximum_ranges() {
        let cmd = CMD_LOOKUP[703];
        assert_eq!(cmd.insert_bits, 24);
        assert_eq!(cmd.copy_bits, 24);
        assert_eq!(cmd.insert_offset, 22594);
        assert_eq!(cmd.copy_offset, 2118);
        assert_eq!(cmd.distance_context, 3);
    }

    #[test]
    fn test_implicit_distance_only_in_first_two_ranges() {
        for (code, cmd) in CMD_LOOKUP.iter().enumerate() {
            if code < 128 {
                assert!(cmd.distance_context < 0, "code {}", code);
            } else {
                assert!(
                    (0..=3).contains(&cmd.distance_context),
                    "code {}: {}",
                    code,
                    cmd.distance_context
                );
            }
        }
    }

    #[test]
    fn test_known_entries() {
        let cmd = CMD_LOOKUP[64];
        assert_eq!(
            (cmd.insert_bits, cmd.copy_bits, cmd.insert_offset, cmd.copy_offset),
            (0, 1, 0, 10)
        );
        assert_eq!(cmd.distance_context, -1);
        let cmd = CMD_LOOKUP[128];
        assert_eq!((cmd.insert_offset, cmd.copy_offset, cmd.distance_context), (0, 2, 0));
    }

    #[test]
    fn test_length_ranges_are_contiguous() {
        // Every copy length from 2 upward must be reachable from some code.
        let mut covered = vec![false; 3000];
        for cmd in CMD_LOOKUP.iter() {
            let lo = cmd.copy_offset as usize;
            let hi = lo + (1usize << cmd.copy_bits.min(12));
            for slot in covered[lo.min(3000)..hi.min(3000)].iter_mut() {
                *slot = true;
            }
        }
        assert!(covered[2..3000].iter().all(|&c| c));
        assert!(!covered[0] && !covered[1]);
    }
}
