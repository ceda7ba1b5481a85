//! Canonical Huffman tables and code-specification decoding.
//!
//! Tables are two-level: an 8-bit root (5-bit for the code-length alphabet)
//! with sub-tables for longer codes. A table group is a flat `i32` array
//! whose first `n` slots hold the root offset of each tree; entries pack the
//! consumed bit count in the high half and the symbol (or sub-table link) in
//! the low half.

use std::io::Read;

use haagenti_core::{Error, Result};

use crate::bitreader::BitReader;

/// Maximum two-level table size, indexed by `(alphabet_size_limit + 31) >> 5`.
pub const MAX_HUFFMAN_TABLE_SIZE: [i32; 23] = [
    256, 402, 436, 468, 500, 534, 566, 598, 630, 662, 694, 726, 758, 790, 822,
    854, 886, 920, 952, 984, 1016, 1048, 1080,
];

/// Order in which code-length-code lengths are transmitted.
const CODE_LENGTH_CODE_ORDER: [usize; 18] = [
    1, 2, 3, 4, 0, 5, 17, 6, 16, 7, 8, 9, 10, 11, 12, 13, 14, 15,
];

/// Prebuilt 4-bit table for the code lengths of the code-length code itself.
const CL_FIXED_TABLE: [i32; 16] = [
    0x020000, 0x020004, 0x020003, 0x030002, 0x020000, 0x020004, 0x020003,
    0x040001, 0x020000, 0x020004, 0x020003, 0x030002, 0x020000, 0x020004,
    0x020003, 0x040005,
];

/// Worst-case two-level table size for an alphabet limit.
#[inline]
pub fn max_table_size(alphabet_size_limit: usize) -> usize {
    MAX_HUFFMAN_TABLE_SIZE[(alphabet_size_limit + 31) >> 5] as usize
}

/// Floor of log2, -1 for zero.
pub fn log2floor(mut i: i32) -> i32 {
    let mut result = -1;
    let mut step = 16;
    while step > 0 {
        if (i >> step) != 0 {
            result += step;
            i >>= step;
        }
        step >>= 1;
    }
    result + i
}

/// Next canonical key in bit-reversed increment order.
fn get_next_key(key: usize, len: usize) -> usize {
    let mut step = 1usize << (len - 1);
    while key & step != 0 {
        step >>= 1;
    }
    (key & step.wrapping_sub(1)).wrapping_add(step)
}

/// Stamp `item` over every `step`-th slot of a `end`-sized span.
fn replicate_value(table: &mut [i32], offset: usize, step: usize, end: usize, item: i32) {
    let mut end = end;
    loop {
        end -= step;
        table[offset + end] = item;
        if end == 0 {
            break;
        }
    }
}

/// Size of the next sub-table for codes of length `len` and longer.
fn next_table_bit_size(count: &[i32; 16], len: u32, root_bits: u32) -> u32 {
    let mut len = len;
    let mut left = 1i32 << (len - root_bits);
    while len < 15 {
        left -= count[len as usize];
        if left <= 0 {
            break;
        }
        len += 1;
        left <<= 1;
    }
    len - root_bits
}

/// Build a two-level table at `group[group[table_idx]]` from code lengths.
///
/// Lengths must form a complete code, except for the degenerate single-symbol
/// case which broadcasts that symbol with a zero bit cost. Returns the total
/// number of table slots used.
pub fn build_huffman_table(
    group: &mut [i32],
    table_idx: usize,
    root_bits: u32,
    code_lengths: &[i32],
) -> usize {
    let table_offset = group[table_idx] as usize;
    let mut sorted = vec![0i32; code_lengths.len()];
    let mut count = [0i32; 16];
    let mut offset = [0i32; 16];
    for &len in code_lengths {
        count[len as usize] += 1;
    }
    offset[1] = 0;
    for len in 1..15 {
        offset[len + 1] = offset[len] + count[len];
    }
    for (symbol, &len) in code_lengths.iter().enumerate() {
        if len != 0 {
            sorted[offset[len as usize] as usize] = symbol as i32;
            offset[len as usize] += 1;
        }
    }
    let mut table_bits = root_bits;
    let mut table_size = 1usize << table_bits;
    let mut total_size = table_size;
    if offset[15] == 1 {
        for key in 0..total_size {
            group[table_offset + key] = sorted[0];
        }
        return total_size;
    }
    let mut key = 0usize;
    let mut symbol = 0usize;
    let mut step = 2usize;
    for len in 1..=(root_bits as usize) {
        while count[len] > 0 {
            replicate_value(
                group,
                table_offset + key,
                step,
                table_size,
                ((len as i32) << 16) | sorted[symbol],
            );
            symbol += 1;
            key = get_next_key(key, len);
            count[len] -= 1;
        }
        step <<= 1;
    }
    let mask = total_size - 1;
    let mut low = usize::MAX;
    let mut current_offset = table_offset;
    let mut step = 2usize;
    for len in (root_bits as usize + 1)..=15 {
        while count[len] > 0 {
            if (key & mask) != low {
                current_offset += table_size;
                table_bits = next_table_bit_size(&count, len as u32, root_bits);
                table_size = 1 << table_bits;
                total_size += table_size;
                low = key & mask;
                group[table_offset + low] = (((table_bits + root_bits) as i32) << 16)
                    | ((current_offset - table_offset - low) as i32);
            }
            replicate_value(
                group,
                current_offset + (key >> root_bits),
                step,
                table_size,
                (((len as u32 - root_bits) as i32) << 16) | sorted[symbol],
            );
            symbol += 1;
            key = get_next_key(key, len);
            count[len] -= 1;
        }
        step <<= 1;
    }
    total_size
}

/// Decode one symbol. The accumulator must hold at least 15 valid bits.
#[inline]
pub fn read_symbol<R: Read>(group: &[i32], table_idx: usize, br: &mut BitReader<R>) -> u32 {
    let mut offset = group[table_idx] as usize;
    let val = br.peek_bits();
    offset += (val & 0xff) as usize;
    let bits = (group[offset] >> 16) as u32;
    let sym = (group[offset] & 0xffff) as u32;
    if bits <= 8 {
        br.skip_bits(bits);
        return sym;
    }
    offset += sym as usize;
    let mask = (1u32 << bits) - 1;
    offset += ((val & mask) >> 8) as usize;
    br.skip_bits(((group[offset] >> 16) as u32) + 8);
    (group[offset] & 0xffff) as u32
}

fn check_dupes(symbols: &[usize; 4], length: usize) -> Result<()> {
    for i in 0..length.saturating_sub(1) {
        for j in (i + 1)..length {
            if symbols[i] == symbols[j] {
                return Err(Error::corrupted("duplicate simple huffman symbol"));
            }
        }
    }
    Ok(())
}

/// Decode the run-length-coded lengths of a complex code.
fn read_huffman_code_lengths<R: Read>(
    cl_code_lengths: &[i32; 18],
    num_symbols: usize,
    code_lengths: &mut [i32],
    br: &mut BitReader<R>,
) -> Result<()> {
    let mut symbol = 0usize;
    let mut prev_code_len: i32 = 8;
    let mut repeat: i32 = 0;
    let mut repeat_code_len: i32 = 0;
    let mut space: i32 = 32768;
    let mut table = [0i32; 33];
    let table_idx = 32;
    build_huffman_table(&mut table, table_idx, 5, cl_code_lengths);
    while symbol < num_symbols && space > 0 {
        br.ensure_input()?;
        br.fill();
        let p = (br.peek_bits() & 31) as usize;
        br.skip_bits((table[p] >> 16) as u32);
        let code_len = table[p] & 0xffff;
        if code_len < 16 {
            repeat = 0;
            code_lengths[symbol] = code_len;
            symbol += 1;
            if code_len != 0 {
                prev_code_len = code_len;
                space -= 32768 >> code_len;
            }
        } else {
            let extra_bits = code_len - 14;
            let new_len = if code_len == 16 { prev_code_len } else { 0 };
            if repeat_code_len != new_len {
                repeat = 0;
                repeat_code_len = new_len;
            }
            let old_repeat = repeat;
            if repeat > 0 {
                repeat -= 2;
                repeat <<= extra_bits;
            }
            br.fill();
            repeat += br.read_few_bits(extra_bits as u32) as i32 + 3;
            let repeat_delta = (repeat - old_repeat) as usize;
            if symbol + repeat_delta > num_symbols {
                return Err(Error::corrupted("code length repeat overflow"));
            }
            for _ in 0..repeat_delta {
                code_lengths[symbol] = repeat_code_len;
                symbol += 1;
            }
            if repeat_code_len != 0 {
                space -= (repeat_delta as i32) << (15 - repeat_code_len);
            }
        }
    }
    if space != 0 {
        return Err(Error::corrupted("unused huffman code space"));
    }
    for len in code_lengths[symbol..num_symbols].iter_mut() {
        *len = 0;
    }
    Ok(())
}

/// Decode a simple (1-4 symbol) code specification and build its table.
fn read_simple_huffman_code<R: Read>(
    alphabet_size_max: usize,
    alphabet_size_limit: usize,
    group: &mut [i32],
    table_idx: usize,
    br: &mut BitReader<R>,
) -> Result<usize> {
    let mut code_lengths = vec![0i32; alphabet_size_limit];
    let mut symbols = [0usize; 4];
    let max_bits = (1 + log2floor(alphabet_size_max as i32 - 1)) as u32;
    let num_symbols = br.read_few_bits(2) as usize + 1;
    for slot in symbols.iter_mut().take(num_symbols) {
        br.fill();
        let symbol = br.read_few_bits(max_bits) as usize;
        if symbol >= alphabet_size_limit {
            return Err(Error::corrupted("simple huffman symbol out of range"));
        }
        *slot = symbol;
    }
    check_dupes(&symbols, num_symbols)?;
    let mut histogram_id = num_symbols;
    if num_symbols == 4 {
        histogram_id += br.read_few_bits(1) as usize;
    }
    match histogram_id {
        1 => {
            code_lengths[symbols[0]] = 1;
        }
        2 => {
            code_lengths[symbols[0]] = 1;
            code_lengths[symbols[1]] = 1;
        }
        3 => {
            code_lengths[symbols[0]] = 1;
            code_lengths[symbols[1]] = 2;
            code_lengths[symbols[2]] = 2;
        }
        4 => {
            code_lengths[symbols[0]] = 2;
            code_lengths[symbols[1]] = 2;
            code_lengths[symbols[2]] = 2;
            code_lengths[symbols[3]] = 2;
        }
        5 => {
            code_lengths[symbols[0]] = 1;
            code_lengths[symbols[1]] = 2;
            code_lengths[symbols[2]] = 3;
            code_lengths[symbols[3]] = 3;
        }
        _ => {}
    }
    Ok(build_huffman_table(group, table_idx, 8, &code_lengths))
}

/// Decode a complex (run-length coded) code specification and build its table.
fn read_complex_huffman_code<R: Read>(
    alphabet_size_limit: usize,
    skip: u32,
    group: &mut [i32],
    table_idx: usize,
    br: &mut BitReader<R>,
) -> Result<usize> {
    let mut code_lengths = vec![0i32; alphabet_size_limit];
    let mut cl_code_lengths = [0i32; 18];
    let mut space: i32 = 32;
    let mut num_codes = 0;
    let mut i = skip as usize;
    while i < 18 && space > 0 {
        let code_len_idx = CODE_LENGTH_CODE_ORDER[i];
        br.fill();
        let p = (br.peek_bits() & 15) as usize;
        br.skip_bits((CL_FIXED_TABLE[p] >> 16) as u32);
        let v = CL_FIXED_TABLE[p] & 0xffff;
        cl_code_lengths[code_len_idx] = v;
        if v != 0 {
            space -= 32 >> v;
            num_codes += 1;
        }
        i += 1;
    }
    if space != 0 && num_codes != 1 {
        return Err(Error::corrupted("corrupted huffman histogram"));
    }
    read_huffman_code_lengths(&cl_code_lengths, alphabet_size_limit, &mut code_lengths, br)?;
    Ok(build_huffman_table(group, table_idx, 8, &code_lengths))
}

/// Decode a code specification and build the table. Returns the slot count.
pub fn read_huffman_code<R: Read>(
    alphabet_size_max: usize,
    alphabet_size_limit: usize,
    group: &mut [i32],
    table_idx: usize,
    br: &mut BitReader<R>,
) -> Result<usize> {
    br.ensure_input()?;
    br.fill();
    let simple_code_or_skip = br.read_few_bits(2);
    if simple_code_or_skip == 1 {
        read_simple_huffman_code(alphabet_size_max, alphabet_size_limit, group, table_idx, br)
    } else {
        read_complex_huffman_code(alphabet_size_limit, simple_code_or_skip, group, table_idx, br)
    }
}

// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::BitSink;

    /// Canonical key walk matching the table builder, for encoding symbols
    /// back into a bit stream.
    fn canonical_keys(code_lengths: &[i32]) -> Vec<(usize, usize)> {
        let mut by_len: Vec<(usize, usize)> = code_lengths
            .iter()
            .enumerate()
            .filter(|(_, &len)| len != 0)
            .map(|(sym, &len)| (len as usize, sym))
            .collect();
        by_len.sort();
        let mut keys = Vec::new();
        let mut key = 0usize;
        for &(len, sym) in &by_len {
            keys.push((sym, key));
            key = get_next_key(key, len);
        }
        keys
    }

    fn decode_all(code_lengths: &[i32], root_bits: u32) -> Vec<u32> {
        let keys = canonical_keys(code_lengths);
        let mut sink = BitSink::new();
        for &(sym, key) in &keys {
            sink.push(key as u32, code_lengths[sym] as u32);
        }
        let mut data = sink.finish();
        data.extend_from_slice(&[0u8; 8]);
        let mut group = vec![0i32; 1 + 2048];
        group[0] = 1;
        build_huffman_table(&mut group, 0, root_bits, code_lengths);
        let mut br = BitReader::new(&data[..]).unwrap();
        let mut decoded = Vec::new();
        for _ in 0..keys.len() {
            br.fill();
            decoded.push(read_symbol(&group, 0, &mut br));
        }
        decoded
    }

    #[test]
    fn test_table_inverts_short_codes() {
        // Complete code over 8 symbols, all within the root table.
        let lengths = [2, 2, 2, 3, 4, 4, 0, 0];
        let decoded = decode_all(&lengths, 8);
        let expected: Vec<u32> = canonical_keys(&lengths)
            .iter()
            .map(|&(sym, _)| sym as u32)
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_table_inverts_two_level_codes() {
        // Lengths 9 and 10 force second-level sub-tables behind an 8-bit root.
        let lengths = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 10];
        let decoded = decode_all(&lengths, 8);
        let expected: Vec<u32> = canonical_keys(&lengths)
            .iter()
            .map(|&(sym, _)| sym as u32)
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_degenerate_single_symbol_costs_no_bits() {
        let mut lengths = vec![0i32; 16];
        lengths[11] = 1;
        let mut group = vec![0i32; 1 + 256];
        group[0] = 1;
        build_huffman_table(&mut group, 0, 8, &lengths);
        let data = [0u8; 8];
        let mut br = BitReader::new(&data[..]).unwrap();
        for _ in 0..100 {
            br.fill();
            assert_eq!(read_symbol(&group, 0, &mut br), 11);
        }
    }

    #[test]
    fn test_simple_code_two_symbols() {
        // Selector 1, two symbols (0x41, 0x42), then the coded symbols 0 1 1 0.
        let mut sink = BitSink::new();
        sink.push(1, 2); // simple code
        sink.push(1, 2); // two symbols
        sink.push(0x41, 8);
        sink.push(0x42, 8);
        sink.push(0b0110, 4);
        let mut data = sink.finish();
        data.extend_from_slice(&[0u8; 8]);
        let mut br = BitReader::new(&data[..]).unwrap();
        let mut group = vec![0i32; 1 + 256];
        group[0] = 1;
        read_huffman_code(256, 256, &mut group, 0, &mut br).unwrap();
        let mut out = Vec::new();
        for _ in 0..4 {
            br.fill();
            out.push(read_symbol(&group, 0, &mut br));
        }
        assert_eq!(out, vec![0x41, 0x42, 0x42, 0x41]);
    }

    #[test]
    fn test_simple_code_rejects_duplicate_symbols() {
        let mut sink = BitSink::new();
        sink.push(1, 2);
        sink.push(1, 2);
        sink.push(0x41, 8);
        sink.push(0x41, 8);
        let mut data = sink.finish();
        data.extend_from_slice(&[0u8; 8]);
        let mut br = BitReader::new(&data[..]).unwrap();
        let mut group = vec![0i32; 1 + 256];
        group[0] = 1;
        let err = read_huffman_code(256, 256, &mut group, 0, &mut br).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_code_length_repeat_overflow() {
        // Code-length code: symbol 0 and 17 both one bit. A zero-run of 10
        // overruns an 8-symbol alphabet.
        let mut cl = [0i32; 18];
        cl[0] = 1;
        cl[17] = 1;
        let mut sink = BitSink::new();
        sink.push(1, 1); // code 17
        sink.push(7, 3); // run length 3 + 7 = 10
        let mut data = sink.finish();
        data.extend_from_slice(&[0u8; 8]);
        let mut br = BitReader::new(&data[..]).unwrap();
        let mut lengths = [0i32; 8];
        let err = read_huffman_code_lengths(&cl, 8, &mut lengths, &mut br).unwrap_err();
        assert!(err.to_string().contains("repeat overflow"));
    }

    #[test]
    fn test_incomplete_code_rejected() {
        // Four symbols of length 8 leave most of the code space unused.
        let mut cl = [0i32; 18];
        cl[0] = 1;
        cl[8] = 1;
        let mut sink = BitSink::new();
        for _ in 0..4 {
            sink.push(1, 1); // code 8
        }
        let mut data = sink.finish();
        data.extend_from_slice(&[0u8; 8]);
        let mut br = BitReader::new(&data[..]).unwrap();
        let mut lengths = [0i32; 4];
        let err = read_huffman_code_lengths(&cl, 4, &mut lengths, &mut br).unwrap_err();
        assert!(err.to_string().contains("unused huffman code space"));
    }

    #[test]
    fn test_log2floor() {
        assert_eq!(log2floor(1), 0);
        assert_eq!(log2floor(2), 1);
        assert_eq!(log2floor(3), 1);
        assert_eq!(log2floor(4), 2);
        assert_eq!(log2floor(255), 7);
        assert_eq!(log2floor(256), 8);
        assert_eq!(log2floor(0x7fffffff), 30);
    }
}
