//! Streaming Brotli decoder.
//!
//! The decoder is a resumable state machine driven by [`BrotliDecoder::decompress`].
//! Output is produced through a sliding ring buffer sized from the stream's
//! window declaration; whenever the ring or the caller's buffer fills, the
//! machine suspends in a write state and resumes exactly where it left off on
//! the next call.

use std::io::Read;
use std::sync::Arc;

use haagenti_core::{Error, Result};

use crate::bitreader::BitReader;
use crate::commands::CMD_LOOKUP;
use crate::compound::{CompoundCopy, CompoundDictionary};
use crate::context::CONTEXT_LOOKUP;
use crate::dictionary::StaticDictionary;
use crate::huffman;
use crate::transform::{transform_dictionary_word, RFC_TRANSFORMS};

const DISTANCE_SHORT_CODE_INDEX_OFFSET: [i32; 16] =
    [0, 3, 2, 1, 0, 0, 0, 0, 0, 0, 3, 3, 3, 3, 3, 3];

const DISTANCE_SHORT_CODE_VALUE_OFFSET: [i32; 16] =
    [0, 0, 0, 0, -1, 1, -2, 2, -3, 3, -1, 1, -2, 2, -3, 3];

const BLOCK_LENGTH_OFFSET: [i32; 26] = [
    1, 5, 9, 13, 17, 25, 33, 41, 49, 65, 81, 97, 113, 145, 177, 209, 241, 305, 369, 497, 753,
    1265, 2289, 4337, 8433, 16625,
];

const BLOCK_LENGTH_N_BITS: [u32; 26] = [
    2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 6, 6, 7, 8, 9, 10, 11, 12, 13, 24,
];

/// Hard cap on any backward distance, including large-window streams.
const MAX_ALLOWED_DISTANCE: i64 = 0x7ffffffc;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RunState {
    Initialized,
    BlockStart,
    CompressedBlockStart,
    MainLoop,
    ReadMetadata,
    CopyUncompressed,
    InsertLoop,
    CopyLoop,
    UseDictionary,
    CopyFromCompoundDictionary,
    InitWrite,
    Write,
    Finished,
}

impl RunState {
    fn name(self) -> &'static str {
        match self {
            RunState::Initialized => "initialized",
            RunState::BlockStart => "block start",
            RunState::CompressedBlockStart => "compressed block start",
            RunState::MainLoop => "main loop",
            RunState::ReadMetadata => "read metadata",
            RunState::CopyUncompressed => "copy uncompressed",
            RunState::InsertLoop => "insert loop",
            RunState::CopyLoop => "copy loop",
            RunState::UseDictionary => "use dictionary",
            RunState::CopyFromCompoundDictionary => "compound dictionary copy",
            RunState::InitWrite => "init write",
            RunState::Write => "write",
            RunState::Finished => "finished",
        }
    }
}

/// Decoder configuration.
#[derive(Clone, Default)]
pub struct BrotliDecoderOptions {
    /// Accept the large-window extension (window bits 10 to 30).
    pub large_window: bool,
    /// Buffer no more internally than one output call can drain.
    pub eager_output: bool,
    /// Static dictionary for backward references past the window.
    pub static_dictionary: Option<Arc<StaticDictionary>>,
}

/// Streaming Brotli decoder over any byte source.
pub struct BrotliDecoder<R> {
    br: BitReader<R>,
    state: RunState,
    next_state: RunState,

    is_large_window: bool,
    is_eager: bool,
    max_ring_buffer_size: i32,
    max_backward_distance: i32,

    meta_block_length: i32,
    input_end: bool,
    is_uncompressed: bool,
    is_metadata: bool,

    num_literal_block_types: i32,
    num_command_block_types: i32,
    num_distance_block_types: i32,
    literal_block_length: i32,
    command_block_length: i32,
    distance_block_length: i32,
    /// Block-type and block-length tables for the three categories, plus
    /// per-category table offsets in the first six slots.
    block_trees: Vec<i32>,

    context_modes: Vec<u8>,
    context_map: Vec<u8>,
    dist_context_map: Vec<u8>,
    trivial_literal_context: bool,
    context_map_slice: i32,
    dist_context_map_slice: i32,
    context_lookup_offset1: usize,
    context_lookup_offset2: usize,
    literal_tree_idx: usize,
    command_tree_idx: usize,
    literal_tree_group: Vec<i32>,
    command_tree_group: Vec<i32>,
    distance_tree_group: Vec<i32>,

    distance_postfix_bits: i32,
    num_direct_distance_codes: i32,
    dist_extra_bits: Vec<u8>,
    dist_offset: Vec<i32>,
    /// Slots 0..4 hold recent distances, 4..10 the block-type rings.
    rings: [i32; 10],
    dist_rb_idx: usize,
    distance: i32,
    distance_code: i32,
    max_distance: i32,

    insert_length: i32,
    copy_length: i32,
    j: i32,

    ring_buffer: Vec<u8>,
    ring_buffer_size: i32,
    expected_total_size: i32,
    pos: i32,
    ring_buffer_bytes_ready: i32,
    ring_buffer_bytes_written: i32,

    dictionary: Option<Arc<StaticDictionary>>,
    compound: CompoundDictionary,
    cd_copy: CompoundCopy,
}

impl<R: Read> BrotliDecoder<R> {
    /// Create a decoder with default options.
    pub fn new(src: R) -> Result<Self> {
        Self::with_options(src, BrotliDecoderOptions::default())
    }

    /// Create a decoder with explicit options.
    pub fn with_options(src: R, options: BrotliDecoderOptions) -> Result<Self> {
        let dist_alphabet_limit = calculate_distance_alphabet_limit(MAX_ALLOWED_DISTANCE, 3, 15 << 3)?;
        let mut block_trees = vec![0i32; 3091];
        block_trees[0] = 7;
        Ok(BrotliDecoder {
            br: BitReader::new(src)?,
            state: RunState::Initialized,
            next_state: RunState::Initialized,
            is_large_window: options.large_window,
            is_eager: options.eager_output,
            max_ring_buffer_size: 0,
            max_backward_distance: 0,
            meta_block_length: 0,
            input_end: false,
            is_uncompressed: false,
            is_metadata: false,
            num_literal_block_types: 0,
            num_command_block_types: 0,
            num_distance_block_types: 0,
            literal_block_length: 0,
            command_block_length: 0,
            distance_block_length: 0,
            block_trees,
            context_modes: Vec::new(),
            context_map: Vec::new(),
            dist_context_map: Vec::new(),
            trivial_literal_context: false,
            context_map_slice: 0,
            dist_context_map_slice: 0,
            context_lookup_offset1: 0,
            context_lookup_offset2: 0,
            literal_tree_idx: 0,
            command_tree_idx: 0,
            literal_tree_group: Vec::new(),
            command_tree_group: Vec::new(),
            distance_tree_group: Vec::new(),
            distance_postfix_bits: 0,
            num_direct_distance_codes: 0,
            dist_extra_bits: vec![0u8; dist_alphabet_limit as usize],
            dist_offset: vec![0i32; dist_alphabet_limit as usize],
            rings: [16, 15, 11, 4, 0, 0, 0, 0, 0, 0],
            dist_rb_idx: 3,
            distance: 0,
            distance_code: 0,
            max_distance: 0,
            insert_length: 0,
            copy_length: 0,
            j: 0,
            ring_buffer: Vec::new(),
            ring_buffer_size: 0,
            expected_total_size: 0,
            pos: 0,
            ring_buffer_bytes_ready: 0,
            ring_buffer_bytes_written: 0,
            dictionary: options.static_dictionary,
            compound: CompoundDictionary::new(),
            cd_copy: CompoundCopy::default(),
        })
    }

    /// Attach one compound dictionary chunk. Only allowed before the first
    /// call to [`decompress`](Self::decompress).
    pub fn attach_dictionary_chunk(&mut self, chunk: Vec<u8>) -> Result<()> {
        if self.state != RunState::Initialized {
            return Err(Error::invalid_state("initialized", self.state.name()));
        }
        self.compound.attach_chunk(chunk)
    }

    /// True once the final meta-block has been fully written out.
    pub fn is_finished(&self) -> bool {
        self.state == RunState::Finished
    }

    /// Decode into `output`. Returns the number of bytes written; zero means
    /// the stream is finished (or `output` is empty).
    pub fn decompress(&mut self, output: &mut [u8]) -> Result<usize> {
        if self.state == RunState::Initialized {
            let window_bits = self.decode_window_bits();
            if window_bits < 0 {
                return Err(Error::corrupted("invalid window bits"));
            }
            self.max_ring_buffer_size = 1 << window_bits;
            self.max_backward_distance = self.max_ring_buffer_size - 16;
            self.state = RunState::BlockStart;
        }
        let mut output_used = 0usize;
        self.run(output, &mut output_used)?;
        Ok(output_used)
    }

    fn run(&mut self, output: &mut [u8], output_used: &mut usize) -> Result<()> {
        let mut fence = self.calculate_fence(output, *output_used);
        while self.state != RunState::Finished {
            match self.state {
                RunState::Initialized | RunState::Finished => {
                    return Err(Error::invalid_state("running", self.state.name()));
                }
                RunState::BlockStart => {
                    if self.meta_block_length < 0 {
                        return Err(Error::corrupted("invalid metablock length"));
                    }
                    self.read_next_metablock_header()?;
                    fence = self.calculate_fence(output, *output_used);
                }
                RunState::CompressedBlockStart => {
                    self.read_metablock_huffman_codes_and_context_maps()?;
                    self.state = RunState::MainLoop;
                }
                RunState::MainLoop => {
                    if self.meta_block_length <= 0 {
                        self.state = RunState::BlockStart;
                        continue;
                    }
                    self.br.ensure_input()?;
                    if self.command_block_length == 0 {
                        self.decode_command_block_switch()?;
                    }
                    self.command_block_length -= 1;
                    self.br.fill();
                    let sym =
                        huffman::read_symbol(&self.command_tree_group, self.command_tree_idx, &mut self.br);
                    let cmd = CMD_LOOKUP[sym as usize];
                    self.distance_code = cmd.distance_context as i32;
                    self.br.fill();
                    let n = cmd.insert_bits as u32;
                    let extra = if n <= 16 {
                        self.br.read_few_bits(n)
                    } else {
                        self.br.read_many_bits(n)
                    };
                    self.insert_length = cmd.insert_offset + extra as i32;
                    self.br.fill();
                    let n = cmd.copy_bits as u32;
                    let extra = if n <= 16 {
                        self.br.read_few_bits(n)
                    } else {
                        self.br.read_many_bits(n)
                    };
                    self.copy_length = cmd.copy_offset + extra as i32;
                    self.j = 0;
                    self.state = RunState::InsertLoop;
                }
                RunState::InsertLoop => {
                    let mask = self.ring_buffer_size - 1;
                    if self.trivial_literal_context {
                        while self.j < self.insert_length {
                            self.br.ensure_input()?;
                            if self.literal_block_length == 0 {
                                self.decode_literal_block_switch()?;
                            }
                            self.literal_block_length -= 1;
                            self.br.fill();
                            self.ring_buffer[self.pos as usize] = huffman::read_symbol(
                                &self.literal_tree_group,
                                self.literal_tree_idx,
                                &mut self.br,
                            ) as u8;
                            self.pos += 1;
                            self.j += 1;
                            if self.pos >= fence {
                                self.next_state = RunState::InsertLoop;
                                self.state = RunState::InitWrite;
                                break;
                            }
                        }
                    } else {
                        let mut prev1 = self.ring_buffer[((self.pos - 1) & mask) as usize] as usize;
                        let mut prev2 = self.ring_buffer[((self.pos - 2) & mask) as usize] as usize;
                        while self.j < self.insert_length {
                            self.br.ensure_input()?;
                            if self.literal_block_length == 0 {
                                self.decode_literal_block_switch()?;
                            }
                            let literal_context = CONTEXT_LOOKUP[self.context_lookup_offset1 + prev1]
                                | CONTEXT_LOOKUP[self.context_lookup_offset2 + prev2];
                            let tree_idx = self.context_map
                                [self.context_map_slice as usize + literal_context as usize]
                                as usize;
                            self.literal_block_length -= 1;
                            prev2 = prev1;
                            self.br.fill();
                            prev1 = huffman::read_symbol(&self.literal_tree_group, tree_idx, &mut self.br)
                                as usize;
                            self.ring_buffer[self.pos as usize] = prev1 as u8;
                            self.pos += 1;
                            self.j += 1;
                            if self.pos >= fence {
                                self.next_state = RunState::InsertLoop;
                                self.state = RunState::InitWrite;
                                break;
                            }
                        }
                    }
                    if self.state != RunState::InsertLoop {
                        continue;
                    }
                    self.meta_block_length -= self.insert_length;
                    if self.meta_block_length <= 0 {
                        self.state = RunState::MainLoop;
                        continue;
                    }
                    let mut distance_code = self.distance_code;
                    if distance_code < 0 {
                        self.distance = self.rings[self.dist_rb_idx];
                    } else {
                        self.br.ensure_input()?;
                        if self.distance_block_length == 0 {
                            self.decode_distance_block_switch()?;
                        }
                        self.distance_block_length -= 1;
                        self.br.fill();
                        let dist_tree_idx = self.dist_context_map
                            [(self.dist_context_map_slice + distance_code) as usize]
                            as usize;
                        distance_code =
                            huffman::read_symbol(&self.distance_tree_group, dist_tree_idx, &mut self.br)
                                as i32;
                        if distance_code < 16 {
                            let index = ((self.dist_rb_idx as i32
                                + DISTANCE_SHORT_CODE_INDEX_OFFSET[distance_code as usize])
                                & 0x3) as usize;
                            self.distance = self.rings[index]
                                + DISTANCE_SHORT_CODE_VALUE_OFFSET[distance_code as usize];
                            if self.distance < 0 {
                                return Err(Error::corrupted("negative distance"));
                            }
                        } else {
                            let extra = self.dist_extra_bits[distance_code as usize] as u32;
                            self.br.fill();
                            let bits = if extra <= 16 {
                                self.br.read_few_bits(extra)
                            } else {
                                self.br.read_many_bits(extra)
                            };
                            let distance = self.dist_offset[distance_code as usize] as i64
                                + ((bits as i64) << self.distance_postfix_bits);
                            if distance > MAX_ALLOWED_DISTANCE {
                                return Err(Error::corrupted("invalid backward reference"));
                            }
                            self.distance = distance as i32;
                        }
                    }
                    if self.max_distance != self.max_backward_distance
                        && self.pos < self.max_backward_distance
                    {
                        self.max_distance = self.pos;
                    } else {
                        self.max_distance = self.max_backward_distance;
                    }
                    if self.distance > self.max_distance {
                        self.state = RunState::UseDictionary;
                        continue;
                    }
                    if distance_code > 0 {
                        self.dist_rb_idx = (self.dist_rb_idx + 1) & 0x3;
                        self.rings[self.dist_rb_idx] = self.distance;
                    }
                    if self.copy_length > self.meta_block_length {
                        return Err(Error::corrupted("invalid backward reference"));
                    }
                    self.j = 0;
                    self.state = RunState::CopyLoop;
                }
                RunState::CopyLoop => {
                    let mask = self.ring_buffer_size - 1;
                    let src = (self.pos - self.distance) & mask;
                    let dst = self.pos;
                    let copy_length = self.copy_length - self.j;
                    let src_end = src + copy_length;
                    let dst_end = dst + copy_length;
                    if src_end < mask && dst_end < mask {
                        if copy_length < 12 || (src_end > dst && dst_end > src) {
                            // Overlapping or tiny runs advance bytewise so
                            // repeating patterns reproduce correctly.
                            let mut s = src as usize;
                            let mut d = dst as usize;
                            for _ in 0..copy_length {
                                self.ring_buffer[d] = self.ring_buffer[s];
                                d += 1;
                                s += 1;
                            }
                        } else {
                            self.ring_buffer
                                .copy_within(src as usize..src_end as usize, dst as usize);
                        }
                        self.j += copy_length;
                        self.meta_block_length -= copy_length;
                        self.pos += copy_length;
                    } else {
                        while self.j < self.copy_length {
                            self.ring_buffer[self.pos as usize] =
                                self.ring_buffer[((self.pos - self.distance) & mask) as usize];
                            self.meta_block_length -= 1;
                            self.pos += 1;
                            self.j += 1;
                            if self.pos >= fence {
                                self.next_state = RunState::CopyLoop;
                                self.state = RunState::InitWrite;
                                break;
                            }
                        }
                    }
                    if self.state == RunState::CopyLoop {
                        self.state = RunState::MainLoop;
                    }
                }
                RunState::UseDictionary => {
                    self.do_use_dictionary(fence)?;
                }
                RunState::CopyFromCompoundDictionary => {
                    let copied = self.compound.copy_into(
                        &mut self.ring_buffer,
                        self.pos as usize,
                        fence as usize,
                        &mut self.cd_copy,
                    );
                    self.pos += copied as i32;
                    if self.cd_copy.remaining > 0 {
                        self.next_state = RunState::CopyFromCompoundDictionary;
                        self.state = RunState::InitWrite;
                    } else {
                        self.state = RunState::MainLoop;
                    }
                }
                RunState::ReadMetadata => {
                    while self.meta_block_length > 0 {
                        self.br.ensure_input()?;
                        self.br.fill();
                        self.br.read_few_bits(8);
                        self.meta_block_length -= 1;
                    }
                    self.state = RunState::BlockStart;
                }
                RunState::CopyUncompressed => {
                    self.copy_uncompressed_data()?;
                }
                RunState::InitWrite => {
                    self.ring_buffer_bytes_ready = self.pos.min(self.ring_buffer_size);
                    self.state = RunState::Write;
                }
                RunState::Write => {
                    if !self.write_ring_buffer(output, output_used) {
                        return Ok(());
                    }
                    if self.pos >= self.max_backward_distance {
                        self.max_distance = self.max_backward_distance;
                    }
                    if self.pos >= self.ring_buffer_size {
                        if self.pos > self.ring_buffer_size {
                            self.ring_buffer.copy_within(
                                self.ring_buffer_size as usize..self.pos as usize,
                                0,
                            );
                        }
                        self.pos &= self.ring_buffer_size - 1;
                        self.ring_buffer_bytes_written = 0;
                    }
                    self.state = self.next_state;
                }
            }
        }
        if self.meta_block_length < 0 {
            return Err(Error::corrupted("invalid metablock length"));
        }
        self.br.jump_to_byte_boundary()?;
        self.br.check_health(true)
    }

    fn decode_window_bits(&mut self) -> i32 {
        let large_window_enabled = self.is_large_window;
        self.is_large_window = false;
        self.br.fill();
        if self.br.read_few_bits(1) == 0 {
            return 16;
        }
        let n = self.br.read_few_bits(3) as i32;
        if n != 0 {
            return 17 + n;
        }
        let n = self.br.read_few_bits(3) as i32;
        if n != 0 {
            if n == 1 {
                if !large_window_enabled {
                    return -1;
                }
                self.is_large_window = true;
                if self.br.read_few_bits(1) == 1 {
                    return -1;
                }
                let n = self.br.read_few_bits(6) as i32;
                if !(10..=30).contains(&n) {
                    return -1;
                }
                return n;
            }
            return 8 + n;
        }
        17
    }

    fn decode_var_len_unsigned_byte(&mut self) -> u32 {
        self.br.fill();
        if self.br.read_few_bits(1) != 0 {
            let n = self.br.read_few_bits(3);
            if n == 0 {
                return 1;
            }
            return self.br.read_few_bits(n) + (1 << n);
        }
        0
    }

    fn decode_meta_block_length(&mut self) -> Result<()> {
        self.br.fill();
        self.input_end = self.br.read_few_bits(1) != 0;
        self.meta_block_length = 0;
        self.is_uncompressed = false;
        self.is_metadata = false;
        if self.input_end && self.br.read_few_bits(1) != 0 {
            return Ok(());
        }
        let size_nibbles = self.br.read_few_bits(2) + 4;
        if size_nibbles == 7 {
            self.is_metadata = true;
            if self.br.read_few_bits(1) != 0 {
                return Err(Error::corrupted("corrupted reserved bit"));
            }
            let size_bytes = self.br.read_few_bits(2);
            for i in 0..size_bytes {
                self.br.fill();
                let bits = self.br.read_few_bits(8);
                if bits == 0 && i + 1 == size_bytes && size_bytes > 1 {
                    return Err(Error::corrupted("exuberant nibble"));
                }
                self.meta_block_length |= (bits as i32) << (i * 8);
            }
            if size_bytes == 0 {
                return Ok(());
            }
        } else {
            for i in 0..size_nibbles {
                self.br.fill();
                let bits = self.br.read_few_bits(4);
                if bits == 0 && i + 1 == size_nibbles && size_nibbles > 4 {
                    return Err(Error::corrupted("exuberant nibble"));
                }
                self.meta_block_length |= (bits as i32) << (i * 4);
            }
        }
        self.meta_block_length += 1;
        if !self.input_end {
            self.is_uncompressed = self.br.read_few_bits(1) != 0;
        }
        Ok(())
    }

    fn read_block_length(&mut self, table_idx: usize) -> Result<i32> {
        self.br.fill();
        let code = huffman::read_symbol(&self.block_trees, table_idx, &mut self.br) as usize;
        let n = BLOCK_LENGTH_N_BITS[code];
        self.br.fill();
        let extra = if n <= 16 {
            self.br.read_few_bits(n)
        } else {
            self.br.read_many_bits(n)
        };
        Ok(BLOCK_LENGTH_OFFSET[code] + extra as i32)
    }

    fn decode_block_type_and_length(&mut self, tree_type: usize, num_block_types: i32) -> Result<i32> {
        let offset = 4 + tree_type * 2;
        self.br.fill();
        let mut block_type =
            huffman::read_symbol(&self.block_trees, 2 * tree_type, &mut self.br) as i32;
        let result = self.read_block_length(2 * tree_type + 1)?;
        if block_type == 1 {
            block_type = self.rings[offset + 1] + 1;
        } else if block_type == 0 {
            block_type = self.rings[offset];
        } else {
            block_type -= 2;
        }
        if block_type >= num_block_types {
            block_type -= num_block_types;
        }
        self.rings[offset] = self.rings[offset + 1];
        self.rings[offset + 1] = block_type;
        Ok(result)
    }

    fn decode_literal_block_switch(&mut self) -> Result<()> {
        self.literal_block_length = self.decode_block_type_and_length(0, self.num_literal_block_types)?;
        let literal_block_type = self.rings[5];
        self.context_map_slice = literal_block_type << 6;
        self.literal_tree_idx = self.context_map[self.context_map_slice as usize] as usize;
        let context_mode = self.context_modes[literal_block_type as usize] as usize;
        self.context_lookup_offset1 = context_mode << 9;
        self.context_lookup_offset2 = self.context_lookup_offset1 + 256;
        Ok(())
    }

    fn decode_command_block_switch(&mut self) -> Result<()> {
        self.command_block_length = self.decode_block_type_and_length(1, self.num_command_block_types)?;
        self.command_tree_idx = self.rings[7] as usize;
        Ok(())
    }

    fn decode_distance_block_switch(&mut self) -> Result<()> {
        self.distance_block_length =
            self.decode_block_type_and_length(2, self.num_distance_block_types)?;
        self.dist_context_map_slice = self.rings[9] << 2;
        Ok(())
    }

    fn maybe_reallocate_ring_buffer(&mut self) {
        let mut new_size = self.max_ring_buffer_size;
        if new_size > self.expected_total_size {
            let minimal_new_size = self.expected_total_size;
            while new_size >> 1 > minimal_new_size {
                new_size >>= 1;
            }
            if !self.input_end && new_size < 16384 && self.max_ring_buffer_size >= 16384 {
                new_size = 16384;
            }
        }
        if new_size <= self.ring_buffer_size {
            return;
        }
        let mut new_buffer = vec![0u8; (new_size + 37) as usize];
        if !self.ring_buffer.is_empty() {
            new_buffer[..self.ring_buffer_size as usize]
                .copy_from_slice(&self.ring_buffer[..self.ring_buffer_size as usize]);
        }
        self.ring_buffer = new_buffer;
        self.ring_buffer_size = new_size;
    }

    fn read_next_metablock_header(&mut self) -> Result<()> {
        if self.input_end {
            self.next_state = RunState::Finished;
            self.state = RunState::InitWrite;
            return Ok(());
        }
        self.literal_tree_group = Vec::new();
        self.command_tree_group = Vec::new();
        self.distance_tree_group = Vec::new();
        self.br.ensure_input()?;
        self.decode_meta_block_length()?;
        if self.meta_block_length == 0 && !self.is_metadata {
            return Ok(());
        }
        if self.is_uncompressed || self.is_metadata {
            self.br.jump_to_byte_boundary()?;
            self.state = if self.is_metadata {
                RunState::ReadMetadata
            } else {
                RunState::CopyUncompressed
            };
        } else {
            self.state = RunState::CompressedBlockStart;
        }
        if self.is_metadata {
            return Ok(());
        }
        self.expected_total_size += self.meta_block_length;
        if self.expected_total_size > 1 << 30 {
            self.expected_total_size = 1 << 30;
        }
        if self.ring_buffer_size < self.max_ring_buffer_size {
            self.maybe_reallocate_ring_buffer();
        }
        Ok(())
    }

    fn read_metablock_partition(&mut self, tree_type: usize, num_block_types: i32) -> Result<i32> {
        let mut offset = self.block_trees[2 * tree_type];
        if num_block_types <= 1 {
            self.block_trees[2 * tree_type + 1] = offset;
            self.block_trees[2 * tree_type + 2] = offset;
            return Ok(1 << 28);
        }
        let block_type_alphabet_size = (num_block_types + 2) as usize;
        offset += huffman::read_huffman_code(
            block_type_alphabet_size,
            block_type_alphabet_size,
            &mut self.block_trees,
            2 * tree_type,
            &mut self.br,
        )? as i32;
        self.block_trees[2 * tree_type + 1] = offset;
        offset += huffman::read_huffman_code(
            26,
            26,
            &mut self.block_trees,
            2 * tree_type + 1,
            &mut self.br,
        )? as i32;
        self.block_trees[2 * tree_type + 2] = offset;
        self.read_block_length(2 * tree_type + 1)
    }

    fn calculate_distance_lut(&mut self, alphabet_size_limit: usize) {
        let npostfix = self.distance_postfix_bits;
        let ndirect = self.num_direct_distance_codes;
        let postfix = 1usize << npostfix;
        let mut bits = 1i32;
        let mut half = 0i32;
        let mut i = 16usize;
        for j in 0..ndirect {
            self.dist_extra_bits[i] = 0;
            self.dist_offset[i] = j + 1;
            i += 1;
        }
        while i < alphabet_size_limit {
            let base = ndirect + ((((2 + half) << bits) - 4) << npostfix) + 1;
            for j in 0..postfix {
                self.dist_extra_bits[i] = bits as u8;
                self.dist_offset[i] = base + j as i32;
                i += 1;
            }
            bits += half;
            half ^= 1;
        }
    }

    fn decode_huffman_tree_group(
        &mut self,
        alphabet_size_max: usize,
        alphabet_size_limit: usize,
        n: usize,
    ) -> Result<Vec<i32>> {
        let max_table_size = huffman::max_table_size(alphabet_size_limit);
        let mut group = vec![0i32; n + n * max_table_size];
        let mut next = n;
        for i in 0..n {
            group[i] = next as i32;
            next += huffman::read_huffman_code(
                alphabet_size_max,
                alphabet_size_limit,
                &mut group,
                i,
                &mut self.br,
            )?;
        }
        Ok(group)
    }

    fn decode_context_map(&mut self, context_map_size: usize) -> Result<(Vec<u8>, i32)> {
        let mut context_map = vec![0u8; context_map_size];
        self.br.ensure_input()?;
        let num_trees = self.decode_var_len_unsigned_byte() as i32 + 1;
        if num_trees == 1 {
            return Ok((context_map, num_trees));
        }
        self.br.fill();
        let use_rle_for_zeros = self.br.read_few_bits(1) != 0;
        let mut max_run_length_prefix = 0u32;
        if use_rle_for_zeros {
            max_run_length_prefix = self.br.read_few_bits(4) + 1;
        }
        let alphabet_size = (num_trees as u32 + max_run_length_prefix) as usize;
        let table_size = huffman::max_table_size(alphabet_size);
        let mut table = vec![0i32; table_size + 1];
        let table_idx = table.len() - 1;
        huffman::read_huffman_code(alphabet_size, alphabet_size, &mut table, table_idx, &mut self.br)?;
        let mut i = 0usize;
        while i < context_map_size {
            self.br.ensure_input()?;
            self.br.fill();
            let code = huffman::read_symbol(&table, table_idx, &mut self.br);
            if code == 0 {
                context_map[i] = 0;
                i += 1;
            } else if code <= max_run_length_prefix {
                self.br.fill();
                let mut reps = (1u32 << code) + self.br.read_few_bits(code);
                while reps != 0 {
                    if i >= context_map_size {
                        return Err(Error::corrupted("corrupted context map"));
                    }
                    context_map[i] = 0;
                    i += 1;
                    reps -= 1;
                }
            } else {
                context_map[i] = (code - max_run_length_prefix) as u8;
                i += 1;
            }
        }
        self.br.fill();
        if self.br.read_few_bits(1) == 1 {
            inverse_move_to_front_transform(&mut context_map);
        }
        Ok((context_map, num_trees))
    }

    fn read_metablock_huffman_codes_and_context_maps(&mut self) -> Result<()> {
        self.num_literal_block_types = self.decode_var_len_unsigned_byte() as i32 + 1;
        self.literal_block_length = self.read_metablock_partition(0, self.num_literal_block_types)?;
        self.num_command_block_types = self.decode_var_len_unsigned_byte() as i32 + 1;
        self.command_block_length = self.read_metablock_partition(1, self.num_command_block_types)?;
        self.num_distance_block_types = self.decode_var_len_unsigned_byte() as i32 + 1;
        self.distance_block_length = self.read_metablock_partition(2, self.num_distance_block_types)?;
        self.br.ensure_input()?;
        self.br.fill();
        self.distance_postfix_bits = self.br.read_few_bits(2) as i32;
        self.num_direct_distance_codes =
            (self.br.read_few_bits(4) << self.distance_postfix_bits) as i32;
        let num_literal_types = self.num_literal_block_types as usize;
        let mut context_modes = vec![0u8; num_literal_types];
        let mut i = 0usize;
        while i < num_literal_types {
            let limit = (i + 96).min(num_literal_types);
            while i < limit {
                self.br.fill();
                context_modes[i] = self.br.read_few_bits(2) as u8;
                i += 1;
            }
            self.br.ensure_input()?;
        }
        self.context_modes = context_modes;
        let (context_map, num_literal_trees) = self.decode_context_map(num_literal_types << 6)?;
        self.context_map = context_map;
        self.trivial_literal_context = self
            .context_map
            .iter()
            .enumerate()
            .all(|(j, &v)| v as usize == j >> 6);
        let (dist_context_map, num_dist_trees) =
            self.decode_context_map((self.num_distance_block_types as usize) << 2)?;
        self.dist_context_map = dist_context_map;
        self.literal_tree_group =
            self.decode_huffman_tree_group(256, 256, num_literal_trees as usize)?;
        self.command_tree_group =
            self.decode_huffman_tree_group(704, 704, self.num_command_block_types as usize)?;
        let mut distance_alphabet_size_max = calculate_distance_alphabet_size(
            self.distance_postfix_bits,
            self.num_direct_distance_codes,
            24,
        );
        let mut distance_alphabet_size_limit = distance_alphabet_size_max;
        if self.is_large_window {
            distance_alphabet_size_max = calculate_distance_alphabet_size(
                self.distance_postfix_bits,
                self.num_direct_distance_codes,
                62,
            );
            distance_alphabet_size_limit = calculate_distance_alphabet_limit(
                MAX_ALLOWED_DISTANCE,
                self.distance_postfix_bits,
                self.num_direct_distance_codes,
            )?;
        }
        self.distance_tree_group = self.decode_huffman_tree_group(
            distance_alphabet_size_max as usize,
            distance_alphabet_size_limit as usize,
            num_dist_trees as usize,
        )?;
        self.calculate_distance_lut(distance_alphabet_size_limit as usize);
        self.context_map_slice = 0;
        self.dist_context_map_slice = 0;
        self.context_lookup_offset1 = (self.context_modes[0] as usize) << 9;
        self.context_lookup_offset2 = self.context_lookup_offset1 + 256;
        self.literal_tree_idx = 0;
        self.command_tree_idx = 0;
        self.rings[4..10].copy_from_slice(&[1, 0, 1, 0, 1, 0]);
        Ok(())
    }

    fn copy_uncompressed_data(&mut self) -> Result<()> {
        if self.meta_block_length <= 0 {
            self.br.reload()?;
            self.state = RunState::BlockStart;
            return Ok(());
        }
        let chunk_length = (self.ring_buffer_size - self.pos).min(self.meta_block_length);
        self.br
            .copy_raw_bytes(&mut self.ring_buffer, self.pos as usize, chunk_length as usize)?;
        self.meta_block_length -= chunk_length;
        self.pos += chunk_length;
        if self.pos == self.ring_buffer_size {
            self.next_state = RunState::CopyUncompressed;
            self.state = RunState::InitWrite;
            return Ok(());
        }
        self.br.reload()?;
        self.state = RunState::BlockStart;
        Ok(())
    }

    fn write_ring_buffer(&mut self, output: &mut [u8], output_used: &mut usize) -> bool {
        let to_write = (output.len() - *output_used)
            .min((self.ring_buffer_bytes_ready - self.ring_buffer_bytes_written) as usize);
        if to_write != 0 {
            let from = self.ring_buffer_bytes_written as usize;
            output[*output_used..*output_used + to_write]
                .copy_from_slice(&self.ring_buffer[from..from + to_write]);
            *output_used += to_write;
            self.ring_buffer_bytes_written += to_write as i32;
        }
        *output_used < output.len()
    }

    fn calculate_fence(&self, output: &[u8], output_used: usize) -> i32 {
        let mut result = self.ring_buffer_size;
        if self.is_eager {
            result = result
                .min(self.ring_buffer_bytes_written + (output.len() - output_used) as i32);
        }
        result
    }

    fn do_use_dictionary(&mut self, fence: i32) -> Result<()> {
        if self.distance as i64 > MAX_ALLOWED_DISTANCE {
            return Err(Error::corrupted("invalid backward reference"));
        }
        let mut address = self.distance - self.max_distance - 1;
        if !self.compound.is_empty() {
            if address < self.compound.total_size() {
                let offset = self.compound.total_size() - 1 - address;
                self.dist_rb_idx = (self.dist_rb_idx + 1) & 0x3;
                self.rings[self.dist_rb_idx] = self.distance;
                self.cd_copy = self.compound.start_copy(offset, self.copy_length)?;
                self.meta_block_length -= self.copy_length;
                self.state = RunState::CopyFromCompoundDictionary;
                return Ok(());
            }
            address -= self.compound.total_size();
        }
        let word_length = self.copy_length;
        if word_length > 31 {
            return Err(Error::corrupted("invalid backward reference"));
        }
        let dict = match &self.dictionary {
            Some(dict) => dict.clone(),
            None => return Err(Error::corrupted("invalid backward reference")),
        };
        let shift = dict.size_bits[word_length as usize];
        if shift == 0 {
            return Err(Error::corrupted("invalid backward reference"));
        }
        let mask = (1i32 << shift) - 1;
        let word_idx = address & mask;
        let transform_idx = (address >> shift) as usize;
        if transform_idx >= RFC_TRANSFORMS.num_transforms {
            return Err(Error::corrupted("invalid backward reference"));
        }
        let offset = dict.word_offset(word_length as usize, word_idx);
        let len = transform_dictionary_word(
            &mut self.ring_buffer,
            self.pos as usize,
            dict.data(),
            offset,
            word_length,
            &RFC_TRANSFORMS,
            transform_idx,
        );
        self.pos += len;
        self.meta_block_length -= len;
        if self.pos >= fence {
            self.next_state = RunState::MainLoop;
            self.state = RunState::InitWrite;
        } else {
            self.state = RunState::MainLoop;
        }
        Ok(())
    }
}

fn calculate_distance_alphabet_size(npostfix: i32, ndirect: i32, maxndistbits: i32) -> i32 {
    16 + ndirect + 2 * (maxndistbits << npostfix)
}

fn calculate_distance_alphabet_limit(max_distance: i64, npostfix: i32, ndirect: i32) -> Result<i32> {
    if max_distance < (ndirect + (2 << npostfix)) as i64 {
        return Err(Error::corrupted("max distance too small"));
    }
    // The offset can be exactly 1 << 31, so it stays in 64 bits.
    let offset = ((max_distance - ndirect as i64) >> npostfix) + 4;
    let ndistbits = 63 - offset.leading_zeros() as i32 - 1;
    let group = ((ndistbits - 1) << 1) | (((offset >> ndistbits) & 1) as i32);
    Ok(((group - 1) << npostfix) + (1 << npostfix) + ndirect + 16)
}

fn move_to_front(v: &mut [u8; 256], index: usize) {
    let value = v[index];
    v.copy_within(0..index, 1);
    v[0] = value;
}

fn inverse_move_to_front_transform(v: &mut [u8]) {
    let mut mtf = [0u8; 256];
    for (i, slot) in mtf.iter_mut().enumerate() {
        *slot = i as u8;
    }
    for item in v.iter_mut() {
        let index = *item as usize;
        *item = mtf[index];
        if index != 0 {
            move_to_front(&mut mtf, index);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
