//! Dictionary word transforms.
//!
//! A backward reference past the window addresses a dictionary word plus a
//! transform id. The transform rewrites the word while copying it out:
//! optional prefix and suffix, omitted leading or trailing bytes, case
//! changes, or a codepoint shift for parametrized custom transforms.

use std::sync::LazyLock;

/// A set of word transforms with shared prefix/suffix storage.
pub struct Transforms {
    pub num_transforms: usize,
    /// (prefix id, transform type, suffix id) per transform.
    pub triplets: Vec<i32>,
    pub prefix_suffix_storage: Vec<u8>,
    /// Offsets into the storage; segment `i` is `heads[i]..heads[i + 1]`.
    pub prefix_suffix_heads: Vec<i32>,
    /// Shift base per transform, used by transform types 21 and 22.
    pub params: Vec<i16>,
}

const PREFIX_SUFFIX_SRC: &[u8] = b"# #s #, #e #.# the #.com/#\xC2\xA0# of # and # in # to #\"#\">#\n#]# for # a # that #. # with #'# from # by #. The # on # as # is #ing #\n\t#:#ed #(# at #ly #=\"# of the #. This #,# not #er #al #='#ful #ive #less #est #ize #ous #";

const TRIPLETS_SRC: &[u8] = b"     !! ! ,  *!  &!  \" !  ) *   * -  ! # !  #!*!  +  ,$ !  -  %  .  / #   0  1 .  \"   2  3!*   4%  ! # /   5  6  7  8 0  1 &   $   9 +   :  ;  < '  !=  >  ?! 4  @ 4  2  &   A *# (   B  C& ) %  ) !*# *-% A +! *.  D! %'  & E *6  F  G% ! *A *%  H! D  I!+!  J!+   K +- *4! A  L!*4  M  N +6  O!*% +.! K *G  P +%(  ! G *D +D  Q +# *K!*G!+D!+# +G +A +4!+% +K!+4!*D!+K!*K";

impl Transforms {
    fn unpack(
        num_transforms: usize,
        prefix_suffix_len: usize,
        prefix_suffix_count: usize,
        prefix_suffix_src: &[u8],
        triplets_src: &[u8],
    ) -> Self {
        let mut storage = Vec::with_capacity(prefix_suffix_len);
        let mut heads = vec![0i32; prefix_suffix_count + 1];
        let mut index = 1;
        for &c in prefix_suffix_src {
            if c == b'#' {
                heads[index] = storage.len() as i32;
                index += 1;
            } else {
                storage.push(c);
            }
        }
        let triplets = triplets_src.iter().map(|&c| c as i32 - 32).collect();
        Transforms {
            num_transforms,
            triplets,
            prefix_suffix_storage: storage,
            prefix_suffix_heads: heads,
            params: vec![0i16; num_transforms],
        }
    }
}

/// The 121 transforms defined by RFC 7932.
pub static RFC_TRANSFORMS: LazyLock<Transforms> =
    LazyLock::new(|| Transforms::unpack(121, 167, 50, PREFIX_SUFFIX_SRC, TRIPLETS_SRC));

/// Copies a dictionary word into `dst` at `dst_offset`, applying the given
/// transform. Returns the number of bytes produced. The destination must
/// carry enough slack past the nominal output for the case and shift
/// rewrites, which may touch a couple of bytes beyond a multi-byte sequence.
pub fn transform_dictionary_word(
    dst: &mut [u8],
    dst_offset: usize,
    src: &[u8],
    src_offset: usize,
    len: i32,
    transforms: &Transforms,
    transform_index: usize,
) -> i32 {
    let mut offset = dst_offset;
    let mut src_offset = src_offset;
    let mut len = len;

    let transform_offset = 3 * transform_index;
    let prefix_idx = transforms.triplets[transform_offset] as usize;
    let transform_type = transforms.triplets[transform_offset + 1];
    let suffix_idx = transforms.triplets[transform_offset + 2] as usize;
    let mut prefix = transforms.prefix_suffix_heads[prefix_idx] as usize;
    let prefix_end = transforms.prefix_suffix_heads[prefix_idx + 1] as usize;
    let mut suffix = transforms.prefix_suffix_heads[suffix_idx] as usize;
    let suffix_end = transforms.prefix_suffix_heads[suffix_idx + 1] as usize;

    let mut omit_first = transform_type - 11;
    let mut omit_last = transform_type;
    if !(1..=9).contains(&omit_first) {
        omit_first = 0;
    }
    if !(1..=9).contains(&omit_last) {
        omit_last = 0;
    }

    while prefix != prefix_end {
        dst[offset] = transforms.prefix_suffix_storage[prefix];
        offset += 1;
        prefix += 1;
    }

    if omit_first > len {
        omit_first = len;
    }
    src_offset += omit_first as usize;
    len -= omit_first;
    len -= omit_last;

    let mut i = len;
    while i > 0 {
        dst[offset] = src[src_offset];
        offset += 1;
        src_offset += 1;
        i -= 1;
    }

    if transform_type == 10 || transform_type == 11 {
        let mut uppercase_offset = offset - len as usize;
        if transform_type == 10 {
            len = 1;
        }
        while len > 0 {
            let c0 = dst[uppercase_offset];
            if c0 < 0xc0 {
                if (97..=122).contains(&c0) {
                    dst[uppercase_offset] ^= 32;
                }
                uppercase_offset += 1;
                len -= 1;
            } else if c0 < 0xe0 {
                dst[uppercase_offset + 1] ^= 32;
                uppercase_offset += 2;
                len -= 2;
            } else {
                dst[uppercase_offset + 2] ^= 5;
                uppercase_offset += 3;
                len -= 3;
            }
        }
    } else if transform_type == 21 || transform_type == 22 {
        let mut shift_offset = offset - len as usize;
        let param = transforms.params[transform_index] as i32;
        let mut scalar = (param & 0x7fff) + (0x0100_0000 - (param & 0x8000));
        while len > 0 {
            let mut step = 1;
            let c0 = dst[shift_offset] as i32;
            if c0 < 0x80 {
                scalar += c0;
                dst[shift_offset] = (scalar & 0x7f) as u8;
            } else if c0 < 0xc0 {
                // skip a continuation byte
            } else if c0 < 0xe0 {
                if len >= 2 {
                    let c1 = dst[shift_offset + 1] as i32;
                    scalar += (c1 & 0x3f) | ((c0 & 0x1f) << 6);
                    dst[shift_offset] = (0xc0 | ((scalar >> 6) & 0x1f)) as u8;
                    dst[shift_offset + 1] = ((c1 & 0xc0) | (scalar & 0x3f)) as u8;
                    step = 2;
                } else {
                    step = len;
                }
            } else if c0 < 0xf0 {
                if len >= 3 {
                    let c1 = dst[shift_offset + 1] as i32;
                    let c2 = dst[shift_offset + 2] as i32;
                    scalar += (c2 & 0x3f) | ((c1 & 0x3f) << 6) | ((c0 & 0x0f) << 12);
                    dst[shift_offset] = (0xe0 | ((scalar >> 12) & 0x0f)) as u8;
                    dst[shift_offset + 1] = ((c1 & 0xc0) | ((scalar >> 6) & 0x3f)) as u8;
                    dst[shift_offset + 2] = ((c2 & 0xc0) | (scalar & 0x3f)) as u8;
                    step = 3;
                } else {
                    step = len;
                }
            } else if c0 < 0xf8 {
                if len >= 4 {
                    let c1 = dst[shift_offset + 1] as i32;
                    let c2 = dst[shift_offset + 2] as i32;
                    let c3 = dst[shift_offset + 3] as i32;
                    scalar += (c3 & 0x3f)
                        | ((c2 & 0x3f) << 6)
                        | ((c1 & 0x3f) << 12)
                        | ((c0 & 0x07) << 18);
                    dst[shift_offset] = (0xf0 | ((scalar >> 18) & 0x07)) as u8;
                    dst[shift_offset + 1] = ((c1 & 0xc0) | ((scalar >> 12) & 0x3f)) as u8;
                    dst[shift_offset + 2] = ((c2 & 0xc0) | ((scalar >> 6) & 0x3f)) as u8;
                    dst[shift_offset + 3] = ((c3 & 0xc0) | (scalar & 0x3f)) as u8;
                    step = 4;
                } else {
                    step = len;
                }
            }
            shift_offset += step as usize;
            len -= step;
            if transform_type == 21 {
                len = 0;
            }
        }
    }

    while suffix != suffix_end {
        dst[offset] = transforms.prefix_suffix_storage[suffix];
        offset += 1;
        suffix += 1;
    }

    (offset - dst_offset) as i32
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(word: &[u8], idx: usize) -> Vec<u8> {
        let mut dst = vec![0u8; word.len() + 64];
        let n = transform_dictionary_word(
            &mut dst,
            0,
            word,
            0,
            word.len() as i32,
            &RFC_TRANSFORMS,
            idx,
        );
        dst.truncate(n as usize);
        dst
    }

    #[test]
    fn test_unpack_shape() {
        assert_eq!(RFC_TRANSFORMS.num_transforms, 121);
        assert_eq!(RFC_TRANSFORMS.triplets.len(), 363);
        assert_eq!(RFC_TRANSFORMS.prefix_suffix_storage.len(), 167);
        assert_eq!(RFC_TRANSFORMS.prefix_suffix_heads.len(), 51);
    }

    #[test]
    fn test_identity_transform() {
        assert_eq!(apply(b"dog", 0), b"dog");
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert_eq!(apply(b"dog", 1), b"dog ");
        assert_eq!(apply(b"dog", 2), b" dog ");
        assert_eq!(apply(b"dog", 10), b"dog and ");
        assert_eq!(apply(b"dog", 20), b"dog.");
    }

    #[test]
    fn test_omit_first_and_last() {
        assert_eq!(apply(b"dog", 3), b"og");
        assert_eq!(apply(b"dog", 11), b"g");
        assert_eq!(apply(b"dog", 12), b"do");
    }

    #[test]
    fn test_uppercase_first() {
        assert_eq!(apply(b"dog", 9), b"Dog");
        assert_eq!(apply(b"dog", 4), b"Dog ");
        // Two-byte sequence: U+00E9 becomes U+00C9.
        assert_eq!(apply("\u{e9}de".as_bytes(), 9), "\u{c9}de".as_bytes());
    }

    #[test]
    fn test_omit_first_longer_than_word() {
        // Omit-first-9 against a short word consumes the whole word.
        let idx = (0..121)
            .find(|&i| RFC_TRANSFORMS.triplets[3 * i + 1] == 20)
            .unwrap();
        let out = apply(b"dog", idx);
        let prefix_idx = RFC_TRANSFORMS.triplets[3 * idx] as usize;
        let suffix_idx = RFC_TRANSFORMS.triplets[3 * idx + 2] as usize;
        let heads = &RFC_TRANSFORMS.prefix_suffix_heads;
        let expected_len = (heads[prefix_idx + 1] - heads[prefix_idx])
            + (heads[suffix_idx + 1] - heads[suffix_idx]);
        assert_eq!(out.len() as i32, expected_len);
    }

    #[test]
    fn test_shift_transform_rotates_ascii() {
        let mut custom = Transforms {
            num_transforms: 1,
            triplets: vec![0, 21, 0],
            prefix_suffix_storage: Vec::new(),
            prefix_suffix_heads: vec![0, 0],
            params: vec![3],
        };
        let mut dst = vec![0u8; 16];
        let n = transform_dictionary_word(&mut dst, 0, b"abc", 0, 3, &custom, 0);
        assert_eq!(n, 3);
        // Type 21 shifts only the first codepoint: 'a' + 0x1000000 + 3, low 7 bits.
        assert_eq!(&dst[..3], &[(b'a' + 3) & 0x7f, b'b', b'c']);

        // Type 22 shifts every codepoint.
        custom.triplets[1] = 22;
        let n = transform_dictionary_word(&mut dst, 0, b"abc", 0, 3, &custom, 0);
        assert_eq!(n, 3);
        assert_eq!(dst[0], (b'a' + 3) & 0x7f);
    }
}
