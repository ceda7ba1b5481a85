//! # Haagenti Brotli
//!
//! Native streaming Brotli decompression (RFC 7932).
//!
//! The decoder consumes a compressed byte stream and produces output
//! incrementally through a window-sized ring buffer, so memory use is bounded
//! by the stream's window declaration rather than the decompressed size.
//!
//! ## Features
//!
//! - **Streaming**: Suspend and resume on arbitrary output buffer boundaries
//! - **Dictionary**: Static (RFC 7932) and compound dictionary references
//! - **Large Window**: Optional window sizes beyond 16 MiB
//! - **Eager Output**: Optionally bound internal buffering to output demand
//!
//! ## Example
//!
//! ```ignore
//! use haagenti_brotli::BrotliDecoder;
//!
//! let mut decoder = BrotliDecoder::new(compressed)?;
//! let mut buffer = [0u8; 16384];
//! while !decoder.is_finished() {
//!     let n = decoder.decompress(&mut buffer)?;
//!     sink.write_all(&buffer[..n])?;
//! }
//! ```

pub mod bitreader;
pub mod commands;
pub mod compound;
pub mod context;
pub mod decode;
pub mod dictionary;
pub mod huffman;
pub mod transform;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;

use haagenti_core::{Algorithm, Decompressor, DictionaryDecompressor, Error, Result};

pub use compound::CompoundDictionary;
pub use decode::{BrotliDecoder, BrotliDecoderOptions};
pub use dictionary::StaticDictionary;

/// Output granularity for one-shot decompression.
const BUFFER_SIZE: usize = 16384;

/// Decompress a whole Brotli stream in one call.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = BrotliDecoder::new(input)?;
    let mut output = Vec::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    while !decoder.is_finished() {
        let n = decoder.decompress(&mut buffer)?;
        output.extend_from_slice(&buffer[..n]);
    }
    Ok(output)
}

/// Brotli decompressor.
#[derive(Clone, Default)]
pub struct BrotliDecompressor {
    options: BrotliDecoderOptions,
    attached: Option<Vec<u8>>,
}

impl BrotliDecompressor {
    /// Create a new Brotli decompressor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with explicit decoder options.
    pub fn with_options(options: BrotliDecoderOptions) -> Self {
        BrotliDecompressor {
            options,
            attached: None,
        }
    }

    /// Use a static dictionary for backward references past the window.
    pub fn set_static_dictionary(&mut self, dictionary: Arc<StaticDictionary>) {
        self.options.static_dictionary = Some(dictionary);
    }

    fn make_decoder<'a>(&self, input: &'a [u8]) -> Result<BrotliDecoder<&'a [u8]>> {
        let mut decoder = BrotliDecoder::with_options(input, self.options.clone())?;
        if let Some(chunk) = &self.attached {
            decoder.attach_dictionary_chunk(chunk.clone())?;
        }
        Ok(decoder)
    }
}

impl Decompressor for BrotliDecompressor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Brotli
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = self.make_decoder(input)?;
        let mut output = Vec::new();
        let mut buffer = [0u8; BUFFER_SIZE];
        while !decoder.is_finished() {
            let n = decoder.decompress(&mut buffer)?;
            output.extend_from_slice(&buffer[..n]);
        }
        Ok(output)
    }

    fn decompress_to(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let decompressed = self.decompress(input)?;
        if decompressed.len() > output.len() {
            return Err(Error::buffer_too_small(decompressed.len(), output.len()));
        }
        output[..decompressed.len()].copy_from_slice(&decompressed);
        Ok(decompressed.len())
    }
}

impl DictionaryDecompressor for BrotliDecompressor {
    fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<()> {
        if dictionary.is_empty() {
            return Err(Error::InvalidDictionary("empty dictionary".into()));
        }
        self.attached = Some(dictionary.to_vec());
        Ok(())
    }

    fn clear_dictionary(&mut self) {
        self.attached = None;
    }
}
