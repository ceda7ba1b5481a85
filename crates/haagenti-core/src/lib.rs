//! # Haagenti Core
//!
//! Core traits and types for the Haagenti decompression library.
//!
//! Haagenti is named after the 48th demon of the Ars Goetia, who transmutes
//! substances into more valuable forms - just as compression transforms data
//! into denser representations.
//!
//! ## Core Traits
//!
//! - [`Decompressor`] - One-shot decompression operations
//! - [`DictionaryDecompressor`] - Decompression with an attached dictionary
//!
//! ## Example
//!
//! ```ignore
//! use haagenti_core::Decompressor;
//! use haagenti_brotli::BrotliDecompressor;
//!
//! let codec = BrotliDecompressor::new();
//! let original = codec.decompress(&compressed)?;
//! ```

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Decompressor, DictionaryDecompressor};
pub use types::Algorithm;
