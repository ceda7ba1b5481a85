//! Core type definitions for decompression operations.

/// Supported compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Brotli - High compression ratio (RFC 7932).
    Brotli,
    /// Deflate - Widely compatible (RFC 1951).
    Deflate,
    /// Gzip - Deflate with headers/checksums (RFC 1952).
    Gzip,
    /// Zstandard - Balanced speed and ratio (RFC 8878).
    Zstd,
}

impl Algorithm {
    /// Get algorithm name as string.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Brotli => "brotli",
            Algorithm::Deflate => "deflate",
            Algorithm::Gzip => "gzip",
            Algorithm::Zstd => "zstd",
        }
    }

    /// Check if the format supports external dictionaries.
    pub fn supports_dictionary(self) -> bool {
        matches!(self, Algorithm::Brotli | Algorithm::Deflate | Algorithm::Zstd)
    }
}

// ============================================================================
