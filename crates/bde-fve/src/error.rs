//! Error types for FVE metadata parsing.

use thiserror::Error;

/// Errors surfaced while parsing FVE on-disk structures.
#[derive(Debug, Error)]
pub enum FveError {
    /// A structure failed validation. The offset locates the failing
    /// structure on the underlying volume (or within the parsed buffer for
    /// detached datasets such as `.BEK` files).
    #[error("corrupt FVE metadata at offset {offset:#x}: {reason}")]
    MetadataCorrupt { offset: u64, reason: String },

    /// The metadata block declares a version this implementation does not
    /// understand.
    #[error("unsupported FVE metadata version {0}")]
    UnsupportedVersion(u16),

    /// A metadata entry overruns its containing dataset or payload.
    #[error("truncated metadata entry at offset {offset:#x}")]
    TruncatedEntry { offset: u64 },

    /// None of the known volume-header signatures matched: the image is not
    /// a BitLocker-protected volume this crate can read.
    #[error("unsupported volume signature: not a BitLocker volume")]
    UnsupportedVolumeSignature,

    /// Low-level binary decoding failure.
    #[error("failed to decode structure")]
    Decode(#[from] binrw::Error),
}

impl FveError {
    /// Shorthand for [`FveError::MetadataCorrupt`].
    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        FveError::MetadataCorrupt {
            offset,
            reason: reason.into(),
        }
    }
}
