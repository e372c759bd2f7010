//! Error type of the `bde` crate.

use thiserror::Error;

/// All errors surfaced by this crate. Lower-level causes (I/O, format
/// validation) are carried as sources so callers get the full context
/// chain.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on the underlying byte source")]
    Io(#[from] std::io::Error),

    /// On-disk structure validation failed; see the inner error for the
    /// offset and reason.
    #[error("FVE format error")]
    Format(#[from] bde_fve::FveError),

    #[error("unsupported encryption method {0:#010x}")]
    UnsupportedEncryptionMethod(u32),

    /// A supplied credential is malformed (wrong length, bad characters,
    /// failed checksum). Raised when the credential is set, before any
    /// unlock attempt.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Every candidate key protector rejected the supplied credentials.
    #[error("unlock failed: no supplied credential unwraps a key protector")]
    UnlockFailed,

    #[error("the volume is locked; unlock it before reading")]
    NotUnlocked,

    #[error("offset {offset:#x} is out of range for a volume of {size:#x} bytes")]
    OutOfRange { offset: u64, size: u64 },

    /// The abort flag was raised during a long-running operation.
    #[error("operation aborted")]
    Aborted,

    /// Parsed data is structurally valid but semantically inconsistent
    /// (e.g. an FVEK whose length does not match the encryption method).
    #[error("invalid data: {0}")]
    InvalidData(String),
}
