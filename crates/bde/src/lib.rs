//! Read-only access to BitLocker Drive Encryption (BDE) volumes.
//!
//! Given a raw volume image and an unlock credential, this crate exposes
//! the plaintext contents as a seekable byte view, suitable for forensic
//! inspection, mounting or bulk export:
//!
//! ```no_run
//! use bde::Volume;
//! use std::fs::File;
//!
//! fn main() -> bde::Result<()> {
//!     let image = File::open("encrypted.img")?;
//!     let mut volume = Volume::open(image)?;
//!     volume.set_recovery_password(
//!         "490259-366696-661969-081840-396748-663212-572814-108075",
//!     )?;
//!     volume.unlock()?;
//!
//!     let mut boot_sector = [0u8; 512];
//!     volume.read_at(0, &mut boot_sector)?;
//!     Ok(())
//! }
//! ```
//!
//! Supported credentials: recovery password, user password, `.BEK` startup
//! key, clear key (no input) and raw FVEK. All five historical sector
//! cipher modes are implemented, including the Vista/Windows 7 Elephant
//! diffuser. Writing is out of scope by design.
//!
//! On-disk structure parsing lives in [`bde_fve`], re-exported as
//! [`fve`]; the common Windows data types come from [`bde_dtyp`].

#![forbid(unsafe_code)]

pub mod crypto;
pub mod error;
pub mod keys;
pub mod region;
pub mod source;
pub mod volume;

mod unlock;
mod virtual_volume;

pub use crypto::SectorDecryptor;
pub use error::Error;
pub use keys::RecoveryPassword;
pub use region::{Region, RegionKind, RegionMap};
pub use source::ByteSource;
pub use volume::{AbortHandle, KeyProtectorInfo, UnlockState, Volume};

pub use bde_dtyp::{FileTime, Guid};
pub use bde_fve as fve;
pub use bde_fve::{EncryptionMethod, ProtectionType};

/// BDE result type
pub type Result<T> = std::result::Result<T, Error>;
