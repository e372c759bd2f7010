//! On-disk structures of BitLocker's FVE (Full Volume Encryption) metadata.
//!
//! This crate is pure parsing: it turns raw bytes into typed structures and
//! performs structural validation, but does no I/O and no cryptography. The
//! `bde` crate drives discovery, reconciliation and key unwrapping on top of
//! these types.
//!
//! The main entry points are:
//! - [`VolumeHeader`] - the boot sector variants that locate the metadata,
//! - [`BlockHeader`] - the header of one of the three FVE metadata blocks,
//! - [`FveMetadata`] - a parsed metadata dataset with typed accessors,
//! - [`StartupKeyFile`] - a parsed `.BEK` startup-key file.

#![forbid(unsafe_code)]

pub mod bek;
pub mod block;
pub mod boot_sector;
pub mod entry;
pub mod error;
pub mod header;
pub mod metadata;

pub use bek::StartupKeyFile;
pub use block::BlockHeader;
pub use boot_sector::{MetadataLayout, VolumeHeader};
pub use entry::{
    AesCcmEncryptedKeyValue, Entry, EntryHeader, EntryType, EntryValue, ExternalKeyValue,
    KeyValue, ProtectionType, StretchKeyValue, UseKeyValue, ValueType, VolumeHeaderBlockValue,
    VolumeMasterKeyValue, parse_entries,
};
pub use error::FveError;
pub use header::{EncryptionMethod, MetadataHeader};
pub use metadata::FveMetadata;

/// FVE parsing result type
pub type Result<T> = std::result::Result<T, FveError>;
