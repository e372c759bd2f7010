//! FVE metadata header and encryption-method identifiers.

use binrw::prelude::*;
use std::fmt;
use std::io::Cursor;

use bde_dtyp::{FileTime, Guid};

use crate::error::FveError;

/// The 48-byte header that follows the block header and precedes the
/// metadata dataset. The same layout opens detached FVE datasets such as
/// `.BEK` startup-key files.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct MetadataHeader {
    /// Size of the metadata, including this header.
    pub metadata_size: u32,
    pub version: u32,
    pub header_size: u32,
    pub metadata_size_copy: u32,
    pub volume_identifier: Guid,
    /// Counter used to generate fresh CCM nonces; monotonically increased
    /// by Windows on every metadata update.
    pub next_nonce_counter: u32,
    pub encryption_method: u32,
    pub creation_time: FileTime,
}

impl MetadataHeader {
    pub const SIZE: usize = 48;

    pub fn parse(data: &[u8], base_offset: u64) -> crate::Result<Self> {
        let header = Self::read_le(&mut Cursor::new(data))?;
        header.validate(base_offset)?;
        Ok(header)
    }

    fn validate(&self, base_offset: u64) -> crate::Result<()> {
        if self.header_size as usize != Self::SIZE {
            return Err(FveError::corrupt(
                base_offset,
                format!("unexpected metadata header size {}", self.header_size),
            ));
        }
        if self.metadata_size != self.metadata_size_copy {
            return Err(FveError::corrupt(
                base_offset,
                format!(
                    "metadata size {:#x} disagrees with its copy {:#x}",
                    self.metadata_size, self.metadata_size_copy
                ),
            ));
        }
        if (self.metadata_size as usize) < Self::SIZE {
            return Err(FveError::corrupt(
                base_offset,
                format!("metadata size {:#x} smaller than its header", self.metadata_size),
            ));
        }
        Ok(())
    }

    /// The size of the entry dataset following this header.
    pub fn dataset_size(&self) -> usize {
        self.metadata_size as usize - Self::SIZE
    }
}

/// Sector encryption methods used across the BitLocker generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    /// The volume is not encrypted (fully decrypted state).
    None,
    Aes128CbcDiffuser,
    Aes256CbcDiffuser,
    Aes128Cbc,
    Aes256Cbc,
    Aes128Xts,
    Aes256Xts,
}

impl EncryptionMethod {
    /// Decodes the low 16 bits of the metadata header's method field.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value as u16 {
            0x0000 => Some(EncryptionMethod::None),
            0x8000 => Some(EncryptionMethod::Aes128CbcDiffuser),
            0x8001 => Some(EncryptionMethod::Aes256CbcDiffuser),
            0x8002 => Some(EncryptionMethod::Aes128Cbc),
            0x8003 => Some(EncryptionMethod::Aes256Cbc),
            0x8004 => Some(EncryptionMethod::Aes128Xts),
            0x8005 => Some(EncryptionMethod::Aes256Xts),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> u16 {
        match self {
            EncryptionMethod::None => 0x0000,
            EncryptionMethod::Aes128CbcDiffuser => 0x8000,
            EncryptionMethod::Aes256CbcDiffuser => 0x8001,
            EncryptionMethod::Aes128Cbc => 0x8002,
            EncryptionMethod::Aes256Cbc => 0x8003,
            EncryptionMethod::Aes128Xts => 0x8004,
            EncryptionMethod::Aes256Xts => 0x8005,
        }
    }

    pub fn uses_diffuser(&self) -> bool {
        matches!(
            self,
            EncryptionMethod::Aes128CbcDiffuser | EncryptionMethod::Aes256CbcDiffuser
        )
    }

    pub fn is_xts(&self) -> bool {
        matches!(self, EncryptionMethod::Aes128Xts | EncryptionMethod::Aes256Xts)
    }

    /// Expected FVEK length in bytes, tweak half included for the diffuser
    /// and XTS methods.
    pub fn key_size(&self) -> usize {
        match self {
            EncryptionMethod::None => 0,
            EncryptionMethod::Aes128Cbc => 16,
            EncryptionMethod::Aes256Cbc => 32,
            EncryptionMethod::Aes128CbcDiffuser => 32,
            EncryptionMethod::Aes256CbcDiffuser => 64,
            EncryptionMethod::Aes128Xts => 32,
            EncryptionMethod::Aes256Xts => 64,
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionMethod::None => "not encrypted",
            EncryptionMethod::Aes128CbcDiffuser => "AES-128-CBC with diffuser",
            EncryptionMethod::Aes256CbcDiffuser => "AES-256-CBC with diffuser",
            EncryptionMethod::Aes128Cbc => "AES-128-CBC",
            EncryptionMethod::Aes256Cbc => "AES-256-CBC",
            EncryptionMethod::Aes128Xts => "AES-128-XTS",
            EncryptionMethod::Aes256Xts => "AES-256-XTS",
        };
        write!(f, "{} ({:#06x})", name, self.as_raw())
    }
}
