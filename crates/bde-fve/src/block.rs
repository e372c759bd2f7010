//! FVE metadata block header.

use binrw::prelude::*;
use std::io::Cursor;

use crate::error::FveError;

/// Metadata block versions this crate understands.
pub const VERSION_VISTA: u16 = 1;
pub const VERSION_WINDOWS7: u16 = 2;

/// The 64-byte header at the start of each of the three FVE metadata
/// blocks, beginning with the `-FVE-FS-` signature.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little, magic(b"-FVE-FS-"))]
pub struct BlockHeader {
    pub size: u16,
    /// 1 for Vista, 2 for Windows 7 and later.
    pub version: u16,
    pub unknown: [u8; 4],
    /// Size in bytes of the encrypted part of the volume. Smaller than the
    /// volume itself when encryption was paused mid-conversion.
    pub encrypted_volume_size: u64,
    /// Nonzero while a conversion (encryption/decryption) is in progress.
    pub convert_size: u32,
    /// Number of boot sectors relocated to `volume_header_offset`.
    pub volume_header_sectors: u32,
    /// The offsets of the three metadata blocks. Every non-corrupt block
    /// records the same triple.
    pub metadata_offsets: [u64; 3],
    /// Where the original volume-header sectors are stored. Version 1
    /// reuses the NTFS MFT mirror area for this; version 2 records a
    /// dedicated run.
    pub volume_header_offset: u64,
}

impl BlockHeader {
    /// Header size on disk, including the signature.
    pub const SIZE: usize = 64;

    /// On-disk size of the whole metadata block region, by version.
    /// Reads inside these regions never return FVE structures (see the
    /// region map in `bde`).
    pub fn region_size(&self) -> u64 {
        match self.version {
            VERSION_VISTA => 16 * 1024,
            _ => 64 * 1024,
        }
    }

    /// Parses a block header read from `block_offset`.
    pub fn parse(data: &[u8], block_offset: u64) -> crate::Result<Self> {
        let header = Self::read_le(&mut Cursor::new(data)).map_err(|error| match error {
            binrw::Error::BadMagic { .. } => {
                FveError::corrupt(block_offset, "bad FVE block signature")
            }
            other => FveError::from(other),
        })?;
        if header.version != VERSION_VISTA && header.version != VERSION_WINDOWS7 {
            return Err(FveError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }

    /// Checks that this block's offset triple names the same three on-disk
    /// locations that discovery found.
    pub fn validate_offsets(
        &self,
        block_offset: u64,
        discovered: &[u64; 3],
    ) -> crate::Result<()> {
        if self.metadata_offsets != *discovered {
            return Err(FveError::corrupt(
                block_offset,
                format!(
                    "block offset triple {:x?} disagrees with discovered {:x?}",
                    self.metadata_offsets, discovered
                ),
            ));
        }
        Ok(())
    }
}
