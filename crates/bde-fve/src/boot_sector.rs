//! Volume-header (boot sector) parsing and FVE metadata discovery.
//!
//! BitLocker leaves a recognizable boot sector in place of the original one.
//! Which variant is present depends on the Windows generation:
//!
//! - Windows 7 and later keep a standard NTFS boot sector whose
//!   vendor-reserved area carries a BitLocker identifier GUID followed by
//!   the three FVE metadata block offsets.
//! - Vista replaces the OEM identifier with `-FVE-FS-` and reuses the MFT
//!   mirror cluster field to point at the first metadata block.
//! - BitLocker To Go volumes keep a FAT-style `MSWIN4.1` boot sector with
//!   the identifier GUID and offsets further in.

use binrw::prelude::*;
use std::io::Cursor;

use bde_dtyp::Guid;

use crate::error::FveError;

/// OEM identifier of a standard NTFS boot sector.
pub const OEM_NTFS: [u8; 8] = *b"NTFS    ";
/// OEM identifier of a Vista BitLocker boot sector.
pub const OEM_FVE: [u8; 8] = *b"-FVE-FS-";
/// OEM identifier of a BitLocker To Go boot sector.
pub const OEM_TOGO: [u8; 8] = *b"MSWIN4.1";

/// The identifier GUID BitLocker writes into the vendor-reserved area of
/// the boot sector: `4967d63b-2e29-4ad8-8399-f6a339e3d001`.
pub const BITLOCKER_IDENTIFIER: Guid = Guid::from_bytes([
    0x3b, 0xd6, 0x67, 0x49, 0x29, 0x2e, 0xd8, 0x4a, 0x83, 0x99, 0xf6, 0xa3, 0x39, 0xe3, 0xd0,
    0x01,
]);

/// A parsed 512-byte volume header (boot sector).
///
/// The BPB geometry fields are shared by all variants; the trailing
/// BitLocker fields are only meaningful for the variant that matches the
/// OEM identifier / identifier GUID (see [`VolumeHeader::metadata_layouts`]).
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct VolumeHeader {
    pub entry_point: [u8; 3],
    pub oem_identifier: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat_16: u16,
    pub sectors_per_track: u16,
    pub head_count: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    /// NTFS marks this reserved; FAT32 stores the 32-bit FAT size here.
    pub sectors_per_fat_32: u32,
    /// NTFS 64-bit total sector count.
    pub total_sectors_64: u64,
    pub mft_cluster: u64,
    /// NTFS MFT mirror cluster. On Vista BitLocker volumes this slot holds
    /// the cluster number of the first FVE metadata block instead.
    pub mft_mirror_cluster: u64,

    /// BitLocker identifier GUID (Windows 7+), at offset 160.
    #[brw(pad_before = 96)]
    pub information_identifier: Guid,
    /// The three FVE metadata block offsets (Windows 7+), at offset 176.
    pub information_offsets: [u64; 3],

    /// BitLocker To Go identifier GUID, at offset 424.
    #[brw(pad_before = 224)]
    pub togo_identifier: Guid,
    /// The three FVE metadata block offsets (To Go), at offset 440.
    pub togo_offsets: [u64; 3],

    #[brw(pad_before = 46)]
    #[br(assert(sector_signature == 0xaa55, "missing boot sector signature"))]
    pub sector_signature: u16,
}

/// How the FVE metadata blocks are located for a given volume generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataLayout {
    /// Windows 7+: the boot sector carries all three block offsets.
    Version2 { offsets: [u64; 3] },
    /// Vista: the boot sector yields the first block only; the remaining
    /// offsets come from that block's own offset triple.
    Version1 { first_offset: u64 },
    /// BitLocker To Go: all three offsets, at the To Go positions.
    ToGo { offsets: [u64; 3] },
}

impl VolumeHeader {
    pub const SIZE: usize = 512;

    /// Parses a volume header from the first sector of the image.
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        Ok(Self::read_le(&mut Cursor::new(data))?)
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        u64::from(self.bytes_per_sector) * u64::from(self.sectors_per_cluster)
    }

    /// Total sector count, preferring the widest populated field.
    pub fn total_sectors(&self) -> u64 {
        if self.total_sectors_64 != 0 {
            self.total_sectors_64
        } else if self.total_sectors_32 != 0 {
            u64::from(self.total_sectors_32)
        } else {
            u64::from(self.total_sectors_16)
        }
    }

    /// Volume size in bytes as advertised by the BPB, or 0 when the boot
    /// sector does not carry a usable total.
    pub fn volume_size(&self) -> u64 {
        self.total_sectors() * u64::from(self.bytes_per_sector)
    }

    /// Candidate metadata layouts for this volume header, most recent
    /// format first. Discovery tries each in order until one produces a
    /// valid metadata block.
    pub fn metadata_layouts(&self) -> crate::Result<Vec<MetadataLayout>> {
        let mut layouts = Vec::new();
        if self.oem_identifier == OEM_NTFS && self.information_identifier == BITLOCKER_IDENTIFIER
        {
            layouts.push(MetadataLayout::Version2 {
                offsets: self.information_offsets,
            });
        }
        if self.oem_identifier == OEM_TOGO && self.togo_identifier == BITLOCKER_IDENTIFIER {
            layouts.push(MetadataLayout::ToGo {
                offsets: self.togo_offsets,
            });
        }
        if self.oem_identifier == OEM_FVE {
            layouts.push(MetadataLayout::Version1 {
                first_offset: self.mft_mirror_cluster * self.bytes_per_cluster(),
            });
        }
        if layouts.is_empty() {
            log::debug!(
                "no BitLocker signature in volume header (OEM {:?})",
                String::from_utf8_lossy(&self.oem_identifier)
            );
            return Err(FveError::UnsupportedVolumeSignature);
        }
        Ok(layouts)
    }
}
