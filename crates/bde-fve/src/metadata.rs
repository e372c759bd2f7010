//! A parsed FVE metadata dataset with typed accessors.

use bde_dtyp::Guid;

use crate::entry::{
    AesCcmEncryptedKeyValue, Entry, EntryType, EntryValue, VolumeHeaderBlockValue,
    VolumeMasterKeyValue, parse_entries,
};
use crate::error::FveError;
use crate::header::{EncryptionMethod, MetadataHeader};

/// One copy of the FVE metadata: the 48-byte header and the entry dataset
/// that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FveMetadata {
    pub header: MetadataHeader,
    pub entries: Vec<Entry>,
}

impl FveMetadata {
    /// Parses a metadata copy. `data` starts at the metadata header (right
    /// after the block header); `base_offset` locates it on the volume for
    /// diagnostics.
    pub fn parse(data: &[u8], base_offset: u64) -> crate::Result<Self> {
        let header = MetadataHeader::parse(data, base_offset)?;
        let dataset_end = header.metadata_size as usize;
        if data.len() < dataset_end {
            return Err(FveError::corrupt(
                base_offset,
                format!(
                    "metadata size {:#x} exceeds the available {:#x} bytes",
                    header.metadata_size,
                    data.len()
                ),
            ));
        }
        let entries = parse_entries(
            &data[MetadataHeader::SIZE..dataset_end],
            base_offset + MetadataHeader::SIZE as u64,
        )?;
        Ok(FveMetadata { header, entries })
    }

    pub fn volume_identifier(&self) -> Guid {
        self.header.volume_identifier
    }

    /// The sector encryption method, or `None` when the stored value is
    /// not recognized.
    pub fn encryption_method(&self) -> Option<EncryptionMethod> {
        EncryptionMethod::from_raw(self.header.encryption_method)
    }

    /// All volume master key protectors, in dataset order.
    pub fn volume_master_keys(&self) -> impl Iterator<Item = &VolumeMasterKeyValue> {
        self.entries.iter().filter_map(|entry| {
            match (entry.entry_type(), &entry.value) {
                (EntryType::VolumeMasterKey, EntryValue::VolumeMasterKey(vmk)) => Some(vmk),
                _ => None,
            }
        })
    }

    /// The wrapped full volume encryption key.
    pub fn full_volume_encryption_key(&self) -> Option<&AesCcmEncryptedKeyValue> {
        self.entries.iter().find_map(|entry| {
            match (entry.entry_type(), &entry.value) {
                (
                    EntryType::FullVolumeEncryptionKey,
                    EntryValue::AesCcmEncryptedKey(wrapped),
                ) => Some(wrapped),
                _ => None,
            }
        })
    }

    /// The volume description (drive label and encryption date).
    pub fn description(&self) -> Option<&str> {
        self.entries.iter().find_map(|entry| {
            match (entry.entry_type(), &entry.value) {
                (EntryType::Description, EntryValue::UnicodeString(text)) => Some(text.as_str()),
                _ => None,
            }
        })
    }

    /// The relocated original volume-header run, when recorded as a
    /// dedicated entry (Windows 7+).
    pub fn volume_header_block(&self) -> Option<VolumeHeaderBlockValue> {
        self.entries.iter().find_map(|entry| {
            match (entry.entry_type(), &entry.value) {
                (EntryType::VolumeHeaderBlock, EntryValue::VolumeHeaderBlock(block)) => {
                    Some(*block)
                }
                _ => None,
            }
        })
    }
}
