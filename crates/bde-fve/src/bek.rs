//! `.BEK` startup-key files.
//!
//! A startup key is a small file Windows writes to removable media: a
//! single FVE dataset whose only interesting entry is an external key
//! record carrying an identifier GUID and the raw unwrap key. The GUID is
//! matched against the startup-key protectors of the volume being
//! unlocked.

use crate::entry::{Entry, EntryValue, ExternalKeyValue, parse_entries};
use crate::error::FveError;
use crate::header::MetadataHeader;

/// A parsed `.BEK` startup-key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupKeyFile {
    pub header: MetadataHeader,
    pub entries: Vec<Entry>,
}

impl StartupKeyFile {
    /// Parses the full contents of a `.BEK` file.
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        let header = MetadataHeader::parse(data, 0)?;
        let dataset_end = header.metadata_size as usize;
        if data.len() < dataset_end {
            return Err(FveError::corrupt(
                0,
                format!(
                    "startup key file declares {:#x} bytes but holds {:#x}",
                    header.metadata_size,
                    data.len()
                ),
            ));
        }
        let entries = parse_entries(
            &data[MetadataHeader::SIZE..dataset_end],
            MetadataHeader::SIZE as u64,
        )?;
        let file = StartupKeyFile { header, entries };
        if file.external_key().is_none() {
            return Err(FveError::corrupt(
                0,
                "startup key file carries no external key entry",
            ));
        }
        Ok(file)
    }

    /// The external key record. Present on every file that parsed.
    pub fn external_key(&self) -> Option<&ExternalKeyValue> {
        self.entries.iter().find_map(|entry| match &entry.value {
            EntryValue::ExternalKey(external) => Some(external),
            _ => None,
        })
    }
}
