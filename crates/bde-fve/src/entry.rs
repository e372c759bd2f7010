//! FVE metadata entries.
//!
//! The metadata dataset is a sequence of tagged, variable-length records:
//! an 8-byte header (`size`, `type`, `value type`, `version`) followed by
//! `size - 8` payload bytes. Several value types nest further entries in
//! their payload (volume master keys, external keys, stretch/use keys);
//! those are walked recursively. Unknown entry and value types are kept
//! raw and skipped with a diagnostic so newer volumes still open.

use binrw::prelude::*;
use std::fmt;
use std::io::Cursor;

use bde_dtyp::{FileTime, Guid};

use crate::error::FveError;

/// The fixed 8-byte header preceding every metadata entry.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct EntryHeader {
    /// Total entry size, header included. Always at least 8.
    pub size: u16,
    pub entry_type: u16,
    pub value_type: u16,
    pub version: u16,
}

impl EntryHeader {
    pub const SIZE: usize = 8;
}

/// What a metadata entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Property,
    VolumeMasterKey,
    FullVolumeEncryptionKey,
    Validation,
    StartupKey,
    Description,
    VolumeHeaderBlock,
    Unknown(u16),
}

impl From<u16> for EntryType {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => EntryType::Property,
            0x0002 => EntryType::VolumeMasterKey,
            0x0003 => EntryType::FullVolumeEncryptionKey,
            0x0004 => EntryType::Validation,
            0x0006 => EntryType::StartupKey,
            0x0007 => EntryType::Description,
            0x000f => EntryType::VolumeHeaderBlock,
            other => EntryType::Unknown(other),
        }
    }
}

/// How a metadata entry's payload is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Erased,
    Key,
    UnicodeString,
    StretchKey,
    UseKey,
    AesCcmEncryptedKey,
    TpmEncodedKey,
    ValidationInfo,
    VolumeMasterKey,
    ExternalKey,
    Update,
    VolumeHeaderBlock,
    Unknown(u16),
}

impl From<u16> for ValueType {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => ValueType::Erased,
            0x0001 => ValueType::Key,
            0x0002 => ValueType::UnicodeString,
            0x0003 => ValueType::StretchKey,
            0x0004 => ValueType::UseKey,
            0x0005 => ValueType::AesCcmEncryptedKey,
            0x0006 => ValueType::TpmEncodedKey,
            0x0007 => ValueType::ValidationInfo,
            0x0008 => ValueType::VolumeMasterKey,
            0x0009 => ValueType::ExternalKey,
            0x000a => ValueType::Update,
            0x000f => ValueType::VolumeHeaderBlock,
            other => ValueType::Unknown(other),
        }
    }
}

/// How a volume master key is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionType {
    ClearKey,
    Tpm,
    StartupKey,
    TpmAndPin,
    TpmAndStartupKey,
    TpmAndPinAndStartupKey,
    RecoveryPassword,
    Password,
    Unknown(u16),
}

impl From<u16> for ProtectionType {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => ProtectionType::ClearKey,
            0x0100 => ProtectionType::Tpm,
            0x0200 => ProtectionType::StartupKey,
            0x0400 => ProtectionType::TpmAndPin,
            0x0500 => ProtectionType::TpmAndStartupKey,
            0x0600 => ProtectionType::TpmAndPinAndStartupKey,
            0x0800 => ProtectionType::RecoveryPassword,
            0x2000 => ProtectionType::Password,
            other => ProtectionType::Unknown(other),
        }
    }
}

impl fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionType::ClearKey => write!(f, "clear key"),
            ProtectionType::Tpm => write!(f, "TPM"),
            ProtectionType::StartupKey => write!(f, "startup key"),
            ProtectionType::TpmAndPin => write!(f, "TPM and PIN"),
            ProtectionType::TpmAndStartupKey => write!(f, "TPM and startup key"),
            ProtectionType::TpmAndPinAndStartupKey => write!(f, "TPM, PIN and startup key"),
            ProtectionType::RecoveryPassword => write!(f, "recovery password"),
            ProtectionType::Password => write!(f, "password"),
            ProtectionType::Unknown(value) => write!(f, "unknown ({value:#06x})"),
        }
    }
}

/// A raw key: the unwrap material of clear-key protectors, and the
/// plaintext carried inside unwrapped VMK/FVEK blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Key algorithm tag as stored; not interpreted beyond diagnostics.
    pub method: u32,
    pub data: Vec<u8>,
}

/// Salted million-round key-derivation input for password-based protectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StretchKeyValue {
    pub method: u32,
    pub salt: [u8; 16],
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseKeyValue {
    pub method: u32,
    pub entries: Vec<Entry>,
}

/// An AES-CCM wrapped key blob. The authentication tag is stored ahead of
/// the ciphertext on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesCcmEncryptedKeyValue {
    pub nonce_time: FileTime,
    pub nonce_counter: u32,
    pub mac: [u8; 16],
    pub ciphertext: Vec<u8>,
}

impl AesCcmEncryptedKeyValue {
    /// The 12-byte CCM nonce: FILETIME followed by the counter, both
    /// little-endian.
    pub fn nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.nonce_time.0.to_le_bytes());
        nonce[8..].copy_from_slice(&self.nonce_counter.to_le_bytes());
        nonce
    }
}

/// A volume master key protector: identifier, protection type and the
/// nested entries carrying the wrap material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMasterKeyValue {
    pub identifier: Guid,
    pub last_modified: FileTime,
    pub unknown: u16,
    pub protection_type: ProtectionType,
    pub entries: Vec<Entry>,
}

/// An external key record, as found in `.BEK` startup-key files and
/// auto-unlock entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalKeyValue {
    pub identifier: Guid,
    pub last_modified: FileTime,
    pub entries: Vec<Entry>,
}

impl ExternalKeyValue {
    /// The raw key carried by the nested `key` entry, if present.
    pub fn key(&self) -> Option<&KeyValue> {
        self.entries.iter().find_map(|entry| match &entry.value {
            EntryValue::Key(key) => Some(key),
            _ => None,
        })
    }
}

/// Location of the relocated original volume-header sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeHeaderBlockValue {
    pub offset: u64,
    pub size: u64,
}

/// A metadata entry payload, decoded according to its value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    Erased,
    Key(KeyValue),
    UnicodeString(String),
    StretchKey(StretchKeyValue),
    UseKey(UseKeyValue),
    AesCcmEncryptedKey(AesCcmEncryptedKeyValue),
    TpmEncodedKey(Vec<u8>),
    ValidationInfo(Vec<u8>),
    VolumeMasterKey(VolumeMasterKeyValue),
    ExternalKey(ExternalKeyValue),
    Update(Vec<u8>),
    VolumeHeaderBlock(VolumeHeaderBlockValue),
    /// Forward compatibility: unknown value types are carried raw.
    Unknown { value_type: u16, data: Vec<u8> },
}

/// A metadata entry: its raw header plus the decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub header: EntryHeader,
    pub value: EntryValue,
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        EntryType::from(self.header.entry_type)
    }

    pub fn value_type(&self) -> ValueType {
        ValueType::from(self.header.value_type)
    }
}

/// Walks a dataset of metadata entries.
///
/// `base_offset` locates `data` on the underlying volume and is only used
/// for diagnostics. Walking stops once `data` is consumed; a zero-size or
/// overrunning entry is malformed and fails the whole dataset.
pub fn parse_entries(data: &[u8], base_offset: u64) -> crate::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let entry_offset = base_offset + pos as u64;
        if data.len() - pos < EntryHeader::SIZE {
            return Err(FveError::TruncatedEntry {
                offset: entry_offset,
            });
        }
        let header = EntryHeader::read_le(&mut Cursor::new(&data[pos..pos + EntryHeader::SIZE]))?;
        if (header.size as usize) < EntryHeader::SIZE {
            return Err(FveError::corrupt(
                entry_offset,
                format!("entry size {} smaller than its header", header.size),
            ));
        }
        if pos + header.size as usize > data.len() {
            return Err(FveError::TruncatedEntry {
                offset: entry_offset,
            });
        }
        let payload = &data[pos + EntryHeader::SIZE..pos + header.size as usize];
        let value = parse_value(&header, payload, entry_offset + EntryHeader::SIZE as u64)?;
        if let (EntryType::Unknown(t), EntryValue::Unknown { value_type, .. }) =
            (EntryType::from(header.entry_type), &value)
        {
            log::warn!(
                "skipping unrecognized metadata entry at {:#x} (type {:#06x}, value type {:#06x})",
                entry_offset,
                t,
                value_type
            );
        }
        entries.push(Entry { header, value });
        pos += header.size as usize;
    }
    Ok(entries)
}

fn parse_value(header: &EntryHeader, payload: &[u8], payload_offset: u64) -> crate::Result<EntryValue> {
    let truncated = || FveError::TruncatedEntry {
        offset: payload_offset,
    };
    let value = match ValueType::from(header.value_type) {
        ValueType::Erased => EntryValue::Erased,
        ValueType::Key => {
            if payload.len() < 4 {
                return Err(truncated());
            }
            EntryValue::Key(KeyValue {
                method: u32::from_le_bytes(payload[..4].try_into().expect("4-byte slice")),
                data: payload[4..].to_vec(),
            })
        }
        ValueType::UnicodeString => EntryValue::UnicodeString(decode_utf16le(payload)),
        ValueType::StretchKey => {
            if payload.len() < 20 {
                return Err(truncated());
            }
            EntryValue::StretchKey(StretchKeyValue {
                method: u32::from_le_bytes(payload[..4].try_into().expect("4-byte slice")),
                salt: payload[4..20].try_into().expect("16-byte slice"),
                entries: parse_entries(&payload[20..], payload_offset + 20)?,
            })
        }
        ValueType::UseKey => {
            if payload.len() < 4 {
                return Err(truncated());
            }
            EntryValue::UseKey(UseKeyValue {
                method: u32::from_le_bytes(payload[..4].try_into().expect("4-byte slice")),
                entries: parse_entries(&payload[4..], payload_offset + 4)?,
            })
        }
        ValueType::AesCcmEncryptedKey => {
            if payload.len() < 28 {
                return Err(truncated());
            }
            EntryValue::AesCcmEncryptedKey(AesCcmEncryptedKeyValue {
                nonce_time: FileTime(u64::from_le_bytes(
                    payload[..8].try_into().expect("8-byte slice"),
                )),
                nonce_counter: u32::from_le_bytes(payload[8..12].try_into().expect("4-byte slice")),
                mac: payload[12..28].try_into().expect("16-byte slice"),
                ciphertext: payload[28..].to_vec(),
            })
        }
        ValueType::TpmEncodedKey => EntryValue::TpmEncodedKey(payload.to_vec()),
        ValueType::ValidationInfo => EntryValue::ValidationInfo(payload.to_vec()),
        ValueType::VolumeMasterKey => {
            if payload.len() < 28 {
                return Err(truncated());
            }
            let mut cursor = Cursor::new(&payload[..24]);
            let identifier = Guid::read_le(&mut cursor)?;
            let last_modified = FileTime::read_le(&mut cursor)?;
            EntryValue::VolumeMasterKey(VolumeMasterKeyValue {
                identifier,
                last_modified,
                unknown: u16::from_le_bytes(payload[24..26].try_into().expect("2-byte slice")),
                protection_type: ProtectionType::from(u16::from_le_bytes(
                    payload[26..28].try_into().expect("2-byte slice"),
                )),
                entries: parse_entries(&payload[28..], payload_offset + 28)?,
            })
        }
        ValueType::ExternalKey => {
            if payload.len() < 24 {
                return Err(truncated());
            }
            let mut cursor = Cursor::new(&payload[..24]);
            let identifier = Guid::read_le(&mut cursor)?;
            let last_modified = FileTime::read_le(&mut cursor)?;
            EntryValue::ExternalKey(ExternalKeyValue {
                identifier,
                last_modified,
                entries: parse_entries(&payload[24..], payload_offset + 24)?,
            })
        }
        ValueType::Update => EntryValue::Update(payload.to_vec()),
        ValueType::VolumeHeaderBlock => {
            if payload.len() < 16 {
                return Err(truncated());
            }
            EntryValue::VolumeHeaderBlock(VolumeHeaderBlockValue {
                offset: u64::from_le_bytes(payload[..8].try_into().expect("8-byte slice")),
                size: u64::from_le_bytes(payload[8..16].try_into().expect("8-byte slice")),
            })
        }
        ValueType::Unknown(value_type) => {
            log::debug!(
                "unknown metadata value type {value_type:#06x} at {payload_offset:#x} ({} bytes kept raw)",
                payload.len()
            );
            EntryValue::Unknown {
                value_type,
                data: payload.to_vec(),
            }
        }
    };
    Ok(value)
}

fn decode_utf16le(payload: &[u8]) -> String {
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes(pair.try_into().expect("2-byte slice")))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}
