//! The key-protector unwrap chain: credentials in, FVEK out.
//!
//! Unlocking is a two-step walk. First every volume master key protector
//! matching a supplied credential kind is tried until one authenticates;
//! then the recovered VMK unwraps the volume's single wrapped FVEK. Both
//! unwrapped blobs are small nested datasets whose `key` entry carries the
//! actual material.

use std::sync::atomic::AtomicBool;
use zeroize::{Zeroize, Zeroizing};

use bde_fve::{
    AesCcmEncryptedKeyValue, EncryptionMethod, EntryValue, FveMetadata, KeyValue,
    ProtectionType, StretchKeyValue, VolumeMasterKeyValue, parse_entries,
};

use crate::keys::Credentials;
use crate::{Error, crypto};

/// Walks the volume master key protectors until one of the supplied
/// credentials unwraps a VMK.
///
/// Protectors whose kind has no matching credential are skipped; a
/// credential rejected by one protector does not stop the walk. Only the
/// abort flag and genuine I/O-free hard errors do.
pub(crate) fn recover_vmk(
    metadata: &FveMetadata,
    credentials: &Credentials,
    abort: &AtomicBool,
) -> crate::Result<Zeroizing<Vec<u8>>> {
    let mut candidates = 0u32;
    for vmk in metadata.volume_master_keys() {
        let unwrap_key: Zeroizing<Vec<u8>> = match vmk.protection_type {
            ProtectionType::ClearKey => match clear_key(vmk) {
                Some(key) => Zeroizing::new(key.data.clone()),
                None => {
                    log::warn!(
                        "clear-key protector {} carries no key entry",
                        vmk.identifier
                    );
                    continue;
                }
            },
            ProtectionType::RecoveryPassword => {
                let Some(recovery_password) = &credentials.recovery_password else {
                    continue;
                };
                let Some(stretch) = stretch_value(vmk) else {
                    log::warn!(
                        "recovery-password protector {} carries no stretch key",
                        vmk.identifier
                    );
                    continue;
                };
                let stretched =
                    crypto::stretch_key(recovery_password.as_bytes(), &stretch.salt, abort)?;
                Zeroizing::new(stretched.to_vec())
            }
            ProtectionType::Password => {
                let Some(password) = &credentials.password else {
                    continue;
                };
                let Some(stretch) = stretch_value(vmk) else {
                    log::warn!(
                        "password protector {} carries no stretch key",
                        vmk.identifier
                    );
                    continue;
                };
                let stretched = crypto::stretch_key(password, &stretch.salt, abort)?;
                Zeroizing::new(stretched.to_vec())
            }
            ProtectionType::StartupKey => {
                let Some(external) = &credentials.external_key else {
                    continue;
                };
                if external.identifier != vmk.identifier {
                    log::debug!(
                        "startup key {} does not match protector {}",
                        external.identifier,
                        vmk.identifier
                    );
                    continue;
                }
                external.key.clone()
            }
            other => {
                // TPM-family protectors need hardware attestation; skipped.
                log::debug!(
                    "no usable credential for protector {} ({other})",
                    vmk.identifier
                );
                continue;
            }
        };

        candidates += 1;
        let Some(wrapped) = wrapped_key(vmk) else {
            log::warn!("protector {} carries no wrapped key", vmk.identifier);
            continue;
        };
        match crypto::unwrap_wrapped_key(&unwrap_key, wrapped) {
            Ok(plaintext) => match extract_key(&plaintext) {
                Some(key) => {
                    log::debug!(
                        "protector {} ({}) unwrapped the volume master key",
                        vmk.identifier,
                        vmk.protection_type
                    );
                    return Ok(key);
                }
                None => {
                    log::warn!(
                        "unwrapped blob of protector {} carries no key entry",
                        vmk.identifier
                    );
                    continue;
                }
            },
            Err(Error::UnlockFailed) => {
                log::debug!("credential rejected by protector {}", vmk.identifier);
                continue;
            }
            Err(other) => return Err(other),
        }
    }
    log::debug!("unlock failed after trying {candidates} candidate protectors");
    Err(Error::UnlockFailed)
}

/// Unwraps the FVEK with a recovered VMK and checks it against the
/// volume's encryption method.
pub(crate) fn recover_fvek(
    metadata: &FveMetadata,
    vmk_key: &[u8],
    method: EncryptionMethod,
) -> crate::Result<Zeroizing<Vec<u8>>> {
    let wrapped = metadata.full_volume_encryption_key().ok_or_else(|| {
        Error::InvalidData("metadata carries no wrapped full volume encryption key".to_string())
    })?;
    let plaintext = crypto::unwrap_wrapped_key(vmk_key, wrapped)?;
    let key = extract_key(&plaintext).ok_or_else(|| {
        Error::InvalidData("unwrapped FVEK blob carries no key entry".to_string())
    })?;
    if key.len() < method.key_size() {
        return Err(Error::InvalidData(format!(
            "FVEK of {} bytes is too short for {method}",
            key.len()
        )));
    }
    if key.len() > method.key_size() {
        log::debug!(
            "FVEK entry is {} bytes, {method} uses the first {}",
            key.len(),
            method.key_size()
        );
    }
    Ok(key)
}

fn clear_key(vmk: &VolumeMasterKeyValue) -> Option<&KeyValue> {
    vmk.entries.iter().find_map(|entry| match &entry.value {
        EntryValue::Key(key) => Some(key),
        _ => None,
    })
}

fn stretch_value(vmk: &VolumeMasterKeyValue) -> Option<&StretchKeyValue> {
    vmk.entries.iter().find_map(|entry| match &entry.value {
        EntryValue::StretchKey(stretch) => Some(stretch),
        _ => None,
    })
}

/// The CCM-wrapped VMK blob: nested inside the stretch key for
/// password-based protectors, a direct sub-entry otherwise.
fn wrapped_key(vmk: &VolumeMasterKeyValue) -> Option<&AesCcmEncryptedKeyValue> {
    if let Some(stretch) = stretch_value(vmk) {
        let nested = stretch.entries.iter().find_map(|entry| match &entry.value {
            EntryValue::AesCcmEncryptedKey(wrapped) => Some(wrapped),
            _ => None,
        });
        if nested.is_some() {
            return nested;
        }
    }
    vmk.entries.iter().find_map(|entry| match &entry.value {
        EntryValue::AesCcmEncryptedKey(wrapped) => Some(wrapped),
        _ => None,
    })
}

/// Pulls the `key` entry out of an unwrapped blob, scrubbing every other
/// key copy the parse produced.
fn extract_key(plaintext: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    let mut entries = match parse_entries(plaintext, 0) {
        Ok(entries) => entries,
        Err(error) => {
            log::warn!("unwrapped blob is not a valid dataset: {error}");
            return None;
        }
    };
    let mut found = None;
    for entry in &mut entries {
        if let EntryValue::Key(key) = &mut entry.value {
            if found.is_none() {
                found = Some(Zeroizing::new(std::mem::take(&mut key.data)));
            } else {
                key.data.zeroize();
            }
        }
    }
    found
}
