//! Cryptographic engine: sector ciphers, key unwrapping and key
//! stretching.
//!
//! The per-method sector ciphers hide behind the [`SectorDecryptor`] trait
//! object so the virtual volume never cares which of the five historical
//! modes is active. [`make_sector_decryptor`] is the factory keyed by the
//! metadata's encryption method.

mod cbc;
mod ccm;
pub(crate) mod diffuser;
mod stretch;
mod xts;

pub(crate) use ccm::unwrap_wrapped_key;
pub(crate) use stretch::stretch_key;

#[cfg(test)]
pub(crate) use cbc::{derive_iv, derive_sector_key};
#[cfg(test)]
pub(crate) use ccm::wrap_key;

use aes::{Aes128, Aes256};
use bde_fve::EncryptionMethod;

use crate::Error;

pub(crate) const AES_BLOCK_SIZE: usize = 16;

/// Transparent decryption of a single sector.
///
/// `disk_offset` is the byte offset of the ciphertext on the underlying
/// volume; the CBC modes derive their IV from it and the XTS modes their
/// tweak. Relocated sectors therefore pass the offset they are stored at,
/// not the offset they are served at.
pub trait SectorDecryptor: std::fmt::Debug + Send + Sync {
    fn decrypt_sector(&self, buffer: &mut [u8], disk_offset: u64) -> crate::Result<()>;
}

/// Builds the sector cipher for `method` from the FVEK material.
///
/// `fvek` is the full key entry payload: base key, followed by the tweak
/// half for the diffuser and XTS methods.
pub(crate) fn make_sector_decryptor(
    method: EncryptionMethod,
    fvek: &[u8],
    bytes_per_sector: u32,
) -> crate::Result<Box<dyn SectorDecryptor>> {
    if fvek.len() < method.key_size() {
        return Err(Error::InvalidData(format!(
            "FVEK of {} bytes is too short for {method}",
            fvek.len()
        )));
    }
    let decryptor: Box<dyn SectorDecryptor> = match method {
        EncryptionMethod::None => {
            return Err(Error::InvalidData(
                "no sector cipher for an unencrypted volume".to_string(),
            ));
        }
        EncryptionMethod::Aes128Cbc => {
            Box::new(cbc::AesCbcDecryptor::<Aes128>::new(&fvek[..16], None)?)
        }
        EncryptionMethod::Aes256Cbc => {
            Box::new(cbc::AesCbcDecryptor::<Aes256>::new(&fvek[..32], None)?)
        }
        EncryptionMethod::Aes128CbcDiffuser => Box::new(cbc::AesCbcDecryptor::<Aes128>::new(
            &fvek[..16],
            Some(&fvek[16..32]),
        )?),
        EncryptionMethod::Aes256CbcDiffuser => Box::new(cbc::AesCbcDecryptor::<Aes256>::new(
            &fvek[..32],
            Some(&fvek[32..64]),
        )?),
        EncryptionMethod::Aes128Xts => Box::new(xts::AesXtsDecryptor::<Aes128>::new(
            &fvek[..32],
            bytes_per_sector,
        )?),
        EncryptionMethod::Aes256Xts => Box::new(xts::AesXtsDecryptor::<Aes256>::new(
            &fvek[..64],
            bytes_per_sector,
        )?),
    };
    log::debug!("sector cipher ready: {decryptor:?} for {method}");
    Ok(decryptor)
}
