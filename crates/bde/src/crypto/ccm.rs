//! AES-CCM key unwrapping.
//!
//! Every wrapped key in the FVE metadata is an AES-CCM blob with a 12-byte
//! nonce, a 16-byte authentication tag and no associated data. The tag is
//! stored ahead of the ciphertext on disk, while the `ccm` crate expects it
//! appended, so the blob is rearranged before decryption. The key length
//! picks AES-128 or AES-256.

use aes::{Aes128, Aes256};
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{Aead, KeyInit};
use ccm::{
    Ccm,
    consts::{U12, U16},
};
use zeroize::Zeroizing;

use bde_fve::AesCcmEncryptedKeyValue;

use crate::Error;

type Aes128Ccm = Ccm<Aes128, U16, U12>;
type Aes256Ccm = Ccm<Aes256, U16, U12>;

/// Unwraps an FVE `aes_ccm_encrypted_key` blob.
///
/// An authentication failure means the unwrap key is wrong, i.e. the
/// credential it was derived from does not match this protector; that is
/// surfaced as [`Error::UnlockFailed`] so the protector walk can move on.
pub(crate) fn unwrap_wrapped_key(
    key: &[u8],
    wrapped: &AesCcmEncryptedKeyValue,
) -> crate::Result<Zeroizing<Vec<u8>>> {
    let mut message = Vec::with_capacity(wrapped.ciphertext.len() + wrapped.mac.len());
    message.extend_from_slice(&wrapped.ciphertext);
    message.extend_from_slice(&wrapped.mac);

    let nonce = wrapped.nonce();
    let nonce = GenericArray::from_slice(&nonce);
    let plaintext = match key.len() {
        16 => Aes128Ccm::new(GenericArray::from_slice(key)).decrypt(nonce, message.as_slice()),
        32 => Aes256Ccm::new(GenericArray::from_slice(key)).decrypt(nonce, message.as_slice()),
        other => {
            return Err(Error::InvalidData(format!(
                "unsupported unwrap key length {other}"
            )));
        }
    };
    plaintext.map(Zeroizing::new).map_err(|_| Error::UnlockFailed)
}

/// Wraps `plaintext` the way the FVE metadata stores it: tag first.
/// Fixture-building counterpart of [`unwrap_wrapped_key`].
#[cfg(test)]
pub(crate) fn wrap_key(
    key: &[u8],
    nonce_time: u64,
    nonce_counter: u32,
    plaintext: &[u8],
) -> AesCcmEncryptedKeyValue {
    use bde_dtyp::FileTime;

    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&nonce_time.to_le_bytes());
    nonce[8..].copy_from_slice(&nonce_counter.to_le_bytes());
    let nonce_ga = GenericArray::from_slice(&nonce);
    let mut sealed = match key.len() {
        16 => Aes128Ccm::new(GenericArray::from_slice(key))
            .encrypt(nonce_ga, plaintext)
            .unwrap(),
        32 => Aes256Ccm::new(GenericArray::from_slice(key))
            .encrypt(nonce_ga, plaintext)
            .unwrap(),
        other => panic!("unsupported key length {other}"),
    };
    let mac: [u8; 16] = sealed.split_off(sealed.len() - 16).try_into().unwrap();
    AesCcmEncryptedKeyValue {
        nonce_time: FileTime(nonce_time),
        nonce_counter,
        mac,
        ciphertext: sealed,
    }
}
