//! AES-CBC sector decryption, with the optional Elephant diffuser stack
//! used by Vista and Windows 7 volumes.

use aes::cipher::consts::U16;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockCipher, BlockDecrypt, BlockEncrypt, BlockSizeUser, KeyInit};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, InnerIvInit};
use std::fmt;

use super::diffuser;
use super::{AES_BLOCK_SIZE, SectorDecryptor};
use crate::Error;

/// Per-sector AES-CBC decryptor. The sector IV is derived by ECB-encrypting
/// the sector's byte offset under the FVEK itself; when a tweak cipher is
/// present the diffuser stack runs after block decryption.
pub(crate) struct AesCbcDecryptor<C> {
    cipher: C,
    tweak_cipher: Option<C>,
}

impl<C> AesCbcDecryptor<C>
where
    C: KeyInit,
{
    pub(crate) fn new(key: &[u8], tweak_key: Option<&[u8]>) -> crate::Result<Self> {
        let cipher = C::new_from_slice(key)
            .map_err(|_| Error::InvalidData(format!("bad AES key length {}", key.len())))?;
        let tweak_cipher = tweak_key
            .map(|key| {
                C::new_from_slice(key).map_err(|_| {
                    Error::InvalidData(format!("bad AES tweak key length {}", key.len()))
                })
            })
            .transpose()?;
        Ok(AesCbcDecryptor {
            cipher,
            tweak_cipher,
        })
    }
}

impl<C> SectorDecryptor for AesCbcDecryptor<C>
where
    C: BlockCipher
        + BlockEncrypt
        + BlockDecrypt
        + BlockSizeUser<BlockSize = U16>
        + Clone
        + Send
        + Sync,
{
    fn decrypt_sector(&self, buffer: &mut [u8], disk_offset: u64) -> crate::Result<()> {
        if buffer.len() % AES_BLOCK_SIZE != 0 {
            return Err(Error::InvalidData(format!(
                "sector length {} is not block aligned",
                buffer.len()
            )));
        }
        let iv = derive_iv(&self.cipher, disk_offset);
        cbc::Decryptor::inner_iv_init(self.cipher.clone(), &iv.into())
            .decrypt_padded_mut::<NoPadding>(buffer)
            .map_err(|_| Error::InvalidData("CBC decryption failed".to_string()))?;

        if let Some(tweak_cipher) = &self.tweak_cipher {
            diffuser::diffuser_b_decrypt(buffer);
            diffuser::diffuser_a_decrypt(buffer);
            let sector_key = derive_sector_key(tweak_cipher, disk_offset);
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte ^= sector_key[i % sector_key.len()];
            }
        }
        Ok(())
    }
}

impl<C> fmt::Debug for AesCbcDecryptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tweak_cipher.is_some() {
            f.write_str("AesCbcDecryptor(diffuser)")
        } else {
            f.write_str("AesCbcDecryptor")
        }
    }
}

fn encrypt_block16<C>(cipher: &C, input: [u8; 16]) -> [u8; 16]
where
    C: BlockEncrypt + BlockSizeUser<BlockSize = U16>,
{
    let mut block = GenericArray::from(input);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// `IV = AES-ECB(FVEK, le_u64(offset) || 0^8)`
pub(crate) fn derive_iv<C>(cipher: &C, disk_offset: u64) -> [u8; 16]
where
    C: BlockEncrypt + BlockSizeUser<BlockSize = U16>,
{
    let mut block = [0u8; 16];
    block[..8].copy_from_slice(&disk_offset.to_le_bytes());
    encrypt_block16(cipher, block)
}

/// The 32-byte diffuser sector key: two ECB encryptions of the offset with
/// a marker bit, the second with the last plaintext byte incremented. The
/// result is XOR-repeated over the sector.
pub(crate) fn derive_sector_key<C>(tweak_cipher: &C, disk_offset: u64) -> [u8; 32]
where
    C: BlockEncrypt + BlockSizeUser<BlockSize = U16>,
{
    let mut block = [0u8; 16];
    block[..8].copy_from_slice(&disk_offset.to_le_bytes());
    block[8] = 0x80;

    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&encrypt_block16(tweak_cipher, block));
    block[15] += 1;
    key[16..].copy_from_slice(&encrypt_block16(tweak_cipher, block));
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::{Aes128, Aes256};
    use cbc::cipher::BlockEncryptMut;

    const SECTOR_SIZE: usize = 512;

    fn sample_sector() -> Vec<u8> {
        (0..SECTOR_SIZE).map(|i| (i * 31 + 7) as u8).collect()
    }

    /// Builds ciphertext the way BitLocker writes it, as the exact inverse
    /// of the decryption stack.
    fn encrypt_sector_fixture(
        key: &[u8],
        tweak_key: Option<&[u8]>,
        plaintext: &[u8],
        disk_offset: u64,
    ) -> Vec<u8> {
        let mut sector = plaintext.to_vec();
        if let Some(tweak_key) = tweak_key {
            let tweak_cipher = Aes128::new_from_slice(tweak_key).unwrap();
            let sector_key = derive_sector_key(&tweak_cipher, disk_offset);
            for (i, byte) in sector.iter_mut().enumerate() {
                *byte ^= sector_key[i % sector_key.len()];
            }
            diffuser::diffuser_a_encrypt(&mut sector);
            diffuser::diffuser_b_encrypt(&mut sector);
        }
        match key.len() {
            16 => {
                let cipher = Aes128::new_from_slice(key).unwrap();
                let iv = derive_iv(&cipher, disk_offset);
                cbc::Encryptor::inner_iv_init(cipher, &iv.into())
                    .encrypt_padded_mut::<NoPadding>(&mut sector, SECTOR_SIZE)
                    .unwrap();
            }
            32 => {
                let cipher = Aes256::new_from_slice(key).unwrap();
                let iv = derive_iv(&cipher, disk_offset);
                cbc::Encryptor::inner_iv_init(cipher, &iv.into())
                    .encrypt_padded_mut::<NoPadding>(&mut sector, SECTOR_SIZE)
                    .unwrap();
            }
            other => panic!("unsupported key length {other}"),
        }
        sector
    }

    #[test]
    fn test_aes128_cbc_round_trip() {
        let key = [0x31u8; 16];
        let ciphertext = encrypt_sector_fixture(&key, None, &sample_sector(), 0x8200);
        let decryptor = AesCbcDecryptor::<Aes128>::new(&key, None).unwrap();

        let mut sector = ciphertext;
        decryptor.decrypt_sector(&mut sector, 0x8200).unwrap();
        assert_eq!(sector, sample_sector());
    }

    #[test]
    fn test_aes256_cbc_round_trip() {
        let key = [0x87u8; 32];
        let ciphertext = encrypt_sector_fixture(&key, None, &sample_sector(), 0x0400);
        let decryptor = AesCbcDecryptor::<Aes256>::new(&key, None).unwrap();

        let mut sector = ciphertext;
        decryptor.decrypt_sector(&mut sector, 0x0400).unwrap();
        assert_eq!(sector, sample_sector());
    }

    #[test]
    fn test_aes128_cbc_diffuser_round_trip() {
        let key = [0x11u8; 16];
        let tweak_key = [0x99u8; 16];
        let ciphertext =
            encrypt_sector_fixture(&key, Some(&tweak_key), &sample_sector(), 0x1_0000);
        let decryptor = AesCbcDecryptor::<Aes128>::new(&key, Some(&tweak_key)).unwrap();

        let mut sector = ciphertext;
        decryptor.decrypt_sector(&mut sector, 0x1_0000).unwrap();
        assert_eq!(sector, sample_sector());
    }

    #[test]
    fn test_iv_depends_on_offset() {
        let key = [0x31u8; 16];
        let ciphertext = encrypt_sector_fixture(&key, None, &sample_sector(), 0x8200);
        let decryptor = AesCbcDecryptor::<Aes128>::new(&key, None).unwrap();

        // Decrypting at the wrong offset derails the first block only.
        let mut sector = ciphertext;
        decryptor.decrypt_sector(&mut sector, 0x8400).unwrap();
        assert_ne!(sector[..16], sample_sector()[..16]);
        assert_eq!(sector[16..], sample_sector()[16..]);
    }

    #[test]
    fn test_unaligned_sector_rejected() {
        let decryptor = AesCbcDecryptor::<Aes128>::new(&[0u8; 16], None).unwrap();
        let mut sector = [0u8; 100];
        assert!(decryptor.decrypt_sector(&mut sector, 0).is_err());
    }

    #[test]
    fn test_sector_key_blocks_differ() {
        let tweak_cipher = Aes128::new_from_slice(&[0x42; 16]).unwrap();
        let key = derive_sector_key(&tweak_cipher, 0x4000);
        assert_ne!(key[..16], key[16..]);
        assert_ne!(key, derive_sector_key(&tweak_cipher, 0x4200));
    }
}
