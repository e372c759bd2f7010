//! AES-XTS sector decryption (Windows 10 and later).

use aes::cipher::consts::U16;
use aes::cipher::{BlockCipher, BlockDecrypt, BlockEncrypt, BlockSizeUser, KeyInit};
use std::fmt;
use xts_mode::{Xts128, get_tweak_default};

use super::SectorDecryptor;
use crate::Error;

/// Per-sector AES-XTS decryptor. The data unit is the sector; the tweak is
/// the sector number as a little-endian 128-bit value, which is exactly
/// what [`get_tweak_default`] produces.
pub(crate) struct AesXtsDecryptor<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16>,
{
    xts: Xts128<C>,
    bytes_per_sector: u32,
}

impl<C> AesXtsDecryptor<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
{
    /// `key` is the full XTS key: the data half followed by the tweak half.
    pub(crate) fn new(key: &[u8], bytes_per_sector: u32) -> crate::Result<Self> {
        if key.len() % 2 != 0 {
            return Err(Error::InvalidData(format!(
                "odd XTS key length {}",
                key.len()
            )));
        }
        let (data_key, tweak_key) = key.split_at(key.len() / 2);
        let cipher_1 = C::new_from_slice(data_key)
            .map_err(|_| Error::InvalidData(format!("bad XTS key length {}", key.len())))?;
        let cipher_2 = C::new_from_slice(tweak_key)
            .map_err(|_| Error::InvalidData(format!("bad XTS key length {}", key.len())))?;
        Ok(AesXtsDecryptor {
            xts: Xts128::new(cipher_1, cipher_2),
            bytes_per_sector,
        })
    }
}

impl<C> SectorDecryptor for AesXtsDecryptor<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + Send + Sync,
{
    fn decrypt_sector(&self, buffer: &mut [u8], disk_offset: u64) -> crate::Result<()> {
        if buffer.len() < 16 {
            return Err(Error::InvalidData(format!(
                "sector of {} bytes is too short for XTS",
                buffer.len()
            )));
        }
        let sector_number = disk_offset / u64::from(self.bytes_per_sector);
        self.xts.decrypt_area(
            buffer,
            buffer.len(),
            u128::from(sector_number),
            get_tweak_default,
        );
        Ok(())
    }
}

impl<C> fmt::Debug for AesXtsDecryptor<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesXtsDecryptor")
    }
}
