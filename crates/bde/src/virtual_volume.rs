//! The virtual volume: random-access reads over the decrypted view.

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::crypto::SectorDecryptor;
use crate::region::{RegionKind, RegionMap};
use crate::source::{ByteSource, read_exact_at};
use crate::Error;

/// Decrypted sectors kept around; purely an optimisation, never
/// authoritative.
const CACHE_SECTORS: usize = 64;

/// Serves `read_random` requests by walking the region map, decrypting
/// sectors on demand and splicing the results together.
pub(crate) struct VirtualVolume {
    region_map: RegionMap,
    decryptor: Option<Box<dyn SectorDecryptor>>,
    bytes_per_sector: u32,
    cache: Option<LruCache<u64, Vec<u8>>>,
}

impl std::fmt::Debug for VirtualVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualVolume")
            .field("region_map", &self.region_map)
            .field("decryptor", &self.decryptor)
            .field("bytes_per_sector", &self.bytes_per_sector)
            .field("cached_sectors", &self.cache.as_ref().map_or(0, |c| c.len()))
            .finish()
    }
}

impl VirtualVolume {
    pub(crate) fn new(
        region_map: RegionMap,
        decryptor: Option<Box<dyn SectorDecryptor>>,
        bytes_per_sector: u32,
    ) -> crate::Result<VirtualVolume> {
        if bytes_per_sector == 0 {
            return Err(Error::InvalidData("sector size is zero".to_string()));
        }
        let capacity = NonZeroUsize::new(CACHE_SECTORS).expect("nonzero cache size");
        Ok(VirtualVolume {
            region_map,
            decryptor,
            bytes_per_sector,
            cache: Some(LruCache::new(capacity)),
        })
    }

    /// Drops the sector cache; reads must return identical bytes with and
    /// without it.
    #[cfg(test)]
    pub(crate) fn disable_cache(&mut self) {
        self.cache = None;
    }

    pub(crate) fn volume_size(&self) -> u64 {
        self.region_map.volume_size()
    }

    /// Reads up to `buf.len()` bytes at `offset`, clipping at the volume
    /// end. Reads beyond the end are an error; reads *at* the end return 0.
    pub(crate) fn read_random<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        offset: u64,
        buf: &mut [u8],
    ) -> crate::Result<usize> {
        let volume_size = self.region_map.volume_size();
        if offset > volume_size {
            return Err(Error::OutOfRange {
                offset,
                size: volume_size,
            });
        }
        let length = (buf.len() as u64).min(volume_size - offset) as usize;
        let mut done = 0usize;
        while done < length {
            let position = offset + done as u64;
            let region = *self.region_map.region_at(position).ok_or_else(|| {
                Error::InvalidData(format!("region map gap at {position:#x}"))
            })?;
            let span = ((region.end() - position) as usize).min(length - done);
            let out = &mut buf[done..done + span];
            match region.kind {
                RegionKind::Unencrypted => read_exact_at(source, position, out)?,
                RegionKind::MetadataBlock => out.fill(0),
                RegionKind::Encrypted => {
                    self.read_decrypted(source, position, region.offset, region.end(), None, out)?
                }
                RegionKind::Relocated { source_offset } => self.read_decrypted(
                    source,
                    position,
                    region.offset,
                    region.end(),
                    Some(source_offset),
                    out,
                )?,
            }
            done += span;
        }
        Ok(length)
    }

    /// Copies decrypted bytes for `[position, position + out.len())`,
    /// which lies inside a single encrypted region starting at
    /// `region_offset`. For relocated regions `source_base` is where the
    /// region's ciphertext actually lives.
    fn read_decrypted<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        position: u64,
        region_offset: u64,
        region_end: u64,
        source_base: Option<u64>,
        out: &mut [u8],
    ) -> crate::Result<()> {
        let sector_size = u64::from(self.bytes_per_sector);
        let mut done = 0usize;
        while done < out.len() {
            let logical = position + done as u64;
            let sector_start = logical - (logical % sector_size);
            let sector_len = sector_size.min(region_end - sector_start) as usize;
            let in_sector = (logical - sector_start) as usize;
            let take = (sector_len - in_sector).min(out.len() - done);

            if let Some(cached) = self
                .cache
                .as_mut()
                .and_then(|cache| cache.get(&sector_start))
            {
                out[done..done + take].copy_from_slice(&cached[in_sector..in_sector + take]);
                done += take;
                continue;
            }

            // Relocated ciphertext decrypts with the offsets it is stored
            // at, not the offsets it is served at.
            let disk_offset = match source_base {
                Some(base) => base + (sector_start - region_offset),
                None => sector_start,
            };
            let mut sector = vec![0u8; sector_len];
            read_exact_at(source, disk_offset, &mut sector)?;
            if let Some(decryptor) = &self.decryptor {
                decryptor.decrypt_sector(&mut sector, disk_offset)?;
            }
            out[done..done + take].copy_from_slice(&sector[in_sector..in_sector + take]);
            if let Some(cache) = self.cache.as_mut() {
                cache.put(sector_start, sector);
            }
            done += take;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::make_sector_decryptor;
    use crate::region::{Region, RegionLayout};
    use aes::Aes128;
    use aes::cipher::{BlockEncrypt, KeyInit};
    use bde_fve::EncryptionMethod;
    use std::io::Cursor;
    use xts_mode::{Xts128, get_tweak_default};

    const SECTOR: usize = 512;
    const VOLUME_SECTORS: usize = 64;
    const FVEK: [u8; 32] = [0x61; 32];

    fn plaintext_volume() -> Vec<u8> {
        (0..SECTOR * VOLUME_SECTORS)
            .map(|i| (i / SECTOR + i * 3) as u8)
            .collect()
    }

    /// Encrypts every sector of the plaintext image with AES-128-XTS,
    /// leaving holes for the fixture's metadata / relocation experiments.
    fn encrypted_volume(plaintext: &[u8]) -> Vec<u8> {
        let xts = Xts128::new(
            Aes128::new_from_slice(&FVEK[..16]).unwrap(),
            Aes128::new_from_slice(&FVEK[16..]).unwrap(),
        );
        let mut image = plaintext.to_vec();
        xts.encrypt_area(&mut image, SECTOR, 0, get_tweak_default);
        image
    }

    fn layout() -> RegionLayout {
        RegionLayout {
            volume_size: (SECTOR * VOLUME_SECTORS) as u64,
            encrypted_size: (SECTOR * VOLUME_SECTORS) as u64,
            volume_header_offset: 0,
            volume_header_size: 0,
            metadata_offsets: [0x4000, 0x5000, 0x6000],
            metadata_region_size: 0x1000,
        }
    }

    fn make_vvol() -> VirtualVolume {
        let map = RegionMap::build(&layout()).unwrap();
        let decryptor =
            make_sector_decryptor(EncryptionMethod::Aes128Xts, &FVEK, SECTOR as u32).unwrap();
        VirtualVolume::new(map, Some(decryptor), SECTOR as u32).unwrap()
    }

    #[test]
    fn test_read_spans_regions_and_zeroes_metadata() {
        let plaintext = plaintext_volume();
        let mut source = Cursor::new(encrypted_volume(&plaintext));
        let mut vvol = make_vvol();

        // A read crossing from the encrypted body into the three
        // back-to-back metadata blocks at 0x4000..0x7000 and out again.
        let mut buf = vec![0u8; 0x4800];
        let read = vvol.read_random(&mut source, 0x3000, &mut buf).unwrap();
        assert_eq!(read, 0x4800);
        assert_eq!(buf[..0x1000], plaintext[0x3000..0x4000]);
        assert!(buf[0x1000..0x4000].iter().all(|b| *b == 0));
        assert_eq!(buf[0x4000..], plaintext[0x7000..0x7800]);
    }

    #[test]
    fn test_unaligned_small_reads() {
        let plaintext = plaintext_volume();
        let mut source = Cursor::new(encrypted_volume(&plaintext));
        let mut vvol = make_vvol();

        let mut buf = [0u8; 7];
        vvol.read_random(&mut source, 0x1fd, &mut buf).unwrap();
        assert_eq!(buf[..], plaintext[0x1fd..0x204]);

        let mut one = [0u8; 1];
        assert_eq!(vvol.read_random(&mut source, 0, &mut one).unwrap(), 1);
        assert_eq!(one[0], plaintext[0]);
    }

    #[test]
    fn test_boundary_reads() {
        let plaintext = plaintext_volume();
        let mut source = Cursor::new(encrypted_volume(&plaintext));
        let mut vvol = make_vvol();
        let size = vvol.volume_size();

        // Zero-length read.
        assert_eq!(vvol.read_random(&mut source, 0, &mut []).unwrap(), 0);
        // Clipped at the end.
        let mut buf = [0u8; 64];
        let read = vvol.read_random(&mut source, size - 10, &mut buf).unwrap();
        assert_eq!(read, 10);
        assert_eq!(buf[..10], plaintext[plaintext.len() - 10..]);
        // At the end: nothing, but not an error.
        assert_eq!(vvol.read_random(&mut source, size, &mut buf).unwrap(), 0);
        // Past the end: error.
        assert!(matches!(
            vvol.read_random(&mut source, size + 1, &mut buf),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_relocated_region_serves_source_ciphertext() {
        let plaintext = plaintext_volume();
        let mut image = encrypted_volume(&plaintext);
        // Pretend the first sector's ciphertext lives at 0x7000: copy it
        // there and trash the in-place copy.
        let first: Vec<u8> = image[..SECTOR].to_vec();
        // Re-encrypt the first plaintext sector at its new disk position.
        let xts = Xts128::new(
            Aes128::new_from_slice(&FVEK[..16]).unwrap(),
            Aes128::new_from_slice(&FVEK[16..]).unwrap(),
        );
        let mut relocated = plaintext[..SECTOR].to_vec();
        xts.encrypt_area(&mut relocated, SECTOR, (0x7000 / SECTOR) as u128, get_tweak_default);
        image[0x7000..0x7000 + SECTOR].copy_from_slice(&relocated);
        image[..SECTOR].fill(0xee);
        drop(first);

        let mut custom = layout();
        custom.volume_header_offset = 0x7000;
        custom.volume_header_size = SECTOR as u64;
        let map = RegionMap::build(&custom).unwrap();
        let decryptor =
            make_sector_decryptor(EncryptionMethod::Aes128Xts, &FVEK, SECTOR as u32).unwrap();
        let mut vvol = VirtualVolume::new(map, Some(decryptor), SECTOR as u32).unwrap();

        let mut source = Cursor::new(image);
        let mut buf = [0u8; 16];
        vvol.read_random(&mut source, 0, &mut buf).unwrap();
        assert_eq!(buf[..], plaintext[..16]);
    }

    #[test]
    fn test_cache_is_transparent() {
        let plaintext = plaintext_volume();
        let image = encrypted_volume(&plaintext);

        let mut cached = make_vvol();
        let mut uncached = make_vvol();
        uncached.disable_cache();

        let mut source_a = Cursor::new(image.clone());
        let mut source_b = Cursor::new(image);
        // A read pattern with plenty of re-reads and overlaps.
        let offsets = [0u64, 0x200, 0x1fd, 0x3000, 0x200, 0x7e00, 0, 0x3fff];
        for offset in offsets {
            let mut a = vec![0u8; 0x300];
            let mut b = vec![0u8; 0x300];
            let read_a = cached.read_random(&mut source_a, offset, &mut a).unwrap();
            let read_b = uncached.read_random(&mut source_b, offset, &mut b).unwrap();
            assert_eq!(read_a, read_b);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_every_offset_reads_one_byte() {
        let plaintext = plaintext_volume();
        let mut source = Cursor::new(encrypted_volume(&plaintext));
        let mut vvol = make_vvol();
        // Check a sample of offsets across the whole volume.
        for offset in (0..vvol.volume_size()).step_by(509) {
            let mut byte = [0u8; 1];
            assert_eq!(vvol.read_random(&mut source, offset, &mut byte).unwrap(), 1);
        }
    }

    #[test]
    fn test_region_struct_helpers() {
        let region = Region {
            offset: 0x1000,
            size: 0x200,
            kind: RegionKind::Encrypted,
        };
        assert_eq!(region.end(), 0x1200);
    }
}
