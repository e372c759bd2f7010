//! Synthetic BitLocker volume builder shared by the integration tests.
//!
//! Everything here is built byte-by-byte and encrypted with the RustCrypto
//! crates directly, independent of the code under test: if the library and
//! the fixtures disagree, the tests fail.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, InnerIvInit};
use ccm::aead::Aead;
use ccm::consts::{U12, U16};
use ccm::Ccm;
use sha2::{Digest, Sha256};
use xts_mode::{Xts128, get_tweak_default};

pub const SECTOR: usize = 512;
pub const VOLUME_SIZE: usize = 0x10_0000; // 1 MiB
pub const METADATA_OFFSETS: [u64; 3] = [0x2_0000, 0x4_0000, 0x6_0000];
pub const VOLUME_HEADER_OFFSET: u64 = 0x8_0000;

pub const AES128_XTS: u32 = 0x8004;
pub const AES128_CBC: u32 = 0x8002;

pub const VMK_KEY: [u8; 32] = [0x3d; 32];

type Aes256Ccm = Ccm<aes::Aes256, U16, U12>;

pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// One serialized metadata entry.
pub fn raw_entry(entry_type: u16, value_type: u16, payload: &[u8]) -> Vec<u8> {
    let size = (8 + payload.len()) as u16;
    let mut raw = Vec::new();
    raw.extend_from_slice(&size.to_le_bytes());
    raw.extend_from_slice(&entry_type.to_le_bytes());
    raw.extend_from_slice(&value_type.to_le_bytes());
    raw.extend_from_slice(&1u16.to_le_bytes());
    raw.extend_from_slice(payload);
    raw
}

/// A serialized `key` entry, as carried inside unwrapped blobs.
pub fn key_blob(method: u32, key: &[u8]) -> Vec<u8> {
    let mut payload = method.to_le_bytes().to_vec();
    payload.extend_from_slice(key);
    raw_entry(0x0000, 0x0001, &payload)
}

/// AES-256-CCM wraps `plaintext` and serializes the blob the way the FVE
/// metadata stores it: nonce fields, then the tag, then the ciphertext.
pub fn ccm_wrap_entry(entry_type: u16, key: &[u8; 32], counter: u32, plaintext: &[u8]) -> Vec<u8> {
    let nonce_time: u64 = 0x01d9_8000_0000_0000;
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&nonce_time.to_le_bytes());
    nonce[8..].copy_from_slice(&counter.to_le_bytes());

    let cipher = Aes256Ccm::new(GenericArray::from_slice(key));
    let mut sealed = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .expect("CCM encryption");
    let mac = sealed.split_off(sealed.len() - 16);

    let mut payload = Vec::new();
    payload.extend_from_slice(&nonce_time.to_le_bytes());
    payload.extend_from_slice(&counter.to_le_bytes());
    payload.extend_from_slice(&mac);
    payload.extend_from_slice(&sealed);
    raw_entry(entry_type, 0x0005, &payload)
}

/// Independent implementation of the million-round key stretch.
pub fn stretch(input: &[u8], salt: &[u8; 16]) -> [u8; 32] {
    let initial: [u8; 32] = Sha256::digest(Sha256::digest(input)).into();
    let mut last = [0u8; 32];
    for counter in 0u64..0x10_0000 {
        let mut state = Vec::with_capacity(88);
        state.extend_from_slice(&last);
        state.extend_from_slice(&initial);
        state.extend_from_slice(salt);
        state.extend_from_slice(&counter.to_le_bytes());
        last = Sha256::digest(&state).into();
    }
    last
}

/// A VMK entry protected by a user password.
pub fn password_protector(password: &str, salt: [u8; 16], identifier: [u8; 16]) -> Vec<u8> {
    let stretched = stretch(&utf16le(password), &salt);

    let mut stretch_payload = 0x1000u32.to_le_bytes().to_vec();
    stretch_payload.extend_from_slice(&salt);
    stretch_payload.extend_from_slice(&ccm_wrap_entry(
        0x0000,
        &stretched,
        2,
        &key_blob(0x2003, &VMK_KEY),
    ));
    let stretch_entry = raw_entry(0x0000, 0x0003, &stretch_payload);

    let mut payload = Vec::new();
    payload.extend_from_slice(&identifier);
    payload.extend_from_slice(&0x01d9_0000u64.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&0x2000u16.to_le_bytes());
    payload.extend_from_slice(&stretch_entry);
    raw_entry(0x0002, 0x0008, &payload)
}

/// A VMK entry protected by an external (startup) key.
pub fn external_key_protector(identifier: [u8; 16], external_key: &[u8; 32]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&identifier);
    payload.extend_from_slice(&0x01d9_0000u64.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&0x0200u16.to_le_bytes());
    payload.extend_from_slice(&ccm_wrap_entry(
        0x0000,
        external_key,
        4,
        &key_blob(0x2003, &VMK_KEY),
    ));
    raw_entry(0x0002, 0x0008, &payload)
}

/// A VMK entry protected by a clear key.
pub fn clear_key_protector() -> Vec<u8> {
    let unwrap_key = [0x2b; 32];
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0x41; 16]);
    payload.extend_from_slice(&0x01d9_0000u64.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&0x0000u16.to_le_bytes());
    payload.extend_from_slice(&key_blob(0x2000, &unwrap_key));
    payload.extend_from_slice(&ccm_wrap_entry(
        0x0000,
        &unwrap_key,
        1,
        &key_blob(0x2003, &VMK_KEY),
    ));
    raw_entry(0x0002, 0x0008, &payload)
}

/// A `.BEK` startup-key file image.
pub fn bek_file(identifier: [u8; 16], external_key: &[u8; 32]) -> Vec<u8> {
    let mut key_payload = 0x2002u32.to_le_bytes().to_vec();
    key_payload.extend_from_slice(external_key);
    let key_entry = raw_entry(0x0000, 0x0001, &key_payload);

    let mut external_payload = Vec::new();
    external_payload.extend_from_slice(&identifier);
    external_payload.extend_from_slice(&0x01d9_0000u64.to_le_bytes());
    external_payload.extend_from_slice(&key_entry);
    let external_entry = raw_entry(0x0006, 0x0009, &external_payload);

    let mut raw = metadata_header_bytes((48 + external_entry.len()) as u32, identifier, 1, 0);
    raw.extend_from_slice(&external_entry);
    raw
}

fn metadata_header_bytes(
    metadata_size: u32,
    identifier: [u8; 16],
    nonce_counter: u32,
    method: u32,
) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&metadata_size.to_le_bytes());
    raw.extend_from_slice(&2u32.to_le_bytes());
    raw.extend_from_slice(&48u32.to_le_bytes());
    raw.extend_from_slice(&metadata_size.to_le_bytes());
    raw.extend_from_slice(&identifier);
    raw.extend_from_slice(&nonce_counter.to_le_bytes());
    raw.extend_from_slice(&method.to_le_bytes());
    raw.extend_from_slice(&0x01d9_0000_0000_0000u64.to_le_bytes());
    raw
}

fn block_header_bytes(encrypted_size: u64) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(b"-FVE-FS-");
    raw.extend_from_slice(&0x02f0u16.to_le_bytes());
    raw.extend_from_slice(&2u16.to_le_bytes()); // version
    raw.extend_from_slice(&[0u8; 4]);
    raw.extend_from_slice(&encrypted_size.to_le_bytes());
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&1u32.to_le_bytes()); // one relocated sector
    for offset in METADATA_OFFSETS {
        raw.extend_from_slice(&offset.to_le_bytes());
    }
    raw.extend_from_slice(&VOLUME_HEADER_OFFSET.to_le_bytes());
    raw
}

/// One full metadata copy: block header, metadata header, dataset.
pub fn metadata_copy(method: u32, protectors: &[Vec<u8>], fvek: &[u8]) -> Vec<u8> {
    let mut dataset = raw_entry(0x0007, 0x0002, &utf16le("ITLAB E: 07/31/2026"));
    for protector in protectors {
        dataset.extend_from_slice(protector);
    }
    dataset.extend_from_slice(&ccm_wrap_entry(
        0x0003,
        &VMK_KEY,
        7,
        &key_blob(0x2004, fvek),
    ));

    let mut raw = block_header_bytes(VOLUME_SIZE as u64);
    raw.extend_from_slice(&metadata_header_bytes(
        (48 + dataset.len()) as u32,
        [0x9c; 16],
        1,
        method,
    ));
    raw.extend_from_slice(&dataset);
    raw
}

/// The plaintext view the tests expect to read back: an NTFS-ish boot
/// sector, an MFT record signature at 0x200, and a position-dependent
/// fill everywhere else.
pub fn plaintext_volume() -> Vec<u8> {
    let mut plaintext: Vec<u8> = (0..VOLUME_SIZE).map(|i| (i / SECTOR ^ i) as u8).collect();
    let boot = original_boot_sector();
    plaintext[..SECTOR].copy_from_slice(&boot);
    plaintext[0x200..0x204].copy_from_slice(b"FILE");
    plaintext
}

pub fn original_boot_sector() -> Vec<u8> {
    let mut sector = vec![0u8; SECTOR];
    sector[0..3].copy_from_slice(&[0xeb, 0x52, 0x90]);
    sector[3..11].copy_from_slice(b"NTFS    ");
    sector[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    sector[13] = 8;
    sector[40..48].copy_from_slice(&((VOLUME_SIZE / SECTOR) as u64).to_le_bytes());
    sector[510..512].copy_from_slice(&[0x55, 0xaa]);
    sector
}

fn bitlocker_boot_sector() -> Vec<u8> {
    let mut sector = original_boot_sector();
    sector[160..176].copy_from_slice(&[
        0x3b, 0xd6, 0x67, 0x49, 0x29, 0x2e, 0xd8, 0x4a, 0x83, 0x99, 0xf6, 0xa3, 0x39, 0xe3,
        0xd0, 0x01,
    ]);
    for (slot, offset) in METADATA_OFFSETS.iter().enumerate() {
        sector[176 + slot * 8..184 + slot * 8].copy_from_slice(&offset.to_le_bytes());
    }
    sector
}

fn encrypt_sector(method: u32, fvek: &[u8], sector: &mut [u8], disk_offset: u64) {
    match method {
        AES128_XTS => {
            let xts = Xts128::new(
                Aes128::new_from_slice(&fvek[..16]).unwrap(),
                Aes128::new_from_slice(&fvek[16..32]).unwrap(),
            );
            xts.encrypt_area(
                sector,
                SECTOR,
                u128::from(disk_offset / SECTOR as u64),
                get_tweak_default,
            );
        }
        AES128_CBC => {
            let cipher = Aes128::new_from_slice(&fvek[..16]).unwrap();
            let mut iv = [0u8; 16];
            iv[..8].copy_from_slice(&disk_offset.to_le_bytes());
            let mut iv_block = GenericArray::from(iv);
            cipher.encrypt_block(&mut iv_block);
            cbc::Encryptor::inner_iv_init(cipher, &iv_block)
                .encrypt_padded_mut::<NoPadding>(sector, SECTOR)
                .unwrap();
        }
        other => panic!("fixture does not support method {other:#06x}"),
    }
}

/// Assembles a complete synthetic volume image.
pub fn build_image(method: u32, fvek: &[u8], protectors: &[Vec<u8>]) -> Vec<u8> {
    let plaintext = plaintext_volume();

    let mut image = plaintext.clone();
    for sector_index in 0..VOLUME_SIZE / SECTOR {
        let offset = sector_index * SECTOR;
        encrypt_sector(
            method,
            fvek,
            &mut image[offset..offset + SECTOR],
            offset as u64,
        );
    }

    // The relocated original boot sector, encrypted at its storage offset.
    let mut relocated = plaintext[..SECTOR].to_vec();
    encrypt_sector(method, fvek, &mut relocated, VOLUME_HEADER_OFFSET);
    image[VOLUME_HEADER_OFFSET as usize..VOLUME_HEADER_OFFSET as usize + SECTOR]
        .copy_from_slice(&relocated);

    image[..SECTOR].copy_from_slice(&bitlocker_boot_sector());

    let copy = metadata_copy(method, protectors, fvek);
    for offset in METADATA_OFFSETS {
        image[offset as usize..offset as usize + copy.len()].copy_from_slice(&copy);
    }
    image
}
