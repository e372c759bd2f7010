//! The Elephant diffuser used by the Vista-era CBC modes.
//!
//! Two keyless diffusion passes run over the sector between AES-CBC and
//! the sector-key XOR. Both work on the sector as an array of 32-bit
//! little-endian words and run five rounds of
//! `P[i] += P[(i+2) mod n] ^ rotl(P[(i+5) mod n], R[i mod 4])`, differing
//! only in rotation schedule and iteration direction.
//!
//! Only the decrypt direction ships; the inverses exist for building test
//! vectors.

const ROTATIONS_A: [u32; 4] = [9, 0, 13, 0];
const ROTATIONS_B: [u32; 4] = [0, 10, 0, 25];
const ROUNDS: usize = 5;

/// Runs `f` over the sector viewed as little-endian 32-bit words.
fn with_words(sector: &mut [u8], f: impl FnOnce(&mut [u32])) {
    debug_assert!(sector.len() % 4 == 0);
    let mut words: Vec<u32> = sector
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
        .collect();
    f(&mut words);
    for (chunk, word) in sector.chunks_exact_mut(4).zip(&words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Diffuser A, decrypt direction: ascending index order.
pub(crate) fn diffuser_a_decrypt(sector: &mut [u8]) {
    with_words(sector, |words| {
        let n = words.len();
        for _ in 0..ROUNDS {
            for i in 0..n {
                words[i] = words[i].wrapping_add(
                    words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(ROTATIONS_A[i % 4]),
                );
            }
        }
    });
}

/// Diffuser B, decrypt direction: descending index order.
pub(crate) fn diffuser_b_decrypt(sector: &mut [u8]) {
    with_words(sector, |words| {
        let n = words.len();
        for _ in 0..ROUNDS {
            for i in (0..n).rev() {
                words[i] = words[i].wrapping_add(
                    words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(ROTATIONS_B[i % 4]),
                );
            }
        }
    });
}

/// Inverse of [`diffuser_a_decrypt`], used to build encrypted fixtures.
#[cfg(test)]
pub(crate) fn diffuser_a_encrypt(sector: &mut [u8]) {
    with_words(sector, |words| {
        let n = words.len();
        for _ in 0..ROUNDS {
            for i in (0..n).rev() {
                words[i] = words[i].wrapping_sub(
                    words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(ROTATIONS_A[i % 4]),
                );
            }
        }
    });
}

/// Inverse of [`diffuser_b_decrypt`], used to build encrypted fixtures.
#[cfg(test)]
pub(crate) fn diffuser_b_encrypt(sector: &mut [u8]) {
    with_words(sector, |words| {
        let n = words.len();
        for _ in 0..ROUNDS {
            for i in 0..n {
                words[i] = words[i].wrapping_sub(
                    words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(ROTATIONS_B[i % 4]),
                );
            }
        }
    });
}
