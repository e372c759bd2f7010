//! The FVE key-stretch: a million-round SHA-256 loop that turns a password
//! or recovery key into the 256-bit key unwrapping its protector.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroizing;

use crate::Error;

const ITERATIONS: u64 = 0x10_0000;
/// The stretch loop polls the abort flag at this interval, bounding
/// cancellation latency to tens of milliseconds.
const ABORT_CHECK_INTERVAL: u64 = 4096;

// Layout of the 88-byte chained state that is hashed every round.
const LAST_HASH: std::ops::Range<usize> = 0..32;
const INITIAL_HASH: std::ops::Range<usize> = 32..64;
const SALT: std::ops::Range<usize> = 64..80;
const COUNTER: std::ops::Range<usize> = 80..88;

/// Derives the protector unwrap key from a credential and the protector's
/// salt.
///
/// The initial hash is `SHA-256(SHA-256(input))`; the input is the
/// UTF-16LE password bytes or the 16-byte binary recovery key. The state
/// `{last, initial, salt, counter}` is then rehashed 2^20 times. The
/// output depends only on `(input, salt)`.
pub(crate) fn stretch_key(
    input: &[u8],
    salt: &[u8; 16],
    abort: &AtomicBool,
) -> crate::Result<Zeroizing<[u8; 32]>> {
    let mut state = Zeroizing::new([0u8; 88]);
    let initial = Zeroizing::new(<[u8; 32]>::from(Sha256::digest(Sha256::digest(input))));
    state[INITIAL_HASH].copy_from_slice(initial.as_slice());
    state[SALT].copy_from_slice(salt);

    for counter in 0..ITERATIONS {
        if counter % ABORT_CHECK_INTERVAL == 0 && abort.load(Ordering::Relaxed) {
            log::debug!("key stretch aborted after {counter} rounds");
            return Err(Error::Aborted);
        }
        state[COUNTER].copy_from_slice(&counter.to_le_bytes());
        let digest = Sha256::digest(&state[..]);
        state[LAST_HASH].copy_from_slice(&digest);
    }

    let mut output = Zeroizing::new([0u8; 32]);
    output.copy_from_slice(&state[LAST_HASH]);
    Ok(output)
}
