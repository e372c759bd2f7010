//! Credential handling: recovery passwords, user passwords, startup keys
//! and raw FVEK input.

use std::fmt;
use zeroize::Zeroizing;

use bde_dtyp::Guid;

use crate::Error;

/// Number of digit groups in a recovery password.
const GROUP_COUNT: usize = 8;
/// Digits per group.
const GROUP_DIGITS: usize = 6;
/// Every valid group is a multiple of this; the quotient is the 16-bit key
/// chunk.
const GROUP_MODULUS: u32 = 11;

/// A validated 48-digit recovery password, held as the 16-byte binary key
/// it encodes.
#[derive(Clone)]
pub struct RecoveryPassword {
    key: Zeroizing<[u8; 16]>,
}

impl RecoveryPassword {
    /// Parses the textual form: 48 ASCII digits, with optional `-`
    /// separators splitting them into eight 6-digit groups. Each group must
    /// be divisible by 11 with a quotient fitting in 16 bits.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let digits: String = text.chars().filter(|c| *c != '-').collect();
        if digits.len() != GROUP_COUNT * GROUP_DIGITS {
            return Err(Error::InvalidCredential(format!(
                "recovery password has {} digits, expected {}",
                digits.len(),
                GROUP_COUNT * GROUP_DIGITS
            )));
        }
        if let Some(bad) = digits.chars().find(|c| !c.is_ascii_digit()) {
            return Err(Error::InvalidCredential(format!(
                "recovery password contains non-digit character {bad:?}"
            )));
        }

        let mut key = Zeroizing::new([0u8; 16]);
        for group_index in 0..GROUP_COUNT {
            let group = &digits[group_index * GROUP_DIGITS..(group_index + 1) * GROUP_DIGITS];
            let value: u32 = group
                .parse()
                .map_err(|_| Error::InvalidCredential("unparsable digit group".to_string()))?;
            if value % GROUP_MODULUS != 0 {
                return Err(Error::InvalidCredential(format!(
                    "digit group {} fails its checksum",
                    group_index + 1
                )));
            }
            let chunk = value / GROUP_MODULUS;
            if chunk > u32::from(u16::MAX) {
                return Err(Error::InvalidCredential(format!(
                    "digit group {} is out of range",
                    group_index + 1
                )));
            }
            key[group_index * 2..group_index * 2 + 2]
                .copy_from_slice(&(chunk as u16).to_le_bytes());
        }
        Ok(RecoveryPassword { key })
    }

    /// The 16-byte binary key; input to the key stretch.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.key
    }

    /// Formats the canonical grouped form. Parsing the result yields the
    /// same key.
    pub fn to_canonical_string(&self) -> String {
        (0..GROUP_COUNT)
            .map(|i| {
                let chunk = u16::from_le_bytes(self.key[i * 2..i * 2 + 2].try_into().unwrap());
                format!("{:06}", u32::from(chunk) * GROUP_MODULUS)
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Debug for RecoveryPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.write_str("RecoveryPassword(..)")
    }
}

/// Encodes a password the way Windows hashes it: UTF-16LE, no BOM, no
/// terminator.
pub(crate) fn password_to_utf16le(password: &str) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(
        password
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect(),
    )
}

/// Decodes a hex key string, as accepted for raw FVEK/tweak input.
pub(crate) fn decode_hex_key(hex: &str) -> crate::Result<Zeroizing<Vec<u8>>> {
    if hex.len() % 2 != 0 {
        return Err(Error::InvalidCredential(
            "hex key has an odd number of digits".to_string(),
        ));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| Error::InvalidCredential("invalid hex digit in key".to_string()))
        })
        .collect::<crate::Result<Vec<u8>>>()
        .map(Zeroizing::new)
}

/// An external (startup) key loaded from a `.BEK` file.
#[derive(Clone)]
pub(crate) struct ExternalKey {
    pub(crate) identifier: Guid,
    pub(crate) key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalKey({})", self.identifier)
    }
}

/// Raw FVEK material supplied directly by the caller, bypassing the
/// protector chain.
#[derive(Clone)]
pub(crate) struct RawFvek {
    pub(crate) key: Zeroizing<Vec<u8>>,
    pub(crate) tweak: Option<Zeroizing<Vec<u8>>>,
}

impl RawFvek {
    /// The combined FVEK payload: base key followed by the tweak half.
    pub(crate) fn combined(&self) -> Zeroizing<Vec<u8>> {
        let mut combined = Zeroizing::new(Vec::with_capacity(
            self.key.len() + self.tweak.as_ref().map_or(0, |t| t.len()),
        ));
        combined.extend_from_slice(&self.key);
        if let Some(tweak) = &self.tweak {
            combined.extend_from_slice(tweak);
        }
        combined
    }
}

impl fmt::Debug for RawFvek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawFvek(..)")
    }
}

/// Everything the caller has supplied so far. The unlock chain walks the
/// volume's protectors and uses whichever credential kind matches.
#[derive(Default)]
pub(crate) struct Credentials {
    pub(crate) recovery_password: Option<RecoveryPassword>,
    /// UTF-16LE bytes of the user password.
    pub(crate) password: Option<Zeroizing<Vec<u8>>>,
    pub(crate) external_key: Option<ExternalKey>,
    pub(crate) raw_fvek: Option<RawFvek>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only which kinds are present; never the material itself.
        f.debug_struct("Credentials")
            .field("recovery_password", &self.recovery_password.is_some())
            .field("password", &self.password.is_some())
            .field("external_key", &self.external_key.is_some())
            .field("raw_fvek", &self.raw_fvek.is_some())
            .finish()
    }
}
