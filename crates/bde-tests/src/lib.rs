//! Shared test utilities for the `bde-rs` workspace.
//!
//! Provides hex-fixture decoding and macros that generate binrw round-trip
//! tests from a value and its expected on-disk encoding.

pub use pastey;

/// Decodes a hex string into bytes. Panics on invalid input; this is a
/// test-only helper and a malformed fixture is a bug in the test itself.
pub fn decode_hex(hex: &str) -> Vec<u8> {
    let hex: String = hex.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    assert!(
        hex.len() % 2 == 0,
        "hex fixture has an odd number of digits"
    );
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).expect("hex fixture is not ASCII");
            u8::from_str_radix(s, 16).expect("invalid hex digit in fixture")
        })
        .collect()
}

/// Generates a test asserting that parsing the hex fixture yields the value.
#[macro_export]
macro_rules! test_binrw_read {
    ($ty:ty => $name:ident : $value:expr => $hex:literal) => {
        $crate::pastey::paste! {
            #[test]
            fn [<test_ $name _read>]() {
                let data = $crate::decode_hex($hex);
                let mut cursor = ::std::io::Cursor::new(&data);
                let parsed = <$ty as ::binrw::BinRead>::read_le(&mut cursor)
                    .expect("failed to parse fixture");
                assert_eq!(parsed, $value);
            }
        }
    };
}

/// Generates a test asserting that writing the value yields the hex fixture.
#[macro_export]
macro_rules! test_binrw_write {
    ($ty:ty => $name:ident : $value:expr => $hex:literal) => {
        $crate::pastey::paste! {
            #[test]
            fn [<test_ $name _write>]() {
                let mut cursor = ::std::io::Cursor::new(Vec::new());
                <$ty as ::binrw::BinWrite>::write_le(&$value, &mut cursor)
                    .expect("failed to write value");
                assert_eq!(cursor.into_inner(), $crate::decode_hex($hex));
            }
        }
    };
}

/// Generates both read and write round-trip tests for a value and its
/// on-disk encoding.
#[macro_export]
macro_rules! test_binrw {
    ($ty:ty => $name:ident : $value:expr => $hex:literal) => {
        $crate::test_binrw_read! { $ty => $name : $value => $hex }
        $crate::test_binrw_write! { $ty => $name : $value => $hex }
    };
}
