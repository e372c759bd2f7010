//! Common Windows data types shared by the `bde-rs` crates.
//!
//! The FVE metadata uses the usual Windows on-disk primitives: mixed-endian
//! GUIDs and 64-bit FILETIME timestamps. Both are implemented here with
//! binrw support so the format crates can embed them directly.

#![forbid(unsafe_code)]

pub mod filetime;
pub mod guid;

pub use filetime::FileTime;
pub use guid::Guid;
