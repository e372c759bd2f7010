//! [`FileTime`] implementation for binrw.

use binrw::prelude::*;
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Offset between the FILETIME epoch (1601-01-01) and the Unix epoch
/// (1970-01-01), in 100ns intervals.
const UNIX_EPOCH_AS_FILETIME: i128 = 116_444_736_000_000_000;

/// A Windows FILETIME: the number of 100-nanosecond intervals since
/// 1601-01-01 00:00:00 UTC, stored as a little-endian u64.
#[derive(BinRead, BinWrite, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[brw(little)]
pub struct FileTime(pub u64);

impl FileTime {
    pub const SIZE: usize = 8;

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Converts to an [`OffsetDateTime`], or `None` when the value is out of
    /// the representable range.
    pub fn to_date_time(&self) -> Option<OffsetDateTime> {
        let nanos = (self.0 as i128 - UNIX_EPOCH_AS_FILETIME) * 100;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
    }
}

impl From<u64> for FileTime {
    fn from(value: u64) -> Self {
        FileTime(value)
    }
}

impl fmt::Display for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_date_time().and_then(|dt| dt.format(&Rfc3339).ok()) {
            Some(formatted) => write!(f, "{formatted}"),
            None => write!(f, "FILETIME({:#x})", self.0),
        }
    }
}

impl fmt::Debug for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileTime({self})")
    }
}
