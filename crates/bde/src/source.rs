//! The byte source a [`Volume`][crate::Volume] reads from.

use std::io::{Read, Seek, SeekFrom};

/// A length-bounded source of raw volume bytes supporting positional
/// reads. The volume borrows its source for its whole lifetime and issues
/// only reads.
///
/// A blanket implementation covers everything `Read + Seek`, so
/// `std::fs::File` and `std::io::Cursor` work out of the box.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes at `offset`, returning how many were
    /// read. Short reads only occur at the end of the source.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Total size of the source in bytes.
    fn size(&mut self) -> std::io::Result<u64>;
}

impl<T: Read + Seek> ByteSource for T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            }
        }
        Ok(total)
    }

    fn size(&mut self) -> std::io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }
}

/// Reads exactly `buf.len()` bytes at `offset`, failing on a short read.
pub(crate) fn read_exact_at<S: ByteSource + ?Sized>(
    source: &mut S,
    offset: u64,
    buf: &mut [u8],
) -> crate::Result<()> {
    let read = source.read_at(offset, buf)?;
    if read != buf.len() {
        return Err(crate::Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "short read at {offset:#x}: wanted {} bytes, got {read}",
                buf.len()
            ),
        )));
    }
    Ok(())
}
