//! Shared utility code

use std::io::{Read, Write};

/// Single byte `u8` reader
#[inline]
pub fn rdu8<R: Read>(r: &mut R) -> Result<u8, std::io::Error> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Little endian `u16` reader
#[inline]
pub fn rdu16le<R: Read>(r: &mut R) -> Result<u16, std::io::Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Little endian `u32` reader
#[inline]
pub fn rdu32le<R: Read>(r: &mut R) -> Result<u32, std::io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Little endian `u64` reader
#[inline]
pub fn rdu64le<R: Read>(r: &mut R) -> Result<u64, std::io::Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Shorthand for an [`InvalidData`](std::io::ErrorKind::InvalidData) error
pub fn invalid_data<E>(msg: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

#[derive(Debug)]
/// Error raised by a [`LimitedWriter`] when its limit is reached
pub struct WriteLimitExceeded;

impl std::fmt::Display for WriteLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Write limit exceeded")
    }
}

impl std::error::Error for WriteLimitExceeded {}

impl WriteLimitExceeded {
    /// Whether the I/O error was raised by a [`LimitedWriter`]
    pub fn is(e: &std::io::Error) -> bool {
        e.get_ref().is_some_and(|inner| inner.is::<WriteLimitExceeded>())
    }
}

/// A `Write` wrapper which caps the amount of data written
///
/// Once the cap is reached any further (non empty) write fails with
/// [`WriteLimitExceeded`] wrapped in an [`std::io::Error`]
pub struct LimitedWriter<W: Write> {
    w: W,
    /// Bytes still allowed (`None` means unlimited)
    available: Option<u64>,
    written: u64,
}

impl<W: Write> LimitedWriter<W> {
    /// Creates a new writer accepting at most `limit` bytes
    pub fn new(w: W, limit: Option<u64>) -> Self {
        Self {
            w,
            available: limit,
            written: 0,
        }
    }

    /// Number of bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, std::io::Error> {
        let write_len = match self.available {
            None => buf.len(),
            Some(_) if buf.is_empty() => 0,
            Some(0) => {
                return Err(std::io::Error::other(WriteLimitExceeded));
            }
            Some(avail) => buf.len().min(usize::try_from(avail).unwrap_or(usize::MAX)),
        };
        let written = self.w.write(&buf[0..write_len])?;
        if let Some(avail) = self.available.as_mut() {
            *avail -= written as u64;
        }
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), std::io::Error> {
        self.w.flush()
    }
}

/// Converts a DOS date and time pair into a calendar date/time
///
/// Returns `None` if the fields do not form a valid date/time
pub fn dostime_to_time(date: u16, time: u16) -> Option<time::PrimitiveDateTime> {
    let year: i32 = (((date >> 9) & 0x7f) + 1980).into();
    let month = time::Month::try_from(((date >> 5) & 0xf) as u8).ok()?;
    let day: u8 = (date & 0x1f) as u8;
    let hour: u8 = ((time >> 11) & 0x1f) as u8;
    let minute: u8 = ((time >> 5) & 0x3f) as u8;
    let second: u8 = ((time & 0x1f) << 1) as u8;
    Some(time::PrimitiveDateTime::new(
        time::Date::from_calendar_date(year, month, day).ok()?,
        time::Time::from_hms(hour, minute, second).ok()?,
    ))
}
