//! Raw Deflate decompression (via zlib)
use std::io::Read;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Input buffer size
const BUFSIZ: usize = 8 * 1024;

fn zlib_error(kind: std::io::ErrorKind, msg: &str) -> std::io::Error {
    std::io::Error::new(kind, format!("Zlib error: {msg}"))
}

/// Allocates and initializes a zlib stream for raw inflation (no header)
fn new_raw_inflate() -> Result<Box<libz_sys::z_stream>, std::io::Error> {
    // z_stream carries two non nullable function pointers (zalloc and zfree)
    // which zlib expects to be zero in order to use its own allocator
    let mut z: Box<libz_sys::z_stream> = Box::new(unsafe {
        std::mem::transmute::<[u8; std::mem::size_of::<libz_sys::z_stream>()], libz_sys::z_stream>(
            [0; std::mem::size_of::<libz_sys::z_stream>()],
        )
    });
    let zres = unsafe {
        libz_sys::inflateInit2_(
            z.as_mut(),
            -15,
            libz_sys::zlibVersion(),
            std::mem::size_of::<libz_sys::z_stream>() as i32,
        )
    };
    match zres {
        libz_sys::Z_OK => Ok(z),
        libz_sys::Z_MEM_ERROR => Err(zlib_error(
            std::io::ErrorKind::OutOfMemory,
            "not enough memory to init state",
        )),
        libz_sys::Z_VERSION_ERROR => Err(zlib_error(
            std::io::ErrorKind::InvalidInput,
            "library version mismatch",
        )),
        v => Err(zlib_error(
            std::io::ErrorKind::InvalidInput,
            &format!("unexpected init result ({v})"),
        )),
    }
}

/// Streaming raw Deflate decompressor
///
/// Use the `Read` trait. The zlib state is released on drop
pub struct InflateStream<R: Read> {
    /// The compressed data source
    r: R,
    /// The z stream
    z: Box<libz_sys::z_stream>,
    /// Input buffer
    input: Box<[u8; BUFSIZ]>,
    /// End of Deflate stream reached
    eof: bool,
}

impl<R: Read> InflateStream<R> {
    /// Creates the decompressor
    pub fn new(r: R) -> Result<Self, std::io::Error> {
        Ok(Self {
            r,
            z: new_raw_inflate()?,
            input: Box::new([0u8; BUFSIZ]),
            eof: false,
        })
    }

    /// The compressed data source
    pub fn get_ref(&self) -> &R {
        &self.r
    }

    /// Mutable access to the compressed data source
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.r
    }

    /// Number of compressed bytes read from the source but not used
    ///
    /// Non zero after the end of the Deflate stream if trailing data follows it
    pub fn unused_input(&self) -> usize {
        self.z.avail_in as usize
    }

    /// Loads the next chunk of compressed input, returns false at the end of the source
    fn refill(&mut self) -> Result<bool, std::io::Error> {
        loop {
            match self.r.read(self.input.as_mut_slice()) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
                Ok(0) => return Ok(false),
                Ok(len) => {
                    self.z.next_in = self.input.as_mut_ptr();
                    self.z.avail_in = len as u32;
                    return Ok(true);
                }
            }
        }
    }

    fn inflate(&mut self, outbuf: &mut [u8]) -> Result<usize, std::io::Error> {
        if self.eof || outbuf.is_empty() {
            return Ok(0);
        }
        let outbuflen = outbuf.len().min(u32::MAX as usize) as u32;
        self.z.next_out = outbuf.as_mut_ptr();
        self.z.avail_out = outbuflen;
        while self.z.avail_out > 0 {
            // zlib may still hold output from input it already consumed,
            // so it always gets a go before the source is read
            let avail_in = self.z.avail_in;
            let avail_out = self.z.avail_out;
            let zres = unsafe { libz_sys::inflate(self.z.as_mut(), libz_sys::Z_NO_FLUSH) };
            match zres {
                // Z_BUF_ERROR is the no progress case, handled below
                libz_sys::Z_OK | libz_sys::Z_BUF_ERROR => {}
                libz_sys::Z_STREAM_END => {
                    trace!("End of Deflate stream");
                    self.eof = true;
                    break;
                }
                libz_sys::Z_NEED_DICT => {
                    return Err(zlib_error(
                        std::io::ErrorKind::InvalidData,
                        "Deflate stream requires a dictionary",
                    ))
                }
                libz_sys::Z_DATA_ERROR => {
                    let msg = if self.z.msg.is_null() {
                        "invalid Deflate stream".to_string()
                    } else {
                        unsafe { std::ffi::CStr::from_ptr(self.z.msg) }
                            .to_string_lossy()
                            .into_owned()
                    };
                    return Err(zlib_error(std::io::ErrorKind::InvalidData, &msg));
                }
                libz_sys::Z_MEM_ERROR => {
                    return Err(zlib_error(
                        std::io::ErrorKind::OutOfMemory,
                        "not enough memory to inflate",
                    ))
                }
                e => {
                    return Err(zlib_error(
                        std::io::ErrorKind::InvalidInput,
                        &format!("unexpected inflate result ({e})"),
                    ))
                }
            }
            if self.z.avail_out == 0 {
                break;
            }
            if self.z.avail_in == 0 {
                // Output space left and input drained: all pending output is out
                if !self.refill()? {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "Truncated Deflate stream",
                    ));
                }
            } else if self.z.avail_in == avail_in && self.z.avail_out == avail_out {
                return Err(zlib_error(
                    std::io::ErrorKind::InvalidData,
                    "inflate made no progress",
                ));
            }
        }
        Ok((outbuflen - self.z.avail_out) as usize)
    }
}

impl<R: Read> Read for InflateStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        self.inflate(buf)
    }
}

impl<R: Read> Drop for InflateStream<R> {
    fn drop(&mut self) {
        unsafe {
            libz_sys::inflateEnd(self.z.as_mut());
        }
    }
}
