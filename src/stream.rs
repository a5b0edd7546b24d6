//! Entry decompression stream
//!
//! Raw volume bytes are decrypted, then decompressed, then checksummed, all
//! behind a single `Read` implementation. The stream can be dropped at any
//! time; integrity is only verified by [`EntryStream::finish`]
use crate::crypto::Decrypter;
use crate::error::{ExtractError, Result};
use crate::inflate::InflateStream;
use crate::model::{CompressionMethod, EntryHeader};
use std::io::{Read, Take};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Decrypts the compressed payload of an entry
pub struct DecryptingReader<R: Read> {
    /// The raw payload, bounded to its size
    inner: Take<R>,
    decrypter: Decrypter,
}

impl<R: Read> DecryptingReader<R> {
    fn new(r: R, payload_size: u64, decrypter: Decrypter) -> Self {
        Self {
            inner: r.take(payload_size),
            decrypter,
        }
    }

    /// Payload bytes not read yet
    fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = self.inner.read(buf)?;
        self.decrypter.decrypt(&mut buf[0..len]);
        Ok(len)
    }
}

enum Decompressor<R: Read> {
    Store(R),
    Deflate(InflateStream<R>),
}

/// Outcome of a completely read entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Decompressed bytes produced
    pub bytes: u64,
    /// Whether the decompressor used up the whole compressed payload
    pub input_fully_consumed: bool,
}

/// A pull based stream over the decompressed data of one entry
///
/// Single use: one instance per extraction
pub struct EntryStream<R: Read> {
    /// Entry name, for error reporting
    name: String,
    inner: Decompressor<DecryptingReader<R>>,
    /// Compressed payload size (encryption overhead excluded)
    payload_size: u64,
    /// Running checksum of the decompressed data (not kept for AES entries)
    crc: Option<crc32fast::Hasher>,
    /// Decompressed bytes produced so far
    produced: u64,
}

impl<R: Read> EntryStream<R> {
    /// Creates the stream
    ///
    /// `raw` must be positioned at the start of the compressed payload, past
    /// the encryption header already consumed by `decrypter`
    pub fn new(entry: &EntryHeader, raw: R, decrypter: Decrypter) -> Result<Self> {
        let payload_size = entry
            .encryption_overhead()
            .and_then(|overhead| entry.compressed_size.checked_sub(overhead))
            .ok_or_else(|| {
                ExtractError::InvalidArchive(format!(
                    "compressed size of '{}' is smaller than its encryption overhead",
                    entry.name
                ))
            })?;
        let crc = match decrypter {
            Decrypter::Aes(_) => None,
            _ => Some(crc32fast::Hasher::new()),
        };
        let reader = DecryptingReader::new(raw, payload_size, decrypter);
        let inner = match entry.compression_method() {
            CompressionMethod::Store => Decompressor::Store(reader),
            CompressionMethod::Deflate => Decompressor::Deflate(InflateStream::new(reader)?),
            CompressionMethod::Unsupported(method) => {
                return Err(ExtractError::UnsupportedMethod {
                    entry: entry.name.clone(),
                    what: format!("compression method {method}"),
                })
            }
        };
        Ok(Self {
            name: entry.name.clone(),
            inner,
            payload_size,
            crc,
            produced: 0,
        })
    }

    fn reader(&self) -> &DecryptingReader<R> {
        match &self.inner {
            Decompressor::Store(r) => r,
            Decompressor::Deflate(d) => d.get_ref(),
        }
    }

    /// Compressed payload bytes consumed so far
    pub fn consumed_input(&self) -> u64 {
        self.payload_size - self.reader().remaining()
    }

    /// Decompressed bytes produced so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Maps an error returned by [`read`](Read::read) into an [`ExtractError`]
    ///
    /// Malformed or truncated data is an integrity failure of the entry
    pub fn map_error(&self, e: std::io::Error) -> ExtractError {
        match crate::volume::MissingVolume::take(e) {
            Ok(missing) => ExtractError::VolumeMissing {
                path: missing.path,
                source: missing.source,
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                let decrypter = &self.reader().decrypter;
                debug!("Stream error for {}: {e}", self.name);
                ExtractError::IntegrityFailure {
                    entry: self.name.clone(),
                    kind: decrypter.integrity_kind(),
                    hint: decrypter.password_hint(),
                }
            }
            Err(e) => ExtractError::Io(e),
        }
    }

    /// Verifies the integrity of a completely read entry
    ///
    /// Any payload left over by the decompressor is still run through the
    /// decrypter, so that the authentication code covers all of it
    pub fn finish(mut self, entry: &EntryHeader) -> Result<StreamSummary> {
        let computed_crc32 = self.crc.take().map(|h| h.finalize()).unwrap_or(0);
        let unused = match &self.inner {
            Decompressor::Store(_) => 0,
            Decompressor::Deflate(d) => d.unused_input() as u64,
        };
        let leftover = self.reader().remaining();
        if leftover > 0 {
            debug!("{leftover} payload bytes left unread for {}", self.name);
            let drained = std::io::copy(self.reader_mut(), &mut std::io::sink());
            if let Err(e) = drained {
                return Err(self.map_error(e));
            }
        }
        let input_fully_consumed = leftover == 0 && unused == 0;
        if !input_fully_consumed {
            warn!("Compressed data of {} not fully consumed", self.name);
        }
        if self.produced != entry.uncompressed_size {
            warn!(
                "Entry {} produced {} bytes, {} declared",
                self.name, self.produced, entry.uncompressed_size
            );
        }
        let reader = self.reader_mut();
        let decrypter = std::mem::replace(&mut reader.decrypter, Decrypter::Identity);
        decrypter.finalize(entry, reader.inner.get_mut(), computed_crc32)?;
        Ok(StreamSummary {
            bytes: self.produced,
            input_fully_consumed,
        })
    }

    fn reader_mut(&mut self) -> &mut DecryptingReader<R> {
        match &mut self.inner {
            Decompressor::Store(r) => r,
            Decompressor::Deflate(d) => d.get_mut(),
        }
    }
}

impl<R: Read> Read for EntryStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = match &mut self.inner {
            Decompressor::Store(r) => r.read(buf)?,
            Decompressor::Deflate(d) => d.read(buf)?,
        };
        if let Some(crc) = self.crc.as_mut() {
            crc.update(&buf[0..len]);
        }
        self.produced += len as u64;
        Ok(len)
    }
}
