//! Archive volumes and split archive traversal
//!
//! A split archive `name.zip` made of `n` volumes is stored as
//! `name.z01`, `name.z02`, ..., `name.z<n-1>` followed by `name.zip` itself,
//! which holds the end of central directory. The first volume starts with a
//! 4 byte split signature
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Signature at the very start of the first volume of a split archive
pub const SPLIT_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Opens archive volumes by path
///
/// A volume is closed when the returned handle is dropped
pub trait VolumeProvider {
    /// The volume handle type
    type Volume: Read + Seek;

    /// Opens the volume at the given path
    fn open(&self, path: &Path) -> Result<Self::Volume, std::io::Error>;
}

impl<P: VolumeProvider + ?Sized> VolumeProvider for &P {
    type Volume = P::Volume;

    fn open(&self, path: &Path) -> Result<Self::Volume, std::io::Error> {
        (**self).open(path)
    }
}

/// A [`VolumeProvider`] backed by the local file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FsVolumeProvider;

impl VolumeProvider for FsVolumeProvider {
    type Volume = std::io::BufReader<std::fs::File>;

    fn open(&self, path: &Path) -> Result<Self::Volume, std::io::Error> {
        Ok(std::io::BufReader::new(std::fs::File::open(path)?))
    }
}

/// Returns the path of the volume with the given (0-based) index
///
/// The last volume is the archive itself
pub fn volume_path(archive: &Path, index: u32, count: u32) -> PathBuf {
    if index + 1 >= count {
        archive.to_path_buf()
    } else {
        archive.with_extension(format!("z{:02}", index + 1))
    }
}

/// A volume which could not be opened
///
/// Travels inside a [`std::io::Error`] (kind `NotFound`) so that it can cross
/// `Read` implementations
#[derive(Debug)]
pub struct MissingVolume {
    /// The volume path
    pub path: PathBuf,
    /// The error returned by the provider
    pub source: std::io::Error,
}

impl std::fmt::Display for MissingVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot open volume {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for MissingVolume {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl MissingVolume {
    pub(crate) fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, self)
    }

    /// Extracts a `MissingVolume` from an I/O error, giving the error back if
    /// it carries something else
    pub fn take(e: std::io::Error) -> Result<Self, std::io::Error> {
        if !e
            .get_ref()
            .is_some_and(|inner| inner.is::<MissingVolume>())
        {
            return Err(e);
        }
        match e.into_inner().map(|inner| inner.downcast::<MissingVolume>()) {
            Some(Ok(missing)) => Ok(*missing),
            // Checked above
            _ => Err(std::io::Error::other("volume error lost")),
        }
    }
}

/// A sequential reader over a (possibly split) archive
///
/// Reading starts at an offset within a given volume and transparently
/// continues into the following volumes. At most one volume is open at any
/// time
pub struct VolumeChain<'a, P: VolumeProvider> {
    /// Volume source
    provider: &'a P,
    /// Path of the archive (i.e. of the last volume)
    archive: &'a Path,
    /// Total number of volumes
    count: u32,
    /// Index of the current volume
    index: u32,
    /// Offset within the current volume
    offset: u64,
    /// The current volume handle
    current: Option<P::Volume>,
}

impl<'a, P: VolumeProvider> VolumeChain<'a, P> {
    /// Opens the chain at `offset` of volume `index`
    ///
    /// The split signature is verified when the first volume of a split
    /// archive is opened
    pub fn open(
        provider: &'a P,
        archive: &'a Path,
        count: u32,
        index: u32,
        offset: u64,
    ) -> Result<Self, std::io::Error> {
        if index >= count {
            return Err(crate::utils::invalid_data(format!(
                "Volume {index} is out of range (archive has {count} volumes)"
            )));
        }
        let mut ret = Self {
            provider,
            archive,
            count,
            index,
            offset,
            current: None,
        };
        let mut volume = ret.open_volume(index)?;
        volume.seek(SeekFrom::Start(offset))?;
        ret.current = Some(volume);
        Ok(ret)
    }

    fn open_volume(&self, index: u32) -> Result<P::Volume, std::io::Error> {
        let path = volume_path(self.archive, index, self.count);
        trace!("Opening volume {index} ({})", path.display());
        let mut volume = self
            .provider
            .open(&path)
            .map_err(|source| MissingVolume { path, source }.into_io())?;
        if index == 0 && self.count > 1 {
            let mut signature = [0u8; 4];
            volume.seek(SeekFrom::Start(0))?;
            volume.read_exact(&mut signature)?;
            if signature != SPLIT_SIGNATURE {
                return Err(crate::utils::invalid_data(
                    "Invalid split archive signature in the first volume",
                ));
            }
        }
        Ok(volume)
    }

    /// Current position as (volume index, offset within volume)
    pub fn position(&self) -> (u32, u64) {
        (self.index, self.offset)
    }
}

impl<P: VolumeProvider> Read for VolumeChain<'_, P> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let Some(volume) = self.current.as_mut() else {
                return Ok(0);
            };
            let len = volume.read(buf)?;
            if len > 0 {
                self.offset += len as u64;
                return Ok(len);
            }
            // Drop (close) the exhausted volume before moving on
            self.current = None;
            if self.index + 1 >= self.count {
                return Ok(0);
            }
            self.index += 1;
            self.offset = 0;
            debug!("Continuing into volume {}", self.index);
            self.current = Some(self.open_volume(self.index)?);
        }
    }
}
