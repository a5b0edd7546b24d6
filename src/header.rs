//! Local header reader
//!
//! The local header is re-read right before the entry data: its variable
//! length name and extra fields determine where the data actually starts
use crate::crypto::PkVerifier;
use crate::error::{ExtractError, Result};
use crate::model::{EntryHeader, ExtraFields, GP_HAS_DATA_DESCRIPTOR};
use crate::utils::{invalid_data, rdu16le, rdu32le, rdu64le};
use std::io::Read;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

const LOCAL_HEADER_SIGNATURE: &[u8] = b"PK\x03\x04";
/// Size of the fixed part of a local header
const LOCAL_HEADER_FIXED_LEN: u64 = 30;

#[derive(Debug)]
/// A local file header
pub struct LocalHeader {
    /// Version needed to extract
    pub ver_to_extract: u16,
    /// General purpose bit flags
    pub gp_flag: u16,
    /// Compression method field as stored
    pub method: u16,
    /// Raw DOS modification time
    pub dos_time: u16,
    /// Raw DOS modification date
    pub dos_date: u16,
    /// CRC-32 (zero when a data descriptor follows the data)
    pub crc32: u32,
    /// Compressed size (zero when a data descriptor follows the data)
    pub compressed_size: u64,
    /// Uncompressed size (zero when a data descriptor follows the data)
    pub uncompressed_size: u64,
    /// Raw entry name
    pub name: Vec<u8>,
    /// Extra fields
    pub extras: ExtraFields,
}

impl LocalHeader {
    /// Reads and parses a local header
    pub fn read<R: Read>(r: &mut R) -> std::result::Result<Self, std::io::Error> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(invalid_data("Invalid local header signature"));
        }
        let ver_to_extract = rdu16le(r)?;
        let gp_flag = rdu16le(r)?;
        let method = rdu16le(r)?;
        let dos_time = rdu16le(r)?;
        let dos_date = rdu16le(r)?;
        let crc32 = rdu32le(r)?;
        let mut compressed_size = rdu32le(r)?.into();
        let mut uncompressed_size = rdu32le(r)?.into();
        let name_len = rdu16le(r)?;
        let extra_len = rdu16le(r)?;
        let mut name = vec![0u8; name_len.into()];
        r.read_exact(&mut name)?;
        let extras = ExtraFields::new(r, extra_len.into())?;
        if let Some(mut buf) = extras.field_data(0x0001) {
            for val in [&mut uncompressed_size, &mut compressed_size] {
                if *val == 0xffffffff {
                    match rdu64le(&mut buf) {
                        Ok(v) => *val = v,
                        Err(_) => {
                            warn!("Zip64 field overflow in local header");
                            break;
                        }
                    }
                }
            }
        }
        Ok(Self {
            ver_to_extract,
            gp_flag,
            method,
            dos_time,
            dos_date,
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extras,
        })
    }

    /// Length of the header, name and extra fields included
    pub fn size(&self) -> u64 {
        LOCAL_HEADER_FIXED_LEN + self.name.len() as u64 + self.extras.size() as u64
    }

    /// Cross checks the header against the central directory
    ///
    /// Only the compression method is compared: the central directory is
    /// authoritative for everything else
    pub fn reconcile(&self, entry: &EntryHeader) -> Result<()> {
        if self.method != entry.method {
            warn!(
                "Local header method {} differs from central method {} for {}",
                self.method, entry.method, entry.name
            );
            return Err(ExtractError::HeaderMismatch {
                entry: entry.name.clone(),
                central: entry.method,
                local: self.method,
            });
        }
        Ok(())
    }

    /// The PKWARE password verifier expected for `entry`
    ///
    /// Entries followed by a data descriptor are checked against the
    /// modification time, as the CRC was not known when the header was written
    pub fn pk_verifier(&self, entry: &EntryHeader) -> PkVerifier {
        let check = if self.gp_flag & GP_HAS_DATA_DESCRIPTOR != 0 {
            self.dos_time
        } else {
            (entry.crc32 >> 16) as u16
        };
        if self.ver_to_extract >= 20 {
            PkVerifier::Byte((check >> 8) as u8)
        } else {
            PkVerifier::Word(check)
        }
    }
}

/// Where the data of an entry is, relative to its starting volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataLocation {
    /// Volume holding the local header
    pub volume: u32,
    /// Offset of the local header within `volume`
    pub header_offset: u64,
    /// Length of the local header
    pub header_len: u64,
    /// Length of the encryption header
    pub encryption_header_len: u64,
}

impl DataLocation {
    /// Offset of the compressed payload, past the local and encryption
    /// headers
    ///
    /// The offset may exceed the size of `volume`, in which case the data
    /// starts in a later volume
    pub(crate) fn data_offset(&self) -> u64 {
        self.header_offset + self.header_len + self.encryption_header_len
    }
}

/// Reads and reconciles the local header of `entry` from `r`, which must be
/// positioned at `header_offset` of `volume`
///
/// On success `r` is left at the start of the encryption header (or data)
pub(crate) fn read_local_header<R: Read>(
    r: &mut R,
    entry: &EntryHeader,
    volume: u32,
    header_offset: u64,
) -> Result<(LocalHeader, DataLocation)> {
    let lh = LocalHeader::read(r)
        .map_err(|e| ExtractError::from_parse_in(&format!("local header of '{}'", entry.name), e))?;
    trace!("{:#x?}", lh);
    lh.reconcile(entry)?;
    let encryption_header_len = entry.encryption_header_len().ok_or_else(|| {
        ExtractError::InvalidArchive(format!(
            "WinZip AES extra field missing or invalid for '{}'",
            entry.name
        ))
    })?;
    let location = DataLocation {
        volume,
        header_offset,
        header_len: lh.size(),
        encryption_header_len,
    };
    debug!("Data location: {:?}", location);
    Ok((lh, location))
}
