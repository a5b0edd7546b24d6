//! Archive model: end of central directory and central directory entries
//!
//! The model is built once, when the archive is opened, and is read-only
//! afterwards
use crate::crypto::AesStrength;
use crate::error::{ExtractError, Result};
use crate::utils::{dostime_to_time, invalid_data, rdu16le, rdu32le, rdu64le, rdu8};
use crate::volume::{VolumeChain, VolumeProvider};
use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";
const Z64_EOCD_LOCATOR_SIGNATURE: &[u8] = b"PK\x06\x07";
const Z64_EOCD_SIGNATURE: &[u8] = b"PK\x06\x06";
const CENTRAL_HEADER_SIGNATURE: &[u8] = b"PK\x01\x02";

pub(crate) const GP_IS_ENCRYPTED: u16 = 1 << 0;
pub(crate) const GP_HAS_DATA_DESCRIPTOR: u16 = 1 << 3;
pub(crate) const GP_IS_STRONG_ENCRYPTED: u16 = 1 << 6;

/// Zip64 extended information extra field
const EXTRA_ZIP64: u16 = 0x0001;
/// WinZip AES extra field
const EXTRA_AES: u16 = 0x9901;

/// Compression method value used in place of the real method by AES entries
pub const AES_METHOD_SENTINEL: u16 = 99;

/// Length of the PKWARE encryption header
pub const PK_HEADER_LEN: u64 = 12;
/// Length of the WinZip AES password verifier
pub const AES_VERIFIER_LEN: u64 = 2;
/// Length of the WinZip AES authentication code
pub const AES_AUTH_CODE_LEN: u64 = 10;

/// Offset correction for archives with prepended data (e.g. SFX stubs)
#[derive(Default, Debug, Clone, Copy)]
struct SfxAdjustment(i64);

impl SfxAdjustment {
    fn adjust(&self, value: u64) -> u64 {
        value.checked_add_signed(self.0).unwrap_or(value)
    }
}

#[derive(Debug)]
/// End of central directory
pub struct EndOfCentralDirectory {
    /// number of this disk
    pub disk_number: u16,
    /// number of the disk with the start of the central directory
    pub cd_first_disk: u16,
    /// total number of entries in the central directory on this disk
    pub entries_this_disk: u16,
    /// total number of entries in the central directory
    pub entries_total: u16,
    /// size of the central directory
    pub cd_size: u32,
    /// offset of start of central directory with respect to the starting disk number
    pub cd_offset_on_first_disk: u32,
    /// archive comment
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    fn new<R: Read>(mut r: R) -> std::result::Result<Self, std::io::Error> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if signature != EOCD_SIGNATURE {
            return Err(invalid_data("Invalid end of central directory signature"));
        }
        let mut ret = Self {
            disk_number: rdu16le(&mut r)?,
            cd_first_disk: rdu16le(&mut r)?,
            entries_this_disk: rdu16le(&mut r)?,
            entries_total: rdu16le(&mut r)?,
            cd_size: rdu32le(&mut r)?,
            cd_offset_on_first_disk: rdu32le(&mut r)?,
            comment: Vec::new(),
        };
        let comment_len = rdu16le(&mut r)?;
        if comment_len > 0 {
            r.take(comment_len.into()).read_to_end(&mut ret.comment)?;
            if ret.comment.len() != usize::from(comment_len) {
                warn!("Zip comment is truncated");
            }
        }
        Ok(ret)
    }
}

#[derive(Debug)]
/// End of central directory locator (zip64)
struct Z64EndOfCentralDirectoryLocator {
    /// number of the disk with the start of the zip64 end of central directory
    z64_eocd_disk: u32,
    /// relative offset of the zip64 end of central directory record
    z64_eocd_offset: u64,
    /// total number of disks
    n_disks: u32,
}

impl Z64EndOfCentralDirectoryLocator {
    fn new<R: Read>(mut r: R) -> std::result::Result<Option<Self>, std::io::Error> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if signature != Z64_EOCD_LOCATOR_SIGNATURE {
            Ok(None)
        } else {
            Ok(Some(Self {
                z64_eocd_disk: rdu32le(&mut r)?,
                z64_eocd_offset: rdu64le(&mut r)?,
                n_disks: rdu32le(&mut r)?,
            }))
        }
    }
}

#[derive(Debug)]
/// End of central directory (zip64)
pub struct Z64EndOfCentralDirectory {
    /// number of this disk
    pub disk_number: u32,
    /// number of the disk with the start of the central directory
    pub cd_first_disk: u32,
    /// total number of entries in the central directory on this disk
    pub entries_this_disk: u64,
    /// total number of entries in the central directory
    pub entries_total: u64,
    /// size of the central directory
    pub cd_size: u64,
    /// offset of start of central directory with respect to the starting disk number
    pub cd_offset_on_first_disk: u64,
}

impl Z64EndOfCentralDirectory {
    fn new<R: Read>(mut r: R) -> std::result::Result<Self, std::io::Error> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if signature != Z64_EOCD_SIGNATURE {
            return Err(invalid_data(
                "Invalid Zip64 end of central directory signature",
            ));
        }
        if rdu64le(&mut r)? < 44 {
            return Err(invalid_data("Invalid Zip64 end of central directory length"));
        }
        let _ver_made_by = rdu16le(&mut r)?;
        let _ver_to_extract = rdu16le(&mut r)?;
        Ok(Self {
            disk_number: rdu32le(&mut r)?,
            cd_first_disk: rdu32le(&mut r)?,
            entries_this_disk: rdu64le(&mut r)?,
            entries_total: rdu64le(&mut r)?,
            cd_size: rdu64le(&mut r)?,
            cd_offset_on_first_disk: rdu64le(&mut r)?,
        })
    }
}

/// Locates and parses the end of central directory records in the last volume
fn read_end_records<R: Read + Seek>(
    mut r: R,
) -> std::result::Result<
    (
        EndOfCentralDirectory,
        Option<Z64EndOfCentralDirectory>,
        SfxAdjustment,
    ),
    std::io::Error,
> {
    const BUFSIZ: u64 = 4 * 1024;
    let mut buf = [0u8; BUFSIZ as usize];
    let fsize = r.seek(SeekFrom::End(0))?;
    let mut off = fsize.saturating_sub(BUFSIZ);
    let (eocd, eocd_off, z64loc) = 'eocd: loop {
        debug!("Scanning for end of central header @{off:x}");
        off = r.seek(SeekFrom::Start(off))?;
        let buflen = (fsize - off).min(BUFSIZ) as usize;
        r.read_exact(&mut buf[0..buflen])?;
        for found_at in memchr::memmem::rfind_iter(&buf[0..buflen], EOCD_SIGNATURE) {
            let found_off = off + found_at as u64;
            debug!("Found end of central header @{:x}", found_off);
            let eocd = match EndOfCentralDirectory::new(&buf[found_at..buflen]) {
                Ok(eocd) => eocd,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    r.seek(SeekFrom::Start(found_off))?;
                    match EndOfCentralDirectory::new(&mut r) {
                        Ok(eocd) => eocd,
                        Err(_) => continue,
                    }
                }
                Err(e) => return Err(e),
            };
            let z64loc = if found_at >= 20 {
                Z64EndOfCentralDirectoryLocator::new(&buf[(found_at - 20)..found_at])?
            } else if found_off >= 20 {
                r.seek(SeekFrom::Start(found_off - 20))?;
                Z64EndOfCentralDirectoryLocator::new(&mut r)?
            } else {
                None
            };
            break 'eocd (eocd, found_off, z64loc);
        }
        if off == 0 {
            return Err(invalid_data(
                "Not a valid zip file (end of central directory not found)",
            ));
        }
        off = off.saturating_sub(BUFSIZ - 3);
    };
    debug!("EOCD: {:#x?}", eocd);
    debug!("Zip64 EOCD locator: {:#x?}", z64loc);

    let z64eocd = if let Some(loc) = z64loc.as_ref() {
        if loc.z64_eocd_disk != u32::from(eocd.disk_number) && eocd.disk_number != 0xffff {
            return Err(invalid_data(
                "Zip64 end of central directory is on a different disk",
            ));
        }
        r.seek(SeekFrom::Start(loc.z64_eocd_offset))?;
        let z64eocd = Z64EndOfCentralDirectory::new(&mut r)?;
        if z64eocd.disk_number != loc.z64_eocd_disk {
            return Err(invalid_data(
                "Zip64 end of central directory and its locator do not agree on this disk number",
            ));
        }
        if loc.n_disks != z64eocd.disk_number + 1 {
            warn!(
                "Zip64 locator declares {} disks, end record is on disk {}",
                loc.n_disks, z64eocd.disk_number
            );
        }
        debug!("Z64EOCD: {:#x?}", z64eocd);
        Some(z64eocd)
    } else {
        None
    };

    // Prepended data shifts every offset: detect it by comparing where the
    // central directory ends against where the end record was found
    let mut adjustment = SfxAdjustment::default();
    if z64eocd.is_none()
        && eocd.disk_number == 0
        && eocd.cd_first_disk == 0
        && eocd.cd_offset_on_first_disk != 0xffffffff
    {
        if let Some(actual_cd_offset) = eocd_off.checked_sub(u64::from(eocd.cd_size)) {
            if u64::from(eocd.cd_offset_on_first_disk) != actual_cd_offset {
                adjustment = SfxAdjustment(
                    actual_cd_offset.wrapping_sub(u64::from(eocd.cd_offset_on_first_disk)) as i64,
                );
                debug!("SFX stub adjustment: {:?} bytes", adjustment);
            }
        }
    }
    Ok((eocd, z64eocd, adjustment))
}

#[derive(Debug, Clone, Default)]
/// Zip extra fields
pub struct ExtraFields(Vec<u8>);

impl ExtraFields {
    pub(crate) fn new<R: Read>(r: &mut R, len: usize) -> std::result::Result<Self, std::io::Error> {
        let mut data = vec![0u8; len];
        r.read_exact(&mut data)?;
        Ok(Self(data))
    }

    /// Total size of the extra fields block
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Retrieves the field data for the given `id`, if field with such identifier is present.
    pub fn field_data(&self, field_id: u16) -> Option<&[u8]> {
        let mut extradata: &[u8] = self.0.as_ref();
        loop {
            let id = rdu16le(&mut extradata).ok()?;
            let len: usize = rdu16le(&mut extradata).ok()?.into();
            if id == field_id {
                return extradata.get(..len);
            }
            extradata = extradata.get(len..)?;
        }
    }
}

/// Compression method, as far as this crate is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression
    Store,
    /// Deflate
    Deflate,
    /// Anything else (raw method value)
    Unsupported(u16),
}

impl From<u16> for CompressionMethod {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Store,
            8 => Self::Deflate,
            other => Self::Unsupported(other),
        }
    }
}

/// Entry encryption method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    /// Not encrypted
    None,
    /// Traditional PKWARE encryption
    Standard,
    /// WinZip AE-1/AE-2
    Aes,
}

/// WinZip AES parameters from the entry extra field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesParams {
    /// AE-1 or AE-2
    pub vendor_version: u16,
    /// Key strength
    pub strength: AesStrength,
    /// The compression method actually applied to the data
    pub actual_method: u16,
}

/// Unknown but well formed parameters
fn unsupported(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Unsupported, msg)
}

impl AesParams {
    fn new(mut extradata: &[u8]) -> std::result::Result<Self, std::io::Error> {
        let (vendor_version, vendor_id, strength, actual_method) = (|| {
            Ok((
                rdu16le(&mut extradata)?,
                rdu16le(&mut extradata)?,
                rdu8(&mut extradata)?,
                rdu16le(&mut extradata)?,
            ))
        })()
        .map_err(|_: std::io::Error| invalid_data("WinZip AES extra field overflow"))?;
        if !(0x0001..=0x0002).contains(&vendor_version) {
            return Err(unsupported(format!(
                "WinZip AES version {vendor_version:04x}"
            )));
        }
        if vendor_id != 0x4541 {
            return Err(invalid_data(format!(
                "WinZip AES with unknown vendor id ({vendor_id:04x})"
            )));
        }
        let strength = AesStrength::try_from(strength)
            .map_err(|_| unsupported(format!("WinZip AES strength {strength}")))?;
        Ok(Self {
            vendor_version,
            strength,
            actual_method,
        })
    }
}

#[derive(Debug, Clone)]
/// A central directory entry
pub struct EntryHeader {
    /// Entry name (forward slash separated)
    pub name: String,
    /// Software version used to create an entry.
    pub ver_made_by: u16,
    /// General purpose bit flags.
    pub gp_flag: u16,
    /// Compression method field as stored (99 for AES entries)
    pub method: u16,
    /// Raw DOS modification time
    pub dos_time: u16,
    /// Raw DOS modification date
    pub dos_date: u16,
    /// Expected CRC-32 checksum.
    pub crc32: u32,
    /// Compressed size in bytes, including any encryption overhead.
    pub compressed_size: u64,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u64,
    /// Volume where the entry starts.
    pub disk_number: u32,
    /// Offset of the local header within its volume.
    pub local_header_offset: u64,
    /// External file attributes.
    pub external_attributes: u32,
    /// Entry comment.
    pub comment: Vec<u8>,
    /// Extra fields.
    pub extras: ExtraFields,
    /// Encryption method
    pub encryption: EncryptionMethod,
    /// WinZip AES parameters (AES entries only)
    pub aes: Option<AesParams>,
    /// Whether sizes or offsets came from the Zip64 extra field
    pub zip64: bool,
    /// Whether the entry is a directory
    pub is_directory: bool,
}

impl EntryHeader {
    /// Parses the WinZip AES extra field
    ///
    /// Fails with `ErrorKind::Unsupported` for an unknown version or strength
    /// and with `ErrorKind::InvalidData` if the field is missing or malformed
    pub(crate) fn aes_params(&self) -> std::result::Result<AesParams, std::io::Error> {
        match self.extras.field_data(EXTRA_AES) {
            Some(data) => AesParams::new(data),
            None => Err(invalid_data("WinZip AES extra field missing")),
        }
    }

    /// Attempts to read and parse a central directory record
    fn new<R: Read>(r: &mut R) -> std::result::Result<Self, std::io::Error> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(invalid_data("Invalid central header signature"));
        }
        let ver_made_by = rdu16le(r)?;
        let _ver_to_extract = rdu16le(r)?;
        let gp_flag = rdu16le(r)?;
        let method = rdu16le(r)?;
        let dos_time = rdu16le(r)?;
        let dos_date = rdu16le(r)?;
        let crc32 = rdu32le(r)?;
        let mut compressed_size = rdu32le(r)?.into();
        let mut uncompressed_size = rdu32le(r)?.into();
        let fname_len = rdu16le(r)?;
        let extra_len = rdu16le(r)?;
        let comment_len = rdu16le(r)?;
        let mut disk_number = rdu16le(r)?.into();
        let _internal_attributes = rdu16le(r)?;
        let external_attributes = rdu32le(r)?;
        let mut local_header_offset = rdu32le(r)?.into();
        let mut file_name = vec![0u8; fname_len.into()];
        r.read_exact(&mut file_name)?;
        let extras = ExtraFields::new(r, extra_len.into())?;
        let mut comment = vec![0u8; comment_len.into()];
        r.read_exact(&mut comment)?;

        let mut zip64 = false;
        if let Some(mut buf) = extras.field_data(EXTRA_ZIP64) {
            // Only the masked fields are present, in this order
            for val in [
                &mut uncompressed_size,
                &mut compressed_size,
                &mut local_header_offset,
            ] {
                if *val == 0xffffffff {
                    match rdu64le(&mut buf) {
                        Ok(v) => {
                            *val = v;
                            zip64 = true;
                        }
                        Err(_) => {
                            warn!("Zip64 field overflow");
                            break;
                        }
                    }
                }
            }
            if disk_number == 0xffff {
                match rdu32le(&mut buf) {
                    Ok(v) => {
                        disk_number = v;
                        zip64 = true;
                    }
                    Err(_) => warn!("Zip64 field overflow"),
                }
            }
        }

        let name = String::from_utf8_lossy(&file_name).replace('\\', "/");
        let (encryption, aes) = if gp_flag & GP_IS_ENCRYPTED == 0 {
            (EncryptionMethod::None, None)
        } else if method == AES_METHOD_SENTINEL {
            let aes = match extras.field_data(EXTRA_AES).map(AesParams::new) {
                Some(Ok(params)) => Some(params),
                Some(Err(e)) => {
                    warn!("Entry {name}: {e}");
                    None
                }
                None => {
                    warn!("Entry {name}: WinZip AES without extra field");
                    None
                }
            };
            (EncryptionMethod::Aes, aes)
        } else {
            (EncryptionMethod::Standard, None)
        };
        let is_directory = name.ends_with('/');

        Ok(Self {
            name,
            ver_made_by,
            gp_flag,
            method,
            dos_time,
            dos_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            local_header_offset,
            external_attributes,
            comment,
            extras,
            encryption,
            aes,
            zip64,
            is_directory,
        })
    }

    /// The compression method actually applied to the data
    ///
    /// For AES entries this comes from the AES extra field, as the main field
    /// only holds the AES sentinel
    pub fn compression_method(&self) -> CompressionMethod {
        match (self.encryption, self.aes) {
            (EncryptionMethod::Aes, Some(aes)) => aes.actual_method.into(),
            _ => self.method.into(),
        }
    }

    /// Whether the entry is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encryption != EncryptionMethod::None
    }

    /// Length of the encryption header preceding the compressed data
    ///
    /// `None` for AES entries with missing or invalid AES parameters
    pub fn encryption_header_len(&self) -> Option<u64> {
        match self.encryption {
            EncryptionMethod::None => Some(0),
            EncryptionMethod::Standard => Some(PK_HEADER_LEN),
            EncryptionMethod::Aes => self
                .aes
                .map(|aes| aes.strength.salt_len() as u64 + AES_VERIFIER_LEN),
        }
    }

    /// Total encryption overhead (header and trailer) included in the compressed size
    pub fn encryption_overhead(&self) -> Option<u64> {
        let trailer = if self.encryption == EncryptionMethod::Aes {
            AES_AUTH_CODE_LEN
        } else {
            0
        };
        self.encryption_header_len().map(|len| len + trailer)
    }

    /// Size of the compressed payload proper, i.e. without encryption overhead
    pub fn payload_size(&self) -> u64 {
        self.compressed_size
            .saturating_sub(self.encryption_overhead().unwrap_or(0))
    }

    /// Modification time (from the DOS date/time fields)
    pub fn mtime(&self) -> Option<time::PrimitiveDateTime> {
        dostime_to_time(self.dos_date, self.dos_time)
    }

    /// Unix permission bits, if the entry was created on a Unix system
    pub fn unix_mode(&self) -> Option<u32> {
        const ORIGIN_UNIX: u16 = 3;
        let mode = self.external_attributes >> 16;
        (self.ver_made_by >> 8 == ORIGIN_UNIX && mode != 0).then_some(mode)
    }

    /// The entry name without any trailing separator
    pub fn path_name(&self) -> &str {
        self.name.trim_end_matches('/')
    }
}

/// Returns the set of directory paths implied by a list of entry names
///
/// This covers explicit directory entries (trailing `/`) as well as every
/// parent path of every entry. Paths are returned without trailing separators
pub fn directory_set<'a, I>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dirs = BTreeSet::new();
    for name in names {
        if name.ends_with('/') {
            let dir = name.trim_end_matches('/');
            if !dir.is_empty() {
                dirs.insert(dir.to_string());
            }
        }
        let trimmed = name.trim_end_matches('/');
        let mut end = trimmed.len();
        while let Some(pos) = trimmed[..end].rfind('/') {
            if pos > 0 && !dirs.insert(trimmed[..pos].to_string()) {
                // Already known, and so are its parents
                break;
            }
            end = pos;
        }
    }
    dirs
}

/// A loaded archive
#[derive(Debug)]
pub struct ArchiveModel {
    /// Path of the archive (for split archives, the last volume)
    path: PathBuf,
    /// End of central directory
    pub eocd: EndOfCentralDirectory,
    /// End of central directory (zip64 version)
    pub z64eocd: Option<Z64EndOfCentralDirectory>,
    /// Prepended data correction
    adjustment: SfxAdjustment,
    /// Central directory entries, in order
    entries: Vec<EntryHeader>,
    /// Entry index by name
    by_name: HashMap<String, usize>,
    /// Directories implied by entry paths but without an entry of their own
    implicit_dirs: Vec<String>,
}

impl ArchiveModel {
    /// Loads the archive model through the given volume provider
    ///
    /// `path` is the archive itself, i.e. the last volume of a split archive
    #[instrument(level = "debug", skip(provider))]
    pub fn open<P: VolumeProvider>(provider: &P, path: &Path) -> Result<Self> {
        let (eocd, z64eocd, adjustment) = {
            let volume = provider.open(path).map_err(|source| ExtractError::VolumeMissing {
                path: path.to_path_buf(),
                source,
            })?;
            read_end_records(volume).map_err(ExtractError::from_parse)?
        };
        let mut ret = Self {
            path: path.to_path_buf(),
            eocd,
            z64eocd,
            adjustment,
            entries: Vec::new(),
            by_name: HashMap::new(),
            implicit_dirs: Vec::new(),
        };
        if ret.cd_first_disk() > ret.disk_number() {
            return Err(ExtractError::InvalidArchive(
                "Central directory starts after the last volume".to_string(),
            ));
        }
        ret.read_central_directory(provider)?;
        ret.derive_directories();
        debug!(
            "Loaded {} entries from {} volume(s)",
            ret.entries.len(),
            ret.volume_count()
        );
        Ok(ret)
    }

    fn read_central_directory<P: VolumeProvider>(&mut self, provider: &P) -> Result<()> {
        let total = self.entries_total();
        let entries = {
            let mut chain = VolumeChain::open(
                provider,
                &self.path,
                self.volume_count(),
                self.cd_first_disk(),
                self.adjust(self.cd_offset_on_first_disk()),
            )
            .map_err(ExtractError::from_parse)?;
            // Do not trust the declared count for preallocation
            let mut entries = Vec::with_capacity(total.min(4096) as usize);
            for idx in 0..total {
                let entry = EntryHeader::new(&mut chain).map_err(|e| {
                    ExtractError::from_parse_in(&format!("central directory entry #{idx}"), e)
                })?;
                trace!("{:#x?}", entry);
                entries.push(entry);
            }
            entries
        };
        self.by_name = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        self.entries = entries;
        Ok(())
    }

    /// Marks entries which are parents of other entries as directories and
    /// records the directories which lack an entry of their own
    ///
    /// This runs exactly once, while the model is loaded
    fn derive_directories(&mut self) {
        let dirs = directory_set(self.entries.iter().map(|e| e.name.as_str()));
        for entry in self.entries.iter_mut() {
            if !entry.is_directory && dirs.contains(entry.path_name()) {
                debug!("Entry {} is a directory", entry.name);
                entry.is_directory = true;
            }
        }
        let explicit: BTreeSet<&str> = self
            .entries
            .iter()
            .filter(|e| e.is_directory)
            .map(|e| e.path_name())
            .collect();
        self.implicit_dirs = dirs
            .iter()
            .filter(|d| !explicit.contains(d.as_str()))
            .cloned()
            .collect();
    }

    /// Path of the archive
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the archive is Zip64
    pub fn is_zip64(&self) -> bool {
        self.z64eocd.is_some()
    }

    /// Whether the archive is split across several volumes
    pub fn is_split(&self) -> bool {
        self.volume_count() > 1
    }

    /// Index of the volume holding the end of central directory
    pub fn disk_number(&self) -> u32 {
        self.z64eocd
            .as_ref()
            .map(|eocd| eocd.disk_number)
            .unwrap_or_else(|| self.eocd.disk_number.into())
    }

    /// Total number of volumes
    pub fn volume_count(&self) -> u32 {
        self.disk_number().saturating_add(1)
    }

    /// Number of the disk with the start of the central directory
    pub fn cd_first_disk(&self) -> u32 {
        self.z64eocd
            .as_ref()
            .map(|eocd| eocd.cd_first_disk)
            .unwrap_or_else(|| self.eocd.cd_first_disk.into())
    }

    /// Total number of entries in the central directory
    pub fn entries_total(&self) -> u64 {
        self.z64eocd
            .as_ref()
            .map(|eocd| eocd.entries_total)
            .unwrap_or_else(|| self.eocd.entries_total.into())
    }

    /// Size of the central directory
    pub fn cd_size(&self) -> u64 {
        self.z64eocd
            .as_ref()
            .map(|eocd| eocd.cd_size)
            .unwrap_or_else(|| self.eocd.cd_size.into())
    }

    /// Offset of start of central directory with respect to the starting disk number
    pub fn cd_offset_on_first_disk(&self) -> u64 {
        self.z64eocd
            .as_ref()
            .map(|eocd| eocd.cd_offset_on_first_disk)
            .unwrap_or_else(|| self.eocd.cd_offset_on_first_disk.into())
    }

    /// Adjust the given offset taking into consideration the SFX stub size
    pub(crate) fn adjust(&self, offset: u64) -> u64 {
        self.adjustment.adjust(offset)
    }

    /// Archive comment
    pub fn comment(&self) -> &[u8] {
        &self.eocd.comment
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, in central directory order
    pub fn entries(&self) -> &[EntryHeader] {
        &self.entries
    }

    /// The entry at `index`
    pub fn entry(&self, index: usize) -> Option<&EntryHeader> {
        self.entries.get(index)
    }

    /// The index of the entry named `name` (the last one, if duplicated)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// The entry named `name` (the last one, if duplicated)
    pub fn entry_by_name(&self, name: &str) -> Option<&EntryHeader> {
        self.index_of(name).map(|i| &self.entries[i])
    }

    /// Directories implied by entry paths which have no entry of their own
    pub fn implicit_directories(&self) -> &[String] {
        &self.implicit_dirs
    }
}
