//! Zip fixture writer and test collaborators
#![allow(dead_code)]

use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::Mac;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

pub const STORE: u16 = 0;
pub const DEFLATE: u16 = 8;

/// Installs a log subscriber (once), controlled by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deterministic, poorly compressible test data
pub fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Entry encryption
#[derive(Clone)]
pub enum Crypt {
    None,
    /// Traditional PKWARE
    Pk(String),
    /// Traditional PKWARE with a header verifier that does not match the CRC
    PkBadVerifier(String),
    /// WinZip AE-2 with strength 1, 2 or 3
    Aes(String, u8),
}

#[derive(Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    method: u16,
    crypt: Crypt,
    unix_mode: Option<u32>,
}

/// An entry ready to be written
struct Prepared {
    name: String,
    flags: u16,
    method_field: u16,
    crc: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    ver_made_by: u16,
    external_attributes: u32,
    aes_extra: Vec<u8>,
    payload: Vec<u8>,
}

/// Where an entry landed in the (unsplit) byte stream
pub struct Placed {
    /// Offset of the local header
    pub header_at: usize,
    /// Offset of the (possibly encrypted) payload
    pub data_at: usize,
    /// Length of the payload
    pub data_len: usize,
}

/// The local records of an archive, before the central directory is added
pub struct Layout {
    /// Local records (preceded by the split signature for split archives)
    pub bytes: Vec<u8>,
    /// Position of each entry
    pub entries: Vec<Placed>,
    prepared: Vec<Prepared>,
    zip64: bool,
    comment: Vec<u8>,
}

const DOS_TIME: u16 = (10 << 11) | (20 << 5) | 15;
const DOS_DATE: u16 = ((2023 - 1980) << 9) | (6 << 5) | 17;

fn crc32_lut(crc: u32, b: u8) -> u32 {
    let mut rmd = (crc ^ u32::from(b)) & 0xff;
    for _ in 0..8 {
        rmd = if rmd & 1 != 0 {
            (rmd >> 1) ^ 0xedb88320
        } else {
            rmd >> 1
        };
    }
    rmd ^ (crc >> 8)
}

/// Traditional PKWARE encryption
fn pk_encrypt(password: &[u8], data: &mut [u8]) {
    let (mut k0, mut k1, mut k2) = (305419896u32, 591751049u32, 878082192u32);
    let update = |c: u8, k0: &mut u32, k1: &mut u32, k2: &mut u32| {
        *k0 = crc32_lut(*k0, c);
        *k1 = k1.wrapping_add(*k0 & 0xff).wrapping_mul(134775813).wrapping_add(1);
        *k2 = crc32_lut(*k2, (*k1 >> 24) as u8);
    };
    for c in password {
        update(*c, &mut k0, &mut k1, &mut k2);
    }
    for c in data.iter_mut() {
        let temp = (k2 | 2) as u16;
        let plain = *c;
        *c ^= (temp.wrapping_mul(temp ^ 1) >> 8) as u8;
        update(plain, &mut k0, &mut k1, &mut k2);
    }
}

fn aes_encrypt(password: &[u8], strength: u8, data: &[u8]) -> Vec<u8> {
    let salt_len = (usize::from(strength) + 1) * 4;
    let key_len = salt_len * 2;
    let salt: Vec<u8> = (0..salt_len).map(|i| (i as u8).wrapping_mul(7) + 1).collect();
    let mut derived = vec![0u8; key_len * 2 + 2];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(password, &salt, 1000, &mut derived);
    let (crypt_key, rest) = derived.split_at(key_len);
    let (sign_key, verifier) = rest.split_at(key_len);
    let mut ciphertext = data.to_vec();
    let iv = 1u128.to_le_bytes();
    match strength {
        1 => ctr::Ctr128LE::<aes::Aes128>::new(crypt_key.into(), iv.as_slice().into())
            .apply_keystream(&mut ciphertext),
        2 => ctr::Ctr128LE::<aes::Aes192>::new(crypt_key.into(), iv.as_slice().into())
            .apply_keystream(&mut ciphertext),
        _ => ctr::Ctr128LE::<aes::Aes256>::new(crypt_key.into(), iv.as_slice().into())
            .apply_keystream(&mut ciphertext),
    }
    let mut mac = <hmac::SimpleHmac<sha1::Sha1> as Mac>::new_from_slice(sign_key).unwrap();
    mac.update(&ciphertext);
    let code = mac.finalize().into_bytes();

    let mut ret = salt;
    ret.extend_from_slice(verifier);
    ret.extend_from_slice(&ciphertext);
    ret.extend_from_slice(&code[0..10]);
    ret
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

impl Entry {
    fn prepare(&self) -> Prepared {
        let compressed = match self.method {
            DEFLATE => deflate(&self.data),
            _ => self.data.clone(),
        };
        let crc = crc32fast::hash(&self.data);
        let mut prepared = Prepared {
            name: self.name.clone(),
            flags: 0,
            method_field: self.method,
            crc,
            compressed_size: 0,
            uncompressed_size: self.data.len() as u64,
            ver_made_by: match self.unix_mode {
                Some(_) => (3 << 8) | 20,
                None => 20,
            },
            external_attributes: self.unix_mode.map(|m| m << 16).unwrap_or(0),
            aes_extra: Vec::new(),
            payload: Vec::new(),
        };
        prepared.payload = match &self.crypt {
            Crypt::None => compressed,
            Crypt::Pk(password) | Crypt::PkBadVerifier(password) => {
                prepared.flags = 1;
                let check = if matches!(self.crypt, Crypt::Pk(_)) {
                    (crc >> 24) as u8
                } else {
                    !(crc >> 24) as u8
                };
                let mut payload = vec![0x5a, 0x13, 0x77, 0x02, 0xc4, 0x91, 0x3e, 0x08, 0xf0, 0x66, 0x21, check];
                payload.extend_from_slice(&compressed);
                pk_encrypt(password.as_bytes(), &mut payload);
                payload
            }
            Crypt::Aes(password, strength) => {
                prepared.flags = 1;
                prepared.method_field = 99;
                // AE-2 carries no CRC
                prepared.crc = 0;
                prepared.aes_extra = vec![0x01, 0x99, 7, 0, 2, 0, b'A', b'E', *strength];
                prepared
                    .aes_extra
                    .extend_from_slice(&self.method.to_le_bytes());
                aes_encrypt(password.as_bytes(), *strength, &compressed)
            }
        };
        prepared.compressed_size = prepared.payload.len() as u64;
        prepared
    }
}

impl Prepared {
    fn local_header(&self, zip64: bool) -> Vec<u8> {
        let mut extra = Vec::new();
        if zip64 {
            extra.extend_from_slice(&1u16.to_le_bytes());
            extra.extend_from_slice(&16u16.to_le_bytes());
            extra.extend_from_slice(&self.uncompressed_size.to_le_bytes());
            extra.extend_from_slice(&self.compressed_size.to_le_bytes());
        }
        extra.extend_from_slice(&self.aes_extra);
        let (csize, usize) = if zip64 {
            (0xffffffff, 0xffffffff)
        } else {
            (self.compressed_size as u32, self.uncompressed_size as u32)
        };
        let mut r = Vec::new();
        r.extend_from_slice(b"PK\x03\x04");
        r.extend_from_slice(&(if zip64 { 45u16 } else { 20u16 }).to_le_bytes());
        r.extend_from_slice(&self.flags.to_le_bytes());
        r.extend_from_slice(&self.method_field.to_le_bytes());
        r.extend_from_slice(&DOS_TIME.to_le_bytes());
        r.extend_from_slice(&DOS_DATE.to_le_bytes());
        r.extend_from_slice(&self.crc.to_le_bytes());
        r.extend_from_slice(&csize.to_le_bytes());
        r.extend_from_slice(&usize.to_le_bytes());
        r.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        r.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        r.extend_from_slice(self.name.as_bytes());
        r.extend_from_slice(&extra);
        r
    }

    fn central_header(&self, zip64: bool, disk: u32, offset: u64) -> Vec<u8> {
        let mut extra = Vec::new();
        if zip64 {
            extra.extend_from_slice(&1u16.to_le_bytes());
            extra.extend_from_slice(&24u16.to_le_bytes());
            extra.extend_from_slice(&self.uncompressed_size.to_le_bytes());
            extra.extend_from_slice(&self.compressed_size.to_le_bytes());
            extra.extend_from_slice(&offset.to_le_bytes());
        }
        extra.extend_from_slice(&self.aes_extra);
        let (csize, usize, offset) = if zip64 {
            (0xffffffff, 0xffffffff, 0xffffffff)
        } else {
            (
                self.compressed_size as u32,
                self.uncompressed_size as u32,
                offset as u32,
            )
        };
        let mut r = Vec::new();
        r.extend_from_slice(b"PK\x01\x02");
        r.extend_from_slice(&self.ver_made_by.to_le_bytes());
        r.extend_from_slice(&(if zip64 { 45u16 } else { 20u16 }).to_le_bytes());
        r.extend_from_slice(&self.flags.to_le_bytes());
        r.extend_from_slice(&self.method_field.to_le_bytes());
        r.extend_from_slice(&DOS_TIME.to_le_bytes());
        r.extend_from_slice(&DOS_DATE.to_le_bytes());
        r.extend_from_slice(&self.crc.to_le_bytes());
        r.extend_from_slice(&csize.to_le_bytes());
        r.extend_from_slice(&usize.to_le_bytes());
        r.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        r.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        r.extend_from_slice(&0u16.to_le_bytes()); // comment
        r.extend_from_slice(&(disk as u16).to_le_bytes());
        r.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        r.extend_from_slice(&self.external_attributes.to_le_bytes());
        r.extend_from_slice(&offset.to_le_bytes());
        r.extend_from_slice(self.name.as_bytes());
        r.extend_from_slice(&extra);
        r
    }
}

/// Builds Zip archives in memory
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<Entry>,
    zip64: bool,
    comment: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, data: &[u8], method: u16, crypt: Crypt) -> Self {
        self.entries.push(Entry {
            name: name.to_string(),
            data: data.to_vec(),
            method,
            crypt,
            unix_mode: None,
        });
        self
    }

    /// Adds a plain entry
    pub fn file(self, name: &str, data: &[u8], method: u16) -> Self {
        self.push(name, data, method, Crypt::None)
    }

    /// Adds an encrypted entry
    pub fn encrypted(self, name: &str, data: &[u8], method: u16, crypt: Crypt) -> Self {
        self.push(name, data, method, crypt)
    }

    /// Adds an explicit directory entry
    pub fn dir(self, name: &str) -> Self {
        self.push(name, b"", STORE, Crypt::None)
    }

    /// Sets the Unix mode of the last added entry
    pub fn mode(mut self, mode: u32) -> Self {
        if let Some(last) = self.entries.last_mut() {
            last.unix_mode = Some(mode);
        }
        self
    }

    /// Writes Zip64 structures regardless of sizes
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    /// Sets the archive comment
    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Lays out the local records
    pub fn layout(&self, split: bool) -> Layout {
        let mut bytes = if split {
            b"PK\x07\x08".to_vec()
        } else {
            Vec::new()
        };
        let mut entries = Vec::new();
        let mut prepared = Vec::new();
        for entry in &self.entries {
            let p = entry.prepare();
            let header_at = bytes.len();
            bytes.extend_from_slice(&p.local_header(self.zip64));
            let data_at = bytes.len();
            bytes.extend_from_slice(&p.payload);
            entries.push(Placed {
                header_at,
                data_at,
                data_len: p.payload.len(),
            });
            prepared.push(p);
        }
        Layout {
            bytes,
            entries,
            prepared,
            zip64: self.zip64,
            comment: self.comment.clone(),
        }
    }

    /// A complete single volume archive
    pub fn build(&self) -> Vec<u8> {
        self.layout(false).assemble(&[]).remove(0)
    }
}

impl Layout {
    /// Splits the local records at `cuts` (offsets into `bytes`) and appends
    /// the central directory to the last volume
    pub fn assemble(&self, cuts: &[usize]) -> Vec<Vec<u8>> {
        let mut starts = vec![0usize];
        starts.extend_from_slice(cuts);
        let locate = |at: usize| -> (u32, u64) {
            let disk = starts.iter().rposition(|s| *s <= at).unwrap();
            (disk as u32, (at - starts[disk]) as u64)
        };
        let mut volumes: Vec<Vec<u8>> = starts
            .iter()
            .enumerate()
            .map(|(i, start)| {
                let end = starts.get(i + 1).copied().unwrap_or(self.bytes.len());
                self.bytes[*start..end].to_vec()
            })
            .collect();
        let last_disk = (volumes.len() - 1) as u32;
        let last = volumes.last_mut().unwrap();
        let cd_offset = last.len() as u64;
        for (p, placed) in self.prepared.iter().zip(&self.entries) {
            let (disk, offset) = locate(placed.header_at);
            last.extend_from_slice(&p.central_header(self.zip64, disk, offset));
        }
        let cd_size = last.len() as u64 - cd_offset;
        let count = self.prepared.len() as u64;
        if self.zip64 {
            let z64_offset = last.len() as u64;
            last.extend_from_slice(b"PK\x06\x06");
            last.extend_from_slice(&44u64.to_le_bytes());
            last.extend_from_slice(&45u16.to_le_bytes());
            last.extend_from_slice(&45u16.to_le_bytes());
            last.extend_from_slice(&last_disk.to_le_bytes());
            last.extend_from_slice(&last_disk.to_le_bytes());
            last.extend_from_slice(&count.to_le_bytes());
            last.extend_from_slice(&count.to_le_bytes());
            last.extend_from_slice(&cd_size.to_le_bytes());
            last.extend_from_slice(&cd_offset.to_le_bytes());
            last.extend_from_slice(b"PK\x06\x07");
            last.extend_from_slice(&last_disk.to_le_bytes());
            last.extend_from_slice(&z64_offset.to_le_bytes());
            last.extend_from_slice(&(last_disk + 1).to_le_bytes());
        }
        last.extend_from_slice(b"PK\x05\x06");
        last.extend_from_slice(&(last_disk as u16).to_le_bytes());
        last.extend_from_slice(&(last_disk as u16).to_le_bytes());
        if self.zip64 {
            last.extend_from_slice(&0xffffu16.to_le_bytes());
            last.extend_from_slice(&0xffffu16.to_le_bytes());
            last.extend_from_slice(&0xffffffffu32.to_le_bytes());
            last.extend_from_slice(&0xffffffffu32.to_le_bytes());
        } else {
            last.extend_from_slice(&(count as u16).to_le_bytes());
            last.extend_from_slice(&(count as u16).to_le_bytes());
            last.extend_from_slice(&(cd_size as u32).to_le_bytes());
            last.extend_from_slice(&(cd_offset as u32).to_le_bytes());
        }
        last.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        last.extend_from_slice(&self.comment);
        volumes
    }
}

/// Writes the volumes of an archive named `name` into `dir`, returning the
/// archive path (i.e. the last volume)
pub fn write_volumes(dir: &Path, name: &str, volumes: &[Vec<u8>]) -> PathBuf {
    let archive = dir.join(name);
    for (i, volume) in volumes.iter().enumerate() {
        let path = ctxextract::volume_path(&archive, i as u32, volumes.len() as u32);
        std::fs::write(&path, volume)
            .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    }
    archive
}

/// A volume provider which keeps track of the open handles
#[derive(Default, Clone)]
pub struct CountingProvider {
    open: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl CountingProvider {
    /// Handles currently open
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Handles opened overall
    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

pub struct CountedVolume {
    inner: std::io::BufReader<std::fs::File>,
    open: Arc<AtomicUsize>,
}

impl Read for CountedVolume {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for CountedVolume {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Drop for CountedVolume {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ctxextract::VolumeProvider for CountingProvider {
    type Volume = CountedVolume;

    fn open(&self, path: &Path) -> std::io::Result<Self::Volume> {
        let file = std::fs::File::open(path)?;
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(CountedVolume {
            inner: std::io::BufReader::new(file),
            open: self.open.clone(),
        })
    }
}
