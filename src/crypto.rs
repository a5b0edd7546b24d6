//! Traditional PKWARE and WinZip AES decryption
//!
//! Exactly one [`Decrypter`] is created per extracted entry. It consumes the
//! encryption header which precedes the compressed data, decrypts the data
//! chunk by chunk and finally verifies the entry integrity
use crate::error::{ExtractError, IntegrityKind, PasswordHint, Result};
use crate::model::{
    EncryptionMethod, EntryHeader, AES_AUTH_CODE_LEN, AES_VERIFIER_LEN, PK_HEADER_LEN,
};
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Mac, SimpleHmac};
use std::io::Read;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// PKWARE key update table (CRC-32, reflected polynomial 0xedb88320)
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut b = 0;
    while b < 256 {
        let mut rmd = b as u32;
        let mut bit = 0;
        while bit < 8 {
            rmd = if rmd & 1 != 0 {
                (rmd >> 1) ^ 0xedb88320
            } else {
                rmd >> 1
            };
            bit += 1;
        }
        table[b] = rmd;
        b += 1;
    }
    table
};

/// Single step crc32, as used by the PKWARE key schedule
fn crc32_lut(crc: u32, b: u8) -> u32 {
    CRC32_TABLE[((crc as u8) ^ b) as usize] ^ (crc >> 8)
}

/// The value a decrypted PKWARE header must end with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkVerifier {
    /// Last byte (archives made by version 2.0 and later)
    Byte(u8),
    /// Last two bytes (older archives)
    Word(u16),
}

/// Traditional PKWARE decryption state
pub struct PkCipher {
    k0: u32,
    k1: u32,
    k2: u32,
    /// Whether the decrypted header ended with the expected verifier
    verifier_matched: bool,
}

impl PkCipher {
    /// Seeds the keys from `password` and decrypts the encryption `header`
    ///
    /// A verifier mismatch is not fatal here, it is only remembered
    pub fn new(password: &[u8], header: &[u8; 12], verifier: PkVerifier) -> Self {
        let mut ret = Self {
            k0: 305419896,
            k1: 591751049,
            k2: 878082192,
            verifier_matched: false,
        };
        for c in password {
            ret.update_keys(*c);
        }
        let mut buf = *header;
        ret.decrypt(&mut buf);
        ret.verifier_matched = match verifier {
            PkVerifier::Byte(c) => buf[11] == c,
            PkVerifier::Word(c) => u16::from_le_bytes([buf[10], buf[11]]) == c,
        };
        if !ret.verifier_matched {
            warn!("PKWARE password verifier mismatch");
        }
        ret
    }

    /// Mixes a byte in with the 3 keys
    fn update_keys(&mut self, c: u8) {
        self.k0 = crc32_lut(self.k0, c);
        self.k1 = self.k1.wrapping_add(self.k0 & 0xff);
        self.k1 = self.k1.wrapping_mul(134775813).wrapping_add(1);
        self.k2 = crc32_lut(self.k2, (self.k1 >> 24) as u8);
    }

    /// Decrypts a buffer in place
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for c in buf.iter_mut() {
            let temp = (self.k2 | 2) as u16;
            *c ^= (temp.wrapping_mul(temp ^ 1) >> 8) as u8;
            self.update_keys(*c);
        }
    }

    /// Whether the password verifier matched
    pub fn verifier_matched(&self) -> bool {
        self.verifier_matched
    }
}

/// WinZip AES key strength
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl TryFrom<u8> for AesStrength {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Aes128),
            2 => Ok(Self::Aes192),
            3 => Ok(Self::Aes256),
            other => Err(other),
        }
    }
}

impl AesStrength {
    /// Salt length in bytes
    pub fn salt_len(&self) -> usize {
        self.key_len() / 2
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }
}

/// AES in little endian counter mode, starting from 1
enum AesCtr {
    Aes128(ctr::Ctr128LE<aes::Aes128>),
    Aes192(ctr::Ctr128LE<aes::Aes192>),
    Aes256(ctr::Ctr128LE<aes::Aes256>),
}

impl AesCtr {
    fn new(strength: AesStrength, key: &[u8]) -> Self {
        let iv = 1u128.to_le_bytes();
        match strength {
            AesStrength::Aes128 => Self::Aes128(ctr::Ctr128LE::new(key.into(), iv.as_slice().into())),
            AesStrength::Aes192 => Self::Aes192(ctr::Ctr128LE::new(key.into(), iv.as_slice().into())),
            AesStrength::Aes256 => Self::Aes256(ctr::Ctr128LE::new(key.into(), iv.as_slice().into())),
        }
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes192(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// WinZip AE-1/AE-2 decryption state
///
/// See <https://www.winzip.com/en/support/aes-encryption/>
pub struct AesCipher {
    strength: AesStrength,
    cipher: AesCtr,
    /// Running authentication code, computed over the encrypted data
    mac: SimpleHmac<sha1::Sha1>,
}

impl AesCipher {
    /// Number of PBKDF2 iterations mandated by the format
    const KDF_ROUNDS: u32 = 1000;

    /// Derives the keys from `password` and `salt`
    ///
    /// Returns `None` if the derived password verifier does not match `verifier`
    pub fn new(
        password: &[u8],
        strength: AesStrength,
        salt: &[u8],
        verifier: [u8; 2],
    ) -> Option<Self> {
        let key_len = strength.key_len();
        let mut derived = [0u8; 66];
        let derived = &mut derived[0..(key_len * 2 + 2)];
        pbkdf2::pbkdf2_hmac::<sha1::Sha1>(password, salt, Self::KDF_ROUNDS, derived);
        let (crypt_key, rest) = derived.split_at(key_len);
        let (sign_key, derived_verifier) = rest.split_at(key_len);
        if derived_verifier != verifier.as_slice() {
            debug!("AES password verifier mismatch");
            return None;
        }
        // Hmac takes keys of any length
        let mac = <SimpleHmac<sha1::Sha1> as Mac>::new_from_slice(sign_key).ok()?;
        Some(Self {
            strength,
            cipher: AesCtr::new(strength, crypt_key),
            mac,
        })
    }

    /// Decrypts a buffer in place, authenticating the encrypted bytes first
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.mac.update(buf);
        self.cipher.apply_keystream(buf);
    }

    /// Checks the running authentication code against the stored one
    pub fn verify(self, auth_code: &[u8]) -> bool {
        self.mac.verify_truncated_left(auth_code).is_ok()
    }
}

/// Per-entry decryption state
pub enum Decrypter {
    /// The entry is not encrypted
    Identity,
    /// Traditional PKWARE encryption
    Pk(PkCipher),
    /// WinZip AES encryption
    Aes(AesCipher),
}

impl Decrypter {
    /// Reads the encryption header of `entry` from `r` and sets up decryption
    ///
    /// The AES password verifier is checked here (fail-fast), the PKWARE
    /// verifier mismatch only surfaces when the entry integrity is verified
    pub fn open<R: Read>(
        entry: &EntryHeader,
        pk_verifier: PkVerifier,
        password: Option<&[u8]>,
        r: &mut R,
    ) -> Result<Self> {
        let password = match (entry.encryption, password) {
            (EncryptionMethod::None, _) => return Ok(Self::Identity),
            (_, Some(password)) => password,
            (_, None) => {
                return Err(ExtractError::PasswordRequired {
                    entry: entry.name.clone(),
                })
            }
        };
        match entry.encryption {
            EncryptionMethod::Standard => {
                let mut header = [0u8; PK_HEADER_LEN as usize];
                r.read_exact(&mut header)
                    .map_err(ExtractError::from_parse)?;
                Ok(Self::Pk(PkCipher::new(password, &header, pk_verifier)))
            }
            EncryptionMethod::Aes => {
                let aes = entry.aes.ok_or_else(|| {
                    ExtractError::InvalidArchive(format!(
                        "WinZip AES extra field missing or invalid for '{}'",
                        entry.name
                    ))
                })?;
                let mut salt = [0u8; 16];
                let salt = &mut salt[0..aes.strength.salt_len()];
                r.read_exact(salt).map_err(ExtractError::from_parse)?;
                let mut verifier = [0u8; 2];
                r.read_exact(&mut verifier)
                    .map_err(ExtractError::from_parse)?;
                AesCipher::new(password, aes.strength, salt, verifier)
                    .map(Self::Aes)
                    .ok_or_else(|| ExtractError::AesVerifierFailure {
                        entry: entry.name.clone(),
                    })
            }
            EncryptionMethod::None => Ok(Self::Identity),
        }
    }

    /// Length of the encryption header consumed by [`open`](Self::open)
    pub fn header_len(&self) -> u64 {
        match self {
            Self::Identity => 0,
            Self::Pk(_) => PK_HEADER_LEN,
            Self::Aes(aes) => aes.strength.salt_len() as u64 + AES_VERIFIER_LEN,
        }
    }

    /// Decrypts a chunk of entry data in place
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        match self {
            Self::Identity => {}
            Self::Pk(pk) => pk.decrypt(buf),
            Self::Aes(aes) => aes.decrypt(buf),
        }
    }

    /// The integrity check that protects data decrypted by this state
    pub fn integrity_kind(&self) -> IntegrityKind {
        match self {
            Self::Aes(_) => IntegrityKind::Mac,
            _ => IntegrityKind::Crc,
        }
    }

    /// The password annotation for integrity failures
    pub fn password_hint(&self) -> PasswordHint {
        match self {
            Self::Pk(pk) if pk.verifier_matched() => PasswordHint::PossiblyWrong,
            Self::Pk(_) => PasswordHint::VerifierMismatch,
            _ => PasswordHint::NotApplicable,
        }
    }

    /// Verifies the integrity of a completely read entry
    ///
    /// For AES entries the authentication code is read from `trailer`, which
    /// must be positioned right after the encrypted data. Other entries are
    /// checked by CRC-32
    pub fn finalize<R: Read>(
        self,
        entry: &EntryHeader,
        trailer: &mut R,
        computed_crc32: u32,
    ) -> Result<()> {
        let hint = self.password_hint();
        let kind = self.integrity_kind();
        let ok = match self {
            Self::Aes(aes) => {
                let mut auth_code = [0u8; AES_AUTH_CODE_LEN as usize];
                r_exact_or_mismatch(trailer, &mut auth_code)? && aes.verify(&auth_code)
            }
            Self::Identity | Self::Pk(_) => computed_crc32 == entry.crc32,
        };
        if ok {
            Ok(())
        } else {
            debug!(
                "Integrity check failed for {} (crc {:08x}, expected {:08x})",
                entry.name, computed_crc32, entry.crc32
            );
            Err(ExtractError::IntegrityFailure {
                entry: entry.name.clone(),
                kind,
                hint,
            })
        }
    }
}

/// Reads the authentication code, a truncated one simply fails verification
fn r_exact_or_mismatch<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            warn!("Truncated WinZip AES authentication code");
            Ok(false)
        }
        Err(e) => Err(ExtractError::from_parse(e)),
    }
}
