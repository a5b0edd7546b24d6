//! Extraction errors
use std::path::PathBuf;
use thiserror::Error;

/// Which integrity check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityKind {
    /// CRC-32 of the decompressed data
    Crc,
    /// WinZip AES authentication code of the encrypted data
    Mac,
}

impl std::fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crc => f.write_str("CRC-32"),
            Self::Mac => f.write_str("authentication code"),
        }
    }
}

/// Password related annotation of an integrity failure
///
/// Only entries protected by the traditional PKWARE cipher carry a hint: that
/// cipher has no reliable way to reject a bad password up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordHint {
    /// The entry is not encrypted with the PKWARE cipher
    NotApplicable,
    /// The password may be wrong
    PossiblyWrong,
    /// The password verifier did not match, the password is almost certainly wrong
    VerifierMismatch,
}

impl std::fmt::Display for PasswordHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotApplicable => Ok(()),
            Self::PossiblyWrong => f.write_str(" (wrong password?)"),
            Self::VerifierMismatch => {
                f.write_str(" (wrong password: the password verifier did not match)")
            }
        }
    }
}

/// Error type of all the extraction operations
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The local header disagrees with the central directory
    #[error("local header of '{entry}' declares method {local}, central directory says {central}")]
    HeaderMismatch {
        entry: String,
        central: u16,
        local: u16,
    },

    /// Compression or encryption method not handled
    #[error("unsupported method for '{entry}': {what}")]
    UnsupportedMethod { entry: String, what: String },

    /// WinZip AES password verifier mismatch
    #[error("wrong password for '{entry}' (AES password verifier mismatch)")]
    AesVerifierFailure { entry: String },

    /// Post-stream checksum or authentication code mismatch
    #[error("{kind} mismatch for '{entry}'{hint}")]
    IntegrityFailure {
        entry: String,
        kind: IntegrityKind,
        hint: PasswordHint,
    },

    /// A volume of a split archive cannot be opened
    #[error("missing archive volume {}: {source}", .path.display())]
    VolumeMissing {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The entry is encrypted and no password was supplied
    #[error("'{entry}' is encrypted and no password was provided")]
    PasswordRequired { entry: String },

    /// No entry with the requested name or index
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// The entry would be written outside of the destination directory
    #[error("unsafe entry path '{0}'")]
    UnsafePath(String),

    /// The decompressed entry exceeds the configured output limit
    #[error("'{entry}' exceeds the output size limit of {limit} bytes")]
    OutputLimitExceeded { entry: String, limit: u64 },

    /// Malformed archive structures
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// Any other I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Whether the error indicates a (likely) wrong password
    pub fn is_wrong_password(&self) -> bool {
        match self {
            Self::AesVerifierFailure { .. } => true,
            Self::IntegrityFailure { hint, .. } => *hint != PasswordHint::NotApplicable,
            _ => false,
        }
    }

    /// Maps an error raised while parsing archive structures
    ///
    /// Short reads and malformed data become [`InvalidArchive`](Self::InvalidArchive),
    /// a volume that cannot be opened becomes [`VolumeMissing`](Self::VolumeMissing)
    pub(crate) fn from_parse(e: std::io::Error) -> Self {
        let e = match crate::volume::MissingVolume::take(e) {
            Ok(missing) => {
                return Self::VolumeMissing {
                    path: missing.path,
                    source: missing.source,
                };
            }
            Err(e) => e,
        };
        match e.kind() {
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                Self::InvalidArchive(e.to_string())
            }
            _ => Self::Io(e),
        }
    }

    /// Like [`from_parse`](Self::from_parse), prefixing malformation messages
    /// with `what`
    pub(crate) fn from_parse_in(what: &str, e: std::io::Error) -> Self {
        match Self::from_parse(e) {
            Self::InvalidArchive(msg) => Self::InvalidArchive(format!("{what}: {msg}")),
            other => other,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
