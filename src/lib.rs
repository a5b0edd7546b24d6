//! Zip extraction engine
//!
//! Written from scratch, based on APPNOTE 6.3.10
//!
//! # Design goals and implementation #
//!
//! The engine turns the entries of a Zip archive into decompressed,
//! integrity checked files. It handles archives split across several
//! volumes as well as entries encrypted with the traditional PKWARE cipher
//! or with WinZip AES
//!
//! Every entry is processed through a synchronous pull pipeline:
//! volume bytes, decryption, decompression, checksum. The local header is
//! always cross checked against the central directory before any data is
//! trusted
//!
//! The main interfaces are:
//! - [`Extractor`]: opens an archive once and extracts single entries or
//!   whole batches, optionally on a background thread
//! - [`ArchiveModel`]: the read-only view of the central directory
//! - [`ProgressSink`]: receives progress updates and provides cooperative
//!   cancellation
//!
//! # Supported Zip features #
//!
//! Supported methods:
//! - Store
//! - Deflate
//!
//! Supported encryption types:
//! - Traditional PKWARE encryption
//! - WinZip AE-1 and AE-2 (AES128, AES192, AES256)
//!
//! Zip64 and prepended data (e.g. SFX stubs) are handled transparently
//!
//! # Examples #
//! ```no_run
//! use ctxextract::{ExtractionProgress, Extractor};
//!
//! let extractor = Extractor::open("archive.zip").unwrap().with_password("secret");
//! let progress = ExtractionProgress::new();
//! let report = extractor.extract_all("/tmp/out", &progress);
//! for (name, err) in report.failures {
//!     println!("{name}: {err}");
//! }
//! ```

mod attributes;
mod batch;
mod config;
pub mod crypto;
mod error;
mod extract;
mod header;
mod inflate;
mod model;
mod progress;
mod stream;
mod utils;
mod volume;

pub use attributes::{AttributeRestorer, FsAttributeRestorer, NoAttributes};
pub use batch::BatchReport;
pub use config::ExtractConfig;
pub use error::{ConfigError, ExtractError, IntegrityKind, PasswordHint, Result};
pub use extract::{safe_join, EntryOutcome, Extractor};
pub use header::LocalHeader;
pub use model::{
    directory_set, AesParams, ArchiveModel, CompressionMethod, EncryptionMethod,
    EndOfCentralDirectory, EntryHeader, ExtraFields, Z64EndOfCentralDirectory,
};
pub use progress::{ExtractionProgress, NoProgress, ProgressSink, ProgressState};
pub use stream::StreamSummary;
pub use volume::{volume_path, FsVolumeProvider, VolumeProvider};
