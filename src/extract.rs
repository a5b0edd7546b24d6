//! Single entry extraction
//!
//! Every entry goes through the same strict sequence: locate the volume,
//! reconcile the local header, skip to the data, stream it out and verify it.
//! Volume and output handles are owned by the call and released on every
//! exit path
use crate::attributes::{AttributeRestorer, FsAttributeRestorer};
use crate::config::ExtractConfig;
use crate::crypto::Decrypter;
use crate::error::{ExtractError, Result};
use crate::header::read_local_header;
use crate::model::{
    ArchiveModel, CompressionMethod, EncryptionMethod, EntryHeader, GP_IS_STRONG_ENCRYPTED,
};
use crate::progress::{ProgressSink, ProgressState};
use crate::stream::{EntryStream, StreamSummary};
use crate::utils::{LimitedWriter, WriteLimitExceeded};
use crate::volume::{FsVolumeProvider, VolumeChain, VolumeProvider};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Result of a successful (or cancelled) entry extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// A file was written
    Extracted {
        /// Path of the written file
        path: PathBuf,
        /// Number of bytes written
        bytes: u64,
        /// Why the file metadata could not be restored, if it could not
        attributes_error: Option<String>,
    },
    /// A directory was created
    Directory {
        /// Path of the directory
        path: PathBuf,
    },
    /// Extraction was cancelled, nothing was left behind
    Cancelled,
}

/// Resolves an entry name below `dest`
///
/// Absolute names, drive prefixes and names escaping `dest` through `..` are
/// rejected
pub fn safe_join(dest: &Path, name: &str) -> Result<PathBuf> {
    let unsafe_path = || ExtractError::UnsafePath(name.to_string());
    let name = name.replace('\\', "/");
    if name.starts_with('/') {
        return Err(unsafe_path());
    }
    let mut ret = dest.to_path_buf();
    for (i, part) in name.split('/').enumerate() {
        match part {
            "" | "." => {}
            ".." => return Err(unsafe_path()),
            part => {
                let bytes = part.as_bytes();
                if i == 0 && bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
                {
                    return Err(unsafe_path());
                }
                let mut components = Path::new(part).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(c)), None) => ret.push(c),
                    _ => return Err(unsafe_path()),
                }
            }
        }
    }
    Ok(ret)
}

/// Sets the terminal state of a single call and reports its failure
pub(crate) fn conclude<T>(progress: &dyn ProgressSink, res: &Result<T>, cancelled: bool) {
    match res {
        Ok(_) if cancelled => progress.set_state(ProgressState::Cancelled),
        Ok(_) => progress.set_state(ProgressState::Ready),
        Err(e) => {
            progress.report_error(e);
            progress.set_state(ProgressState::Error);
        }
    }
}

/// Extracts entries from an archive
///
/// The archive model is loaded once, in [`open`](Extractor::open); each
/// extraction call then opens (and closes) the volumes it needs
pub struct Extractor<P: VolumeProvider = FsVolumeProvider> {
    pub(crate) model: ArchiveModel,
    provider: P,
    restorer: Box<dyn AttributeRestorer + Send + Sync>,
    pub(crate) config: ExtractConfig,
    password: Option<String>,
}

impl Extractor<FsVolumeProvider> {
    /// Opens the archive at `path` from the local file system
    ///
    /// For split archives `path` is the last volume (`.zip`)
    pub fn open<T: AsRef<Path>>(path: T) -> Result<Self> {
        Self::with_provider(FsVolumeProvider, path)
    }
}

impl<P: VolumeProvider> Extractor<P> {
    /// Opens the archive at `path` through the given volume provider
    pub fn with_provider<T: AsRef<Path>>(provider: P, path: T) -> Result<Self> {
        let model = ArchiveModel::open(&provider, path.as_ref())?;
        Ok(Self {
            model,
            provider,
            restorer: Box::new(FsAttributeRestorer),
            config: ExtractConfig::default(),
            password: None,
        })
    }

    /// Sets the password used for encrypted entries
    pub fn with_password<T: Into<String>>(mut self, password: T) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the configuration
    pub fn with_config(mut self, config: ExtractConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the attribute restorer
    pub fn with_restorer<A: AttributeRestorer + Send + Sync + 'static>(mut self, restorer: A) -> Self {
        self.restorer = Box::new(restorer);
        self
    }

    /// The archive model
    pub fn model(&self) -> &ArchiveModel {
        &self.model
    }

    fn password(&self) -> Option<&[u8]> {
        self.password
            .as_deref()
            .or(self.config.password.as_deref())
            .map(str::as_bytes)
    }

    fn lookup(&self, index: usize) -> Result<&EntryHeader> {
        self.model
            .entry(index)
            .ok_or_else(|| ExtractError::EntryNotFound(format!("#{index}")))
    }

    /// Extracts the entry at `index` into `dest`
    ///
    /// The progress sink goes through Busy and ends in Ready, Cancelled or
    /// Error; errors are both reported to the sink and returned
    pub fn extract_entry<T: AsRef<Path>>(
        &self,
        index: usize,
        dest: T,
        progress: &dyn ProgressSink,
    ) -> Result<EntryOutcome> {
        progress.set_state(ProgressState::Busy);
        let res = self.lookup(index).and_then(|entry| {
            progress.set_total_work(if entry.is_directory {
                0
            } else {
                entry.payload_size()
            });
            self.extract_one(entry, dest.as_ref(), progress)
        });
        conclude(
            progress,
            &res,
            matches!(res, Ok(EntryOutcome::Cancelled)),
        );
        res
    }

    /// Extracts the entry named `name` into `dest`
    ///
    /// See [`extract_entry`](Self::extract_entry)
    pub fn extract_by_name<T: AsRef<Path>>(
        &self,
        name: &str,
        dest: T,
        progress: &dyn ProgressSink,
    ) -> Result<EntryOutcome> {
        match self.model.index_of(name) {
            Some(index) => self.extract_entry(index, dest, progress),
            None => {
                let res = Err(ExtractError::EntryNotFound(name.to_string()));
                conclude(progress, &res, false);
                res
            }
        }
    }

    /// Decompresses the entry at `index` into `out`
    ///
    /// Returns `None` if the extraction was cancelled
    pub fn extract_entry_to_writer<W: Write>(
        &self,
        index: usize,
        out: &mut W,
        progress: &dyn ProgressSink,
    ) -> Result<Option<StreamSummary>> {
        progress.set_state(ProgressState::Busy);
        let res = self.lookup(index).and_then(|entry| {
            if entry.is_directory {
                progress.set_total_work(0);
                return Ok(Some(StreamSummary {
                    bytes: 0,
                    input_fully_consumed: true,
                }));
            }
            progress.set_total_work(entry.payload_size());
            self.stream_entry(entry, out, progress)
        });
        conclude(progress, &res, matches!(res, Ok(None)));
        res
    }

    /// Extracts one entry below `dest`, without touching the progress state
    #[instrument(level = "debug", skip(self, entry, dest, progress), fields(entry = %entry.name))]
    pub(crate) fn extract_one(
        &self,
        entry: &EntryHeader,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<EntryOutcome> {
        let target = safe_join(dest, &entry.name)?;
        if entry.is_directory {
            debug!("Creating directory {}", target.display());
            std::fs::create_dir_all(&target)?;
            return Ok(EntryOutcome::Directory { path: target });
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&target)?;
        // Declared before the writer, so the file is closed before removal
        let partial = scopeguard::guard(target, |path| {
            debug!("Removing partial output {}", path.display());
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove {}: {e}", path.display());
            }
        });
        let mut writer = std::io::BufWriter::new(file);
        let summary = match self.stream_entry(entry, &mut writer, progress)? {
            Some(summary) => summary,
            None => return Ok(EntryOutcome::Cancelled),
        };
        writer.into_inner().map_err(|e| e.into_error())?;
        let target = scopeguard::ScopeGuard::into_inner(partial);
        let attributes_error = if self.config.restore_attributes {
            self.restorer.apply(entry, &target).err().map(|e| {
                warn!("Failed to restore attributes of {}: {e}", target.display());
                e.to_string()
            })
        } else {
            None
        };
        info!("Extracted {} ({} bytes)", entry.name, summary.bytes);
        Ok(EntryOutcome::Extracted {
            path: target,
            bytes: summary.bytes,
            attributes_error,
        })
    }

    /// Checks that the entry can be handled at all
    fn check_supported(entry: &EntryHeader) -> Result<()> {
        if entry.gp_flag & GP_IS_STRONG_ENCRYPTED != 0 {
            return Err(ExtractError::UnsupportedMethod {
                entry: entry.name.clone(),
                what: "PKWARE strong encryption".to_string(),
            });
        }
        if entry.encryption == EncryptionMethod::Aes && entry.aes.is_none() {
            let e = match entry.aes_params() {
                Err(e) => e,
                Ok(_) => std::io::Error::other("WinZip AES parameters not loaded"),
            };
            return Err(if e.kind() == std::io::ErrorKind::Unsupported {
                ExtractError::UnsupportedMethod {
                    entry: entry.name.clone(),
                    what: e.to_string(),
                }
            } else {
                ExtractError::InvalidArchive(format!("'{}': {e}", entry.name))
            });
        }
        if let CompressionMethod::Unsupported(method) = entry.compression_method() {
            return Err(ExtractError::UnsupportedMethod {
                entry: entry.name.clone(),
                what: format!("compression method {method}"),
            });
        }
        Ok(())
    }

    /// Streams the entry data into `out` and verifies it
    ///
    /// Progress is reported in compressed bytes; `None` means cancelled
    fn stream_entry<W: Write>(
        &self,
        entry: &EntryHeader,
        out: &mut W,
        progress: &dyn ProgressSink,
    ) -> Result<Option<StreamSummary>> {
        Self::check_supported(entry)?;

        // Locate
        let volume = entry.disk_number;
        let header_offset = self.model.adjust(entry.local_header_offset);
        debug!("Local header at volume {volume}, offset {header_offset:x}");
        let mut chain = VolumeChain::open(
            &self.provider,
            self.model.path(),
            self.model.volume_count(),
            volume,
            header_offset,
        )
        .map_err(ExtractError::from_parse)?;

        // Reconcile and derive the data offset
        let (lh, location) = read_local_header(&mut chain, entry, volume, header_offset)?;
        let decrypter = Decrypter::open(entry, lh.pk_verifier(entry), self.password(), &mut chain)?;
        debug_assert_eq!(decrypter.header_len(), location.encryption_header_len);
        trace!(
            "Payload at {:?} (data offset {:x} in volume {}), {} bytes",
            chain.position(),
            location.data_offset(),
            location.volume,
            entry.payload_size()
        );
        let mut stream = EntryStream::new(entry, chain, decrypter)?;

        // Stream
        let limit = self.config.max_entry_output_size;
        let mut out = LimitedWriter::new(out, limit);
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut reported = 0u64;
        loop {
            if progress.is_cancelled() {
                info!(
                    "Extraction of {} cancelled after {} bytes",
                    entry.name,
                    stream.produced()
                );
                return Ok(None);
            }
            let len = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(len) => len,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(stream.map_error(e)),
            };
            out.write_all(&buf[0..len]).map_err(|e| {
                if WriteLimitExceeded::is(&e) {
                    ExtractError::OutputLimitExceeded {
                        entry: entry.name.clone(),
                        limit: limit.unwrap_or(u64::MAX),
                    }
                } else {
                    ExtractError::Io(e)
                }
            })?;
            let consumed = stream.consumed_input();
            progress.update_completed(consumed - reported);
            reported = consumed;
        }
        out.flush()?;
        trace!("Wrote {} bytes", out.written());

        // Verify
        let summary = stream.finish(entry)?;
        progress.update_completed(entry.payload_size().saturating_sub(reported));
        Ok(Some(summary))
    }
}
