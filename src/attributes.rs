//! Restoration of file metadata after extraction
use crate::model::EntryHeader;
use std::path::Path;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Applies entry metadata to an extracted file or directory
///
/// Called once the entry data is completely written. A failure is reported
/// but never undoes the extraction
pub trait AttributeRestorer {
    /// Applies the metadata of `entry` to `path`
    fn apply(&self, entry: &EntryHeader, path: &Path) -> Result<(), std::io::Error>;
}

/// A restorer which does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAttributes;

impl AttributeRestorer for NoAttributes {
    fn apply(&self, _entry: &EntryHeader, _path: &Path) -> Result<(), std::io::Error> {
        Ok(())
    }
}

/// Restores the modification time and, on Unix, the permission bits of
/// extracted files
#[derive(Debug, Default, Clone, Copy)]
pub struct FsAttributeRestorer;

impl AttributeRestorer for FsAttributeRestorer {
    fn apply(&self, entry: &EntryHeader, path: &Path) -> Result<(), std::io::Error> {
        if let Some(mtime) = entry.mtime() {
            // DOS times carry no zone
            let secs = mtime.assume_utc().unix_timestamp();
            let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs.max(0) as u64);
            std::fs::OpenOptions::new()
                .write(true)
                .open(path)?
                .set_modified(mtime)?;
        }
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let mode = mode & 0o7777;
            trace!("Setting mode {mode:o} on {}", path.display());
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }
}
