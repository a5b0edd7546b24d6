//! Whole archive extraction
//!
//! Entries are extracted one at a time, in central directory order. A failed
//! entry is reported and the batch moves on, unless configured to stop
use crate::error::ExtractError;
use crate::extract::{EntryOutcome, Extractor};
use crate::progress::{ExtractionProgress, ProgressSink, ProgressState};
use crate::volume::VolumeProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Summary of a batch extraction
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Outcome of every completed entry, with its name
    pub extracted: Vec<(String, EntryOutcome)>,
    /// Entries which failed, with the reason
    pub failures: Vec<(String, ExtractError)>,
    /// Whether the batch was cancelled
    pub cancelled: bool,
}

impl BatchReport {
    /// Whether every selected entry was extracted
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    fn state(&self) -> ProgressState {
        if !self.failures.is_empty() {
            ProgressState::Error
        } else if self.cancelled {
            ProgressState::Cancelled
        } else {
            ProgressState::Ready
        }
    }
}

impl<P: VolumeProvider> Extractor<P> {
    /// Extracts every entry below `dest`
    pub fn extract_all<T: AsRef<Path>>(&self, dest: T, progress: &dyn ProgressSink) -> BatchReport {
        self.extract_selected(dest, |_| true, progress)
    }

    /// Extracts the entries whose name satisfies `select` below `dest`
    ///
    /// Directories implied by the selected entries are created first. Total
    /// work is the compressed payload size of the selected files. Each
    /// failure is reported to the sink as it happens
    #[instrument(level = "debug", skip_all, fields(dest = %dest.as_ref().display()))]
    pub fn extract_selected<T, F>(&self, dest: T, select: F, progress: &dyn ProgressSink) -> BatchReport
    where
        T: AsRef<Path>,
        F: Fn(&str) -> bool,
    {
        let dest = dest.as_ref();
        let mut report = BatchReport::default();
        progress.set_state(ProgressState::Busy);

        let selected: Vec<_> = self
            .model
            .entries()
            .iter()
            .filter(|e| select(&e.name))
            .collect();
        let total: u64 = selected
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.payload_size())
            .sum();
        debug!("Extracting {} entries, {total} bytes", selected.len());
        progress.set_total_work(total);

        let implied = crate::model::directory_set(selected.iter().map(|e| e.name.as_str()));
        for dir in self
            .model
            .implicit_directories()
            .iter()
            .filter(|d| implied.contains(d.as_str()))
        {
            let res = crate::extract::safe_join(dest, dir).and_then(|path| {
                std::fs::create_dir_all(&path)?;
                Ok(path)
            });
            match res {
                Ok(path) => {
                    trace!("Created implicit directory {}", path.display());
                    report
                        .extracted
                        .push((dir.clone(), EntryOutcome::Directory { path }));
                }
                Err(e) => {
                    progress.report_error(&e);
                    report.failures.push((dir.clone(), e));
                }
            }
        }

        for entry in selected {
            if progress.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.config.stop_on_error && !report.failures.is_empty() {
                break;
            }
            match self.extract_one(entry, dest, progress) {
                Ok(EntryOutcome::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Ok(outcome) => report.extracted.push((entry.name.clone(), outcome)),
                Err(e) => {
                    warn!("Failed to extract {}: {e}", entry.name);
                    progress.report_error(&e);
                    report.failures.push((entry.name.clone(), e));
                }
            }
        }
        info!(
            "Batch done: {} extracted, {} failed{}",
            report.extracted.len(),
            report.failures.len(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        progress.set_state(report.state());
        report
    }
}

/// Records a worker thread panic on its tracker
fn worker_panicked(progress: Arc<ExtractionProgress>) {
    error!("Extraction thread panicked");
    progress.report_error(&ExtractError::Io(std::io::Error::other(
        "extraction thread panicked",
    )));
    progress.set_state(ProgressState::Error);
}

impl<P> Extractor<P>
where
    P: VolumeProvider + Send + 'static,
{
    /// Extracts every entry on a background thread
    ///
    /// Progress, cancellation and failures all go through `progress`; the
    /// thread returns the report once done. A panic in the worker leaves
    /// `progress` in the `Error` state
    pub fn spawn_extract_all(
        self,
        dest: PathBuf,
        progress: Arc<ExtractionProgress>,
    ) -> std::thread::JoinHandle<BatchReport> {
        std::thread::spawn(move || {
            let _unwind = scopeguard::guard_on_unwind(progress.clone(), worker_panicked);
            self.extract_all(dest, progress.as_ref())
        })
    }

    /// Extracts the entry at `index` on a background thread
    ///
    /// Any failure is delivered through `progress` rather than returned
    pub fn spawn_extract_entry(
        self,
        index: usize,
        dest: PathBuf,
        progress: Arc<ExtractionProgress>,
    ) -> std::thread::JoinHandle<Option<EntryOutcome>> {
        std::thread::spawn(move || {
            let _unwind = scopeguard::guard_on_unwind(progress.clone(), worker_panicked);
            self.extract_entry(index, dest, progress.as_ref()).ok()
        })
    }
}

