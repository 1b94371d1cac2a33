//! The build service: fetching build artefacts.

use std::path::{Path, PathBuf};

use oxygen_transport::{Registry, StreamError};

use crate::transfer::{DownloadStream, TransferOutcome, TransferProgress};

pub const BUILD_NODE: &str = "BUILD_SVR";

const ARTEFACT_DOWNLOAD_STREAM: &str = "ARTEFACT_DOWNLOAD_STREAM";

/// Downloads build artefacts into one local directory, one at a time.
#[derive(Debug)]
pub struct BuildService {
    download: DownloadStream,
}

impl BuildService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            download: DownloadStream::new(BUILD_NODE, ARTEFACT_DOWNLOAD_STREAM, dir),
        }
    }

    pub fn build_dir(&self) -> &Path {
        self.download.dir()
    }

    /// Downloads artefact `name` into the build directory.
    ///
    /// Returns `Ok(false)` if another artefact is still downloading.
    pub fn download_artefact<F>(
        &mut self,
        registry: &mut Registry,
        name: &str,
        on_complete: F,
    ) -> Result<bool, StreamError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        self.download.download(registry, name, None, on_complete)
    }

    pub fn is_downloading(&self) -> bool {
        self.download.is_downloading()
    }

    pub fn progress(&self) -> TransferProgress {
        self.download.progress()
    }
}
