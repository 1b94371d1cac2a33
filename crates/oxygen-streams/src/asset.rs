//! The asset service: listing, downloading, and uploading level assets.
//!
//! Files live under one asset directory on the client. Transfers use the
//! chunked sub-protocol in [`crate::transfer`]; the listing is a plain
//! request answered by `ACK, count: i32, name: string × count`.

use std::path::{Path, PathBuf};

use oxygen_protocol::{Message, ProtocolError, Reply};
use oxygen_transport::{Registry, StreamError, Subscriber, SubscriberId, TransportError};

use crate::transfer::{
    DownloadStream, TransferConfig, TransferOutcome, TransferProgress, UploadStream,
};

pub const ASSET_NODE: &str = "ASSET_SVR";

const ASSET_LIST: &str = "ASSET_LIST";
const ASSET_DOWNLOAD_STREAM: &str = "ASSET_DOWNLOAD_STREAM";
const ASSET_UPLOAD_STREAM: &str = "ASSET_UPLOAD_STREAM";

/// Asset operations bound to one local directory.
///
/// One download and one upload can be in flight at a time.
#[derive(Debug)]
pub struct AssetService {
    dir: PathBuf,
    download: DownloadStream,
    upload: UploadStream,
}

impl AssetService {
    pub fn new(dir: impl Into<PathBuf>, config: &TransferConfig) -> Self {
        let dir = dir.into();
        Self {
            download: DownloadStream::new(ASSET_NODE, ASSET_DOWNLOAD_STREAM, dir.clone()),
            upload: UploadStream::new(ASSET_NODE, ASSET_UPLOAD_STREAM, dir.clone(), config),
            dir,
        }
    }

    pub fn asset_dir(&self) -> &Path {
        &self.dir
    }

    /// Asks the server for the names of every asset it holds.
    pub fn asset_list<F>(&self, registry: &mut Registry, on_list: F) -> Result<SubscriberId, TransportError>
    where
        F: FnOnce(Result<Vec<String>, StreamError>) + Send + 'static,
    {
        registry.add(Subscriber::once(
            Message::new(ASSET_NODE, ASSET_LIST),
            move |_ctx, reply| on_list(read_asset_list(reply)),
        ))
    }

    /// Downloads `name` into the asset directory.
    ///
    /// Pass the checksum of the local copy, if there is one, so the
    /// server can tell whether it changed.
    pub fn download_asset<F>(
        &mut self,
        registry: &mut Registry,
        name: &str,
        checksum: Option<&str>,
        on_complete: F,
    ) -> Result<bool, StreamError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        self.download.download(registry, name, checksum, on_complete)
    }

    /// Uploads `name` from the asset directory.
    pub fn upload_asset<F>(
        &mut self,
        registry: &mut Registry,
        name: &str,
        on_complete: F,
    ) -> Result<bool, StreamError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        self.upload.upload(registry, name, on_complete)
    }

    pub fn is_downloading(&self) -> bool {
        self.download.is_downloading()
    }

    pub fn is_uploading(&self) -> bool {
        self.upload.is_uploading()
    }

    pub fn download_progress(&self) -> TransferProgress {
        self.download.progress()
    }

    pub fn upload_progress(&self) -> TransferProgress {
        self.upload.progress()
    }
}

fn read_asset_list(reply: &mut Message) -> Result<Vec<String>, StreamError> {
    if let Reply::Nack(error) = Reply::read(reply)? {
        return Err(error.into());
    }
    let count = reply.read_i32()?;
    let count = usize::try_from(count).map_err(|_| ProtocolError::NegativeLength(count))?;
    // Each name needs at least its 4-byte length prefix.
    let mut names = Vec::with_capacity(count.min(reply.remaining() / 4));
    for _ in 0..count {
        names.push(reply.read_string()?);
    }
    Ok(names)
}
