//! The receiving side of a chunked transfer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use oxygen_protocol::{Message, ProtocolError, TransferOp};
use oxygen_transport::{Context, Registry, StreamError, StreamHandler, Subscriber, SubscriberId};

use super::{Progress, TransferCallback, TransferOutcome, TransferProgress, TransferState, read_status, resolve};
use crate::lock;

/// Downloads files from one transfer endpoint into one directory.
#[derive(Debug)]
pub struct DownloadStream {
    node: String,
    stream: String,
    dir: PathBuf,
    progress: Progress,
    active: Option<SubscriberId>,
}

impl DownloadStream {
    pub fn new(node: impl Into<String>, stream: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            node: node.into(),
            stream: stream.into(),
            dir: dir.into(),
            progress: Progress::default(),
            active: None,
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Requests `name` and writes it to `dir/name`.
    ///
    /// `checksum` is the checksum of a copy the client already holds; the
    /// server may use it to skip sending an unchanged file.
    ///
    /// Returns `Ok(false)` without sending anything if a download is
    /// already in flight. `on_complete` then never fires.
    pub fn download<F>(
        &mut self,
        registry: &mut Registry,
        name: &str,
        checksum: Option<&str>,
        on_complete: F,
    ) -> Result<bool, StreamError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        if self.is_downloading() {
            tracing::debug!(%name, "download already in flight");
            return Ok(false);
        }
        let path = resolve(&self.dir, name)?;

        let mut request = Message::new(self.node.as_str(), self.stream.as_str());
        request.write_i32(TransferOp::Open as i32).write_string(name);
        if let Some(checksum) = checksum {
            request.write_string(checksum);
        }

        *lock(&self.progress) = TransferProgress {
            state: TransferState::AwaitingOpenAck,
            file_name: name.to_string(),
            ..TransferProgress::default()
        };

        let handler = DownloadHandler {
            file_name: name.to_string(),
            path,
            file: None,
            created: false,
            checksum: None,
            progress: Arc::clone(&self.progress),
            on_complete: Some(Box::new(on_complete)),
        };
        match registry.add(Subscriber::with_handler(request, handler)) {
            Ok(id) => {
                tracing::info!(%id, %name, "download requested");
                self.active = Some(id);
                Ok(true)
            }
            Err(e) => {
                lock(&self.progress).state = TransferState::Error;
                Err(e.into())
            }
        }
    }

    pub fn progress(&self) -> TransferProgress {
        lock(&self.progress).clone()
    }

    pub fn is_downloading(&self) -> bool {
        lock(&self.progress).state.is_active()
    }

    /// Subscriber id of the current (or last) download.
    pub fn id(&self) -> Option<SubscriberId> {
        self.active
    }
}

struct DownloadHandler {
    file_name: String,
    path: PathBuf,
    file: Option<BufWriter<File>>,
    /// Set once the destination has been created (or truncated).
    created: bool,
    checksum: Option<String>,
    progress: Progress,
    on_complete: Option<TransferCallback>,
}

impl DownloadHandler {
    fn begin(&mut self, msg: &mut Message) -> Result<(), StreamError> {
        if lock(&self.progress).state != TransferState::AwaitingOpenAck {
            return Err(ProtocolError::UnexpectedOpcode {
                context: "download TRANSFER after transfer started",
                opcode: TransferOp::Transfer as i32,
            }
            .into());
        }
        let name = msg.read_string()?;
        let size = msg.read_i32()?;
        let chunk = msg.read_i32()?;
        let total = u64::try_from(size).map_err(|_| ProtocolError::NegativeLength(size))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.file = Some(BufWriter::new(File::create(&self.path)?));
        self.created = true;

        let mut progress = lock(&self.progress);
        progress.state = TransferState::Transferring;
        progress.total_size = total;
        tracing::debug!(%name, size = total, chunk, "download started");
        Ok(())
    }

    fn finish(&mut self, ctx: &mut Context<'_>) -> Result<(), StreamError> {
        let Some(mut file) = self.file.take() else {
            return Err(ProtocolError::UnexpectedOpcode {
                context: "download END before TRANSFER",
                opcode: TransferOp::End as i32,
            }
            .into());
        };
        file.flush()?;
        drop(file);

        let (expected, received) = {
            let progress = lock(&self.progress);
            (progress.total_size, progress.bytes_moved)
        };
        if expected != received {
            return Err(StreamError::IncompleteTransfer { expected, received });
        }

        lock(&self.progress).state = TransferState::Done;
        tracing::info!(file = %self.file_name, bytes = received, "download complete");
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Ok(TransferOutcome {
                file_name: self.file_name.clone(),
                path: self.path.clone(),
                bytes: received,
                checksum: self.checksum.take(),
            }));
        }
        ctx.close();
        Ok(())
    }
}

impl StreamHandler for DownloadHandler {
    fn on_message(&mut self, ctx: &mut Context<'_>, msg: &mut Message) -> Result<(), StreamError> {
        let opcode = msg.read_i32()?;
        match TransferOp::from_i32(opcode) {
            Some(TransferOp::Status) => {
                read_status(msg, "download")?;
                tracing::debug!(file = %self.file_name, "download accepted");
            }
            Some(TransferOp::Metadata) => {
                let _name = msg.read_string()?;
                self.checksum = Some(msg.read_string()?);
            }
            Some(TransferOp::Transfer) => self.begin(msg)?,
            Some(TransferOp::Data) => {
                let Some(file) = self.file.as_mut() else {
                    return Err(ProtocolError::UnexpectedOpcode {
                        context: "download DATA before TRANSFER",
                        opcode,
                    }
                    .into());
                };
                let bytes = msg.read_bytes()?;
                file.write_all(&bytes)?;
                let mut progress = lock(&self.progress);
                progress.bytes_moved += bytes.len() as u64;
                tracing::trace!(bytes = bytes.len(), total = progress.bytes_moved, "chunk received");
            }
            Some(TransferOp::ProtocolError) => {
                return Err(StreamError::Remote {
                    context: "download",
                    message: msg.read_string()?,
                });
            }
            Some(TransferOp::End) => self.finish(ctx)?,
            Some(TransferOp::Open) | None => {
                return Err(ProtocolError::UnexpectedOpcode {
                    context: "download",
                    opcode,
                }
                .into());
            }
        }
        Ok(())
    }

    fn on_error(&mut self, _ctx: &mut Context<'_>, error: StreamError) {
        // A truncated file is worse than none.
        self.file = None;
        if self.created {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!(path = %self.path.display(), error = %e, "could not remove partial download");
            }
        }
        lock(&self.progress).state = TransferState::Error;
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Err(error));
        }
    }
}
