//! The sending side of a chunked transfer.
//!
//! Once the server accepts the OPEN, a tokio task reads the file and
//! queues TRANSFER, the DATA frames, and END through a
//! [`FrameSender`]. The task never touches the registry. When it is done
//! it posts a completion frame back onto the connection's inbound queue,
//! so the completion callback runs on the dispatching task like every
//! other callback.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use oxygen_protocol::{Message, ProtocolError, TransferOp, TransferStatus};
use oxygen_transport::{
    Context, FrameSender, Registry, StreamError, StreamHandler, Subscriber, SubscriberId,
};
use tokio::io::AsyncReadExt;

use super::{
    Progress, TransferCallback, TransferConfig, TransferOutcome, TransferProgress, TransferState,
    read_status, resolve,
};
use crate::lock;

/// Opcode of the completion frame the sender task posts locally.
/// Negative, so it can never collide with a server opcode.
const SENDER_DONE: i32 = -1;

/// Uploads files from one directory to one transfer endpoint.
#[derive(Debug)]
pub struct UploadStream {
    node: String,
    stream: String,
    dir: PathBuf,
    chunk_size: usize,
    progress: Progress,
    active: Option<SubscriberId>,
}

impl UploadStream {
    pub fn new(
        node: impl Into<String>,
        stream: impl Into<String>,
        dir: impl Into<PathBuf>,
        config: &TransferConfig,
    ) -> Self {
        // DATA frames carry an i32 length.
        let max_chunk = usize::try_from(i32::MAX).unwrap_or(usize::MAX);
        Self {
            node: node.into(),
            stream: stream.into(),
            dir: dir.into(),
            chunk_size: config.chunk_size.clamp(1, max_chunk),
            progress: Progress::default(),
            active: None,
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Offers `dir/name` to the server and sends it once accepted.
    ///
    /// Must be called from within a tokio runtime. Returns `Ok(false)`
    /// without sending anything if an upload is already in flight.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read or is too large for the wire's
    /// 32-bit size field.
    pub fn upload<F>(
        &mut self,
        registry: &mut Registry,
        name: &str,
        on_complete: F,
    ) -> Result<bool, StreamError>
    where
        F: FnOnce(Result<TransferOutcome, StreamError>) + Send + 'static,
    {
        if self.is_uploading() {
            tracing::debug!(%name, "upload already in flight");
            return Ok(false);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(io::Error::other("upload requires a tokio runtime").into());
        }

        let path = resolve(&self.dir, name)?;
        let size = std::fs::metadata(&path)?.len();
        let wire_size = i32::try_from(size).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{name} is {size} bytes, over the transfer limit"),
            )
        })?;

        let mut request = Message::new(self.node.as_str(), self.stream.as_str());
        request
            .write_i32(TransferOp::Open as i32)
            .write_string(name)
            .write_i32(wire_size);

        *lock(&self.progress) = TransferProgress {
            state: TransferState::AwaitingOpenAck,
            file_name: name.to_string(),
            total_size: size,
            bytes_moved: 0,
        };

        let handler = UploadHandler {
            node: self.node.clone(),
            stream: self.stream.clone(),
            job: Some(SendJob {
                name: name.to_string(),
                path: path.clone(),
                size,
                chunk_size: self.chunk_size,
            }),
            file_name: name.to_string(),
            path,
            size,
            progress: Arc::clone(&self.progress),
            cancelled: Arc::new(AtomicBool::new(false)),
            on_complete: Some(Box::new(on_complete)),
        };
        match registry.add(Subscriber::with_handler(request, handler)) {
            Ok(id) => {
                tracing::info!(%id, %name, size, "upload offered");
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

    pub fn is_uploading(&self) -> bool {
        lock(&self.progress).state.is_active()
    }

    /// Subscriber id of the current (or last) upload.
    pub fn id(&self) -> Option<SubscriberId> {
        self.active
    }
}

/// What the sender task needs to know about the file.
struct SendJob {
    name: String,
    path: PathBuf,
    size: u64,
    chunk_size: usize,
}

struct UploadHandler {
    node: String,
    stream: String,
    /// Taken when the sender task starts.
    job: Option<SendJob>,
    file_name: String,
    path: PathBuf,
    size: u64,
    progress: Progress,
    cancelled: Arc<AtomicBool>,
    on_complete: Option<TransferCallback>,
}

impl UploadHandler {
    fn start_sending(&mut self, ctx: &mut Context<'_>) {
        let Some(job) = self.job.take() else {
            tracing::debug!(file = %self.file_name, "duplicate STATUS ignored");
            return;
        };
        lock(&self.progress).state = TransferState::Transferring;

        let sender = Sender {
            frames: ctx.registry().frame_sender(),
            id: ctx.id(),
            node: self.node.clone(),
            stream: self.stream.clone(),
            progress: Arc::clone(&self.progress),
            cancelled: Arc::clone(&self.cancelled),
        };
        tokio::spawn(async move {
            let result = sender.send_file(&job).await;
            let mut done = sender.frame(SENDER_DONE);
            match result {
                Ok(bytes) => {
                    tracing::debug!(file = %job.name, bytes, "upload sent");
                    done.write_i32(TransferStatus::Ok as i32);
                }
                Err(error) => {
                    tracing::warn!(file = %job.name, %error, "upload sender failed");
                    done.write_i32(TransferStatus::Error as i32)
                        .write_string(&error.to_string());
                }
            }
            if sender.frames.post_local(done).is_err() {
                tracing::debug!(file = %job.name, "connection gone before upload completed");
            }
        });
    }

    fn complete(&mut self, ctx: &mut Context<'_>, msg: &mut Message) -> Result<(), StreamError> {
        let status = msg.read_i32()?;
        if status != TransferStatus::Ok as i32 {
            return Err(io::Error::other(msg.read_string()?).into());
        }

        lock(&self.progress).state = TransferState::Done;
        tracing::info!(file = %self.file_name, bytes = self.size, "upload complete");
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Ok(TransferOutcome {
                file_name: self.file_name.clone(),
                path: self.path.clone(),
                bytes: self.size,
                checksum: None,
            }));
        }
        ctx.close();
        Ok(())
    }
}

impl StreamHandler for UploadHandler {
    fn on_message(&mut self, ctx: &mut Context<'_>, msg: &mut Message) -> Result<(), StreamError> {
        let opcode = msg.read_i32()?;
        match TransferOp::from_i32(opcode) {
            Some(TransferOp::Status) => {
                read_status(msg, "upload")?;
                self.start_sending(ctx);
            }
            Some(TransferOp::ProtocolError) => {
                return Err(StreamError::Remote {
                    context: "upload",
                    message: msg.read_string()?,
                });
            }
            Some(TransferOp::End) => {
                return Err(StreamError::Remote {
                    context: "upload",
                    message: "server ended the stream before the upload finished".into(),
                });
            }
            None if opcode == SENDER_DONE => self.complete(ctx, msg)?,
            Some(_) | None => {
                return Err(ProtocolError::UnexpectedOpcode {
                    context: "upload",
                    opcode,
                }
                .into());
            }
        }
        Ok(())
    }

    fn on_error(&mut self, _ctx: &mut Context<'_>, error: StreamError) {
        self.cancelled.store(true, Ordering::Relaxed);
        lock(&self.progress).state = TransferState::Error;
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Err(error));
        }
    }
}

/// The sender task's handle on the connection. Every frame it sends is
/// stamped with the upload subscriber's names and id.
struct Sender {
    frames: FrameSender,
    id: SubscriberId,
    node: String,
    stream: String,
    progress: Progress,
    cancelled: Arc<AtomicBool>,
}

impl Sender {
    fn frame(&self, opcode: i32) -> Message {
        let mut msg = Message::new(self.node.as_str(), self.stream.as_str());
        msg.set_id(self.id.into_inner());
        msg.write_i32(opcode);
        msg
    }

    /// Sends TRANSFER, `⌈size / chunk⌉` DATA frames, and END.
    async fn send_file(&self, job: &SendJob) -> Result<u64, StreamError> {
        let mut file = tokio::fs::File::open(&job.path).await?;
        let size = i32::try_from(job.size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file too large"))?;
        let chunk = i32::try_from(job.chunk_size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk too large"))?;

        let mut transfer = self.frame(TransferOp::Transfer as i32);
        transfer.write_string(&job.name).write_i32(size).write_i32(chunk);
        self.frames.send(transfer)?;

        let mut buf = vec![0u8; job.chunk_size];
        let mut sent = 0u64;
        while sent < job.size {
            if self.cancelled.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "upload cancelled").into());
            }
            let n = (job.size - sent).min(job.chunk_size as u64) as usize;
            file.read_exact(&mut buf[..n]).await?;

            let mut data = self.frame(TransferOp::Data as i32);
            data.write_bytes(&buf[..n]);
            self.frames.send(data)?;

            sent += n as u64;
            lock(&self.progress).bytes_moved = sent;
            tracing::trace!(bytes = n, total = sent, "chunk queued");
        }

        self.frames.send(self.frame(TransferOp::End as i32))?;
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_transport::testing::TestWire;
    use std::sync::mpsc;

    const NODE: &str = "ASSET_SVR";
    const STREAM: &str = "ASSET_UPLOAD_STREAM";

    type Outcome = Result<TransferOutcome, StreamError>;

    fn setup(content: &[u8], chunk_size: usize) -> (TestWire, UploadStream, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.obj"), content).unwrap();
        let stream = UploadStream::new(NODE, STREAM, dir.path(), &TransferConfig { chunk_size });
        (TestWire::new(), stream, dir)
    }

    fn start(wire: &mut TestWire, stream: &mut UploadStream) -> mpsc::Receiver<Outcome> {
        let (tx, rx) = mpsc::channel();
        assert!(stream
            .upload(wire.registry(), "model.obj", move |r| tx.send(r).unwrap())
            .unwrap());
        rx
    }

    fn status(stream: &UploadStream, status: TransferStatus, text: Option<&str>) -> Message {
        let mut msg = Message::new(NODE, STREAM);
        msg.set_id(stream.id().unwrap().into_inner());
        msg.write_i32(TransferOp::Status as i32).write_i32(status as i32);
        if let Some(text) = text {
            msg.write_string(text);
        }
        msg
    }

    #[tokio::test]
    async fn test_upload_open_carries_name_and_size() {
        let (mut wire, mut stream, _dir) = setup(&[0; 300], 1024);
        let _done = start(&mut wire, &mut stream);

        let mut sent = wire.sent();
        assert_eq!(sent.len(), 1);
        let open = &mut sent[0];
        assert_eq!(open.read_i32().unwrap(), TransferOp::Open as i32);
        assert_eq!(open.read_string().unwrap(), "model.obj");
        assert_eq!(open.read_i32().unwrap(), 300);
        assert_eq!(stream.progress().state, TransferState::AwaitingOpenAck);
    }

    #[tokio::test]
    async fn test_upload_sends_chunks_then_end() {
        let content: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();
        let (mut wire, mut stream, _dir) = setup(&content, 1024);
        let done = start(&mut wire, &mut stream);
        wire.sent();

        wire.deliver(status(&stream, TransferStatus::Ok, None));
        wire.process_wait().await;

        let outcome = done.try_recv().unwrap().unwrap();
        assert_eq!(outcome.bytes, 2500);

        let mut frames = wire.sent();
        let ops: Vec<i32> = frames.iter_mut().map(|m| m.read_i32().unwrap()).collect();
        assert_eq!(
            ops,
            vec![
                TransferOp::Transfer as i32,
                TransferOp::Data as i32,
                TransferOp::Data as i32,
                TransferOp::Data as i32,
                TransferOp::End as i32,
            ]
        );
        assert!(frames.iter().all(|m| m.id() == stream.id().unwrap().into_inner()));

        assert_eq!(frames[0].read_string().unwrap(), "model.obj");
        assert_eq!(frames[0].read_i32().unwrap(), 2500);
        assert_eq!(frames[0].read_i32().unwrap(), 1024);

        let mut received = Vec::new();
        for frame in &mut frames[1..4] {
            received.extend(frame.read_bytes().unwrap());
        }
        assert_eq!(received, content);

        assert_eq!(stream.progress().state, TransferState::Done);
        assert_eq!(stream.progress().bytes_moved, 2500);
        assert!(!wire.registry().contains(stream.id().unwrap()));
    }

    #[tokio::test]
    async fn test_upload_empty_file_sends_no_data() {
        let (mut wire, mut stream, _dir) = setup(&[], 1024);
        let done = start(&mut wire, &mut stream);
        wire.sent();

        wire.deliver(status(&stream, TransferStatus::Ok, None));
        wire.process_wait().await;

        assert_eq!(done.try_recv().unwrap().unwrap().bytes, 0);
        let mut frames = wire.sent();
        let ops: Vec<i32> = frames.iter_mut().map(|m| m.read_i32().unwrap()).collect();
        assert_eq!(ops, vec![TransferOp::Transfer as i32, TransferOp::End as i32]);
    }

    #[tokio::test]
    async fn test_upload_status_error_fails_without_sending() {
        let (mut wire, mut stream, _dir) = setup(&[1, 2, 3], 1024);
        let done = start(&mut wire, &mut stream);
        wire.sent();

        wire.deliver(status(&stream, TransferStatus::Error, Some("quota exceeded")));

        match done.try_recv().unwrap() {
            Err(StreamError::Remote { context, message }) => {
                assert_eq!(context, "upload");
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
        assert!(wire.sent().is_empty());
        assert_eq!(stream.progress().state, TransferState::Error);
    }

    #[tokio::test]
    async fn test_upload_second_call_while_active_is_noop() {
        let (mut wire, mut stream, _dir) = setup(&[1], 1024);
        let _done = start(&mut wire, &mut stream);

        let again = stream.upload(wire.registry(), "model.obj", |_| {}).unwrap();

        assert!(!again);
        assert_eq!(wire.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut wire = TestWire::new();
        let mut stream = UploadStream::new(NODE, STREAM, dir.path(), &TransferConfig::default());

        let result = stream.upload(wire.registry(), "absent.bin", |_| {});

        assert!(matches!(result, Err(StreamError::Io(_))));
        assert!(!stream.is_uploading());
    }

    #[test]
    fn test_upload_outside_runtime_is_rejected() {
        let (mut wire, mut stream, _dir) = setup(&[1], 1024);
        let result = stream.upload(wire.registry(), "model.obj", |_| {});
        assert!(matches!(result, Err(StreamError::Io(_))));
        assert!(wire.sent().is_empty());
    }
}
