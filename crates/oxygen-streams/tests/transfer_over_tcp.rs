//! Chunked transfers over a real loopback connection.
//!
//! The server side is played by hand with raw frames, so these tests pin
//! down the exact frame sequence each direction puts on the socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use oxygen_protocol::{HEADER_LEN, Message, TransferOp, TransferStatus, parse_header};
use oxygen_streams::{AssetService, TransferConfig, TransferOutcome};
use oxygen_transport::{Connection, ConnectionConfig, StreamError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TIMEOUT: Duration = Duration::from_secs(5);

type Slot = Arc<Mutex<Option<Result<TransferOutcome, StreamError>>>>;

async fn listen() -> (TcpListener, ConnectionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
    let port = listener.local_addr().unwrap().port();
    let config = ConnectionConfig {
        port,
        ..ConnectionConfig::new("127.0.0.1")
    };
    (listener, config)
}

async fn read_message(socket: &mut TcpStream) -> Message {
    let mut header = [0u8; HEADER_LEN];
    socket.read_exact(&mut header).await.expect("header");
    let (size, id) = parse_header(&header);
    let mut body = vec![0u8; size as usize];
    socket.read_exact(&mut body).await.expect("body");
    Message::from_body(id, &body).expect("client frame should parse")
}

async fn write_message(socket: &mut TcpStream, msg: Message) {
    socket.write_all(&msg.into_frame()).await.expect("write");
}

/// A stream frame addressed to `request`, starting with `op`.
fn frame(request: &Message, op: TransferOp) -> Message {
    let mut msg = Message::new(request.node_name(), request.message_name());
    msg.set_id(request.id());
    msg.write_i32(op as i32);
    msg
}

async fn pump_until_filled(conn: &mut Connection, slot: &Slot) {
    tokio::time::timeout(TIMEOUT, async {
        while slot.lock().unwrap().is_none() {
            conn.process(true).await.expect("connection should stay up");
        }
    })
    .await
    .expect("transfer did not finish in time");
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

// ===========================================================================
// Download
// ===========================================================================

#[tokio::test]
async fn test_download_over_tcp_is_byte_identical() {
    let (listener, config) = listen().await;
    let expected = content(2500);
    let served = expected.clone();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut open = read_message(&mut socket).await;
        assert_eq!(open.read_i32().unwrap(), TransferOp::Open as i32);
        let name = open.read_string().unwrap();

        let mut status = frame(&open, TransferOp::Status);
        status.write_i32(TransferStatus::Ok as i32);
        write_message(&mut socket, status).await;

        let mut transfer = frame(&open, TransferOp::Transfer);
        transfer.write_string(&name).write_i32(served.len() as i32).write_i32(1024);
        write_message(&mut socket, transfer).await;

        for chunk in served.chunks(1024) {
            let mut data = frame(&open, TransferOp::Data);
            data.write_bytes(chunk);
            write_message(&mut socket, data).await;
        }
        write_message(&mut socket, frame(&open, TransferOp::End)).await;
        socket
    });

    let dir = tempfile::tempdir().unwrap();
    let mut conn = Connection::connect(&config).await.unwrap();
    let mut assets = AssetService::new(dir.path(), &TransferConfig::default());
    let slot: Slot = Arc::default();
    let done = Arc::clone(&slot);
    assets
        .download_asset(conn.registry(), "terrain.raw", None, move |r| {
            *done.lock().unwrap() = Some(r);
        })
        .unwrap();

    pump_until_filled(&mut conn, &slot).await;
    let _socket = server.await.unwrap();

    let outcome = slot.lock().unwrap().take().unwrap().unwrap();
    assert_eq!(outcome.bytes, 2500);
    assert_eq!(std::fs::read(dir.path().join("terrain.raw")).unwrap(), expected);
    assert!(!assets.is_downloading());
}

// ===========================================================================
// Upload
// ===========================================================================

#[tokio::test]
async fn test_upload_over_tcp_sends_chunks_and_end() {
    let (listener, config) = listen().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut open = read_message(&mut socket).await;
        assert_eq!(open.read_i32().unwrap(), TransferOp::Open as i32);
        assert_eq!(open.read_string().unwrap(), "house.obj");
        let size = open.read_i32().unwrap();

        let mut status = frame(&open, TransferOp::Status);
        status.write_i32(TransferStatus::Ok as i32);
        write_message(&mut socket, status).await;

        let mut transfer = read_message(&mut socket).await;
        assert_eq!(transfer.id(), open.id());
        assert_eq!(transfer.read_i32().unwrap(), TransferOp::Transfer as i32);
        assert_eq!(transfer.read_string().unwrap(), "house.obj");
        assert_eq!(transfer.read_i32().unwrap(), size);
        let chunk = transfer.read_i32().unwrap();

        let mut received = Vec::new();
        let mut data_frames = 0;
        loop {
            let mut msg = read_message(&mut socket).await;
            match TransferOp::from_i32(msg.read_i32().unwrap()) {
                Some(TransferOp::Data) => {
                    received.extend(msg.read_bytes().unwrap());
                    data_frames += 1;
                }
                Some(TransferOp::End) => break,
                other => panic!("unexpected frame {other:?}"),
            }
        }
        (socket, chunk, data_frames, received)
    });

    let dir = tempfile::tempdir().unwrap();
    let expected = content(3000);
    std::fs::write(dir.path().join("house.obj"), &expected).unwrap();

    let mut conn = Connection::connect(&config).await.unwrap();
    let config = TransferConfig { chunk_size: 1000 };
    let mut assets = AssetService::new(dir.path(), &config);
    let slot: Slot = Arc::default();
    let done = Arc::clone(&slot);
    assets
        .upload_asset(conn.registry(), "house.obj", move |r| {
            *done.lock().unwrap() = Some(r);
        })
        .unwrap();

    pump_until_filled(&mut conn, &slot).await;
    let (_socket, chunk, data_frames, received) =
        tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();

    assert!(slot.lock().unwrap().take().unwrap().is_ok());
    assert_eq!(chunk, 1000);
    assert_eq!(data_frames, 3);
    assert_eq!(received, expected);
}
