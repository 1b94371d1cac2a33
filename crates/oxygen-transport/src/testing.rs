//! A socket-free harness for driving a [`Registry`].
//!
//! `TestWire` plays the part of the connection: it owns both ends of the
//! outbound and inbound queues, so a test can read what the client sent,
//! feed it server frames, and let client-local events (upload completion)
//! flow back through dispatch.

use std::sync::Arc;

use oxygen_protocol::Message;
use tokio::sync::mpsc;

use crate::registry::FrameSender;
use crate::{ConnectionStats, Registry};

/// An in-memory stand-in for a [`Connection`](crate::Connection).
pub struct TestWire {
    registry: Registry,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Message>,
}

impl TestWire {
    pub fn new() -> Self {
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (in_tx, inbound) = mpsc::unbounded_channel();
        Self {
            registry: Registry::new(
                FrameSender::new(out_tx, in_tx),
                Arc::new(ConnectionStats::default()),
            ),
            outbound,
            inbound,
        }
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Every frame the client has sent since the last call, parsed.
    ///
    /// # Panics
    ///
    /// If the client produced a frame that does not parse.
    pub fn sent(&mut self) -> Vec<Message> {
        let mut sent = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            sent.push(Message::from_frame(&frame).expect("client sent a malformed frame"));
        }
        sent
    }

    /// Delivers a server frame, as if the reader had just received it,
    /// then dispatches anything the client posted locally in response.
    ///
    /// The frame goes through the wire format first, so the stream under
    /// test reads it from a fresh cursor just like a real inbound frame.
    pub fn deliver(&mut self, msg: Message) -> usize {
        let msg = Message::from_frame(&msg.into_frame()).expect("test frame does not parse");
        self.registry.dispatch(&msg) + self.process()
    }

    /// Dispatches client-local frames that are already queued.
    pub fn process(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(msg) = self.inbound.try_recv() {
            delivered += self.registry.dispatch(&msg);
        }
        delivered
    }

    /// Waits for the next client-local frame (e.g. from a spawned upload
    /// task), dispatches it, and returns the dispatch count.
    pub async fn process_wait(&mut self) -> usize {
        match self.inbound.recv().await {
            Some(msg) => self.registry.dispatch(&msg) + self.process(),
            None => 0,
        }
    }
}

impl Default for TestWire {
    fn default() -> Self {
        Self::new()
    }
}
