//! The subscriber registry and dispatch.
//!
//! The registry owns every live [`Subscriber`], keyed by id. It is driven
//! from exactly one place: the caller's `process` loop. That is why it is
//! a plain `BTreeMap` with no locking: the I/O workers never touch it.
//! They only see the two queues behind [`FrameSender`].
//!
//! # Dispatch and mutation
//!
//! Listeners may add and remove subscribers while a frame is being
//! dispatched. Two rules make that safe without iterating a live map:
//!
//! 1. The ids matching a frame are collected before any listener runs.
//!    A subscriber added by a listener does not see the frame that
//!    triggered its creation.
//! 2. Each matching subscriber is taken out of the map while its own
//!    listeners run, and put back afterwards unless it was removed in
//!    the meantime. A subscriber removed by an earlier listener is
//!    skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use oxygen_protocol::Message;
use tokio::sync::mpsc;

use crate::subscriber::Context;
use crate::{ConnectionStats, Subscriber, SubscriberId, TransportError};

/// Cloneable handle for putting frames on the connection's queues.
///
/// Stream tasks that outlive a single dispatch (the upload sender) hold
/// one of these instead of the registry.
#[derive(Debug, Clone)]
pub struct FrameSender {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    loopback: mpsc::UnboundedSender<Message>,
}

impl FrameSender {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        loopback: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self { outbound, loopback }
    }

    /// Prepares `msg` and queues it for the writer task.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the writer has stopped.
    pub fn send(&self, msg: Message) -> Result<(), TransportError> {
        self.send_frame(msg.into_frame())
    }

    pub(crate) fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed("writer stopped".into()))
    }

    /// Queues `msg` for dispatch as if it had arrived from the server.
    ///
    /// Used for client-side events that must reach a subscriber on the
    /// dispatching task, such as the end of an upload.
    pub fn post_local(&self, msg: Message) -> Result<(), TransportError> {
        self.loopback
            .send(msg)
            .map_err(|_| TransportError::ConnectionClosed("dispatch queue closed".into()))
    }
}

/// Live subscribers of one connection.
pub struct Registry {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    next_id: i32,
    sender: FrameSender,
    stats: Arc<ConnectionStats>,
    /// Subscriber currently checked out for dispatch.
    dispatching: Option<SubscriberId>,
    /// Set when the checked-out subscriber is removed by a listener.
    removed_while_dispatching: bool,
}

impl Registry {
    pub(crate) fn new(sender: FrameSender, stats: Arc<ConnectionStats>) -> Self {
        Self {
            subscribers: BTreeMap::new(),
            next_id: 1,
            sender,
            stats,
            dispatching: None,
            removed_while_dispatching: false,
        }
    }

    /// Assigns the next id, sends the request, and registers the
    /// subscriber for dispatch.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the writer has stopped. The subscriber is
    /// not registered in that case.
    pub fn add(&mut self, mut subscriber: Subscriber) -> Result<SubscriberId, TransportError> {
        let id = SubscriberId::new(self.next_id);
        // Ids stay non-negative: -1 means "unset" on the wire.
        self.next_id = self.next_id.checked_add(1).unwrap_or(0);

        subscriber.set_id(id);
        self.sender.send_frame(subscriber.request().as_bytes().to_vec())?;

        tracing::debug!(
            %id,
            node = subscriber.request().node_name(),
            message = subscriber.request().message_name(),
            "subscriber added"
        );
        self.subscribers.insert(id, subscriber);
        Ok(id)
    }

    /// Unregisters a subscriber. Frames already queued for sending are
    /// still sent. Returns false if the id was not registered.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let removed = if self.subscribers.remove(&id).is_some() {
            true
        } else if self.dispatching == Some(id) && !self.removed_while_dispatching {
            self.removed_while_dispatching = true;
            true
        } else {
            false
        };
        if removed {
            tracing::debug!(%id, "subscriber removed");
        }
        removed
    }

    /// True if `id` is registered (or currently being dispatched to).
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
            || (self.dispatching == Some(id) && !self.removed_while_dispatching)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len() + usize::from(self.dispatching.is_some() && !self.removed_while_dispatching)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends a frame that expects no reply.
    pub fn send(&self, msg: Message) -> Result<(), TransportError> {
        self.sender.send(msg)
    }

    /// A handle for sending frames from outside dispatch.
    pub fn frame_sender(&self) -> FrameSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Delivers `msg` to every subscriber it is addressed to.
    ///
    /// Returns the number of subscribers that received it.
    pub fn dispatch(&mut self, msg: &Message) -> usize {
        let matching: Vec<SubscriberId> = self
            .subscribers
            .iter()
            .filter(|(_, sub)| sub.matches(msg))
            .map(|(id, _)| *id)
            .collect();

        if matching.is_empty() {
            tracing::debug!(
                id = msg.id(),
                node = msg.node_name(),
                message = msg.message_name(),
                "no subscriber for frame, dropped"
            );
            return 0;
        }

        let mut delivered = 0;
        for id in matching {
            // Removed by a listener that ran earlier for this frame.
            let Some(mut subscriber) = self.subscribers.remove(&id) else {
                continue;
            };

            self.dispatching = Some(id);
            self.removed_while_dispatching = false;
            subscriber.deliver(&mut Context::new(self, id), msg);
            delivered += 1;

            let removed = self.removed_while_dispatching;
            self.dispatching = None;
            self.removed_while_dispatching = false;
            if !removed {
                self.subscribers.insert(id, subscriber);
            }
        }
        delivered
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("subscribers", &self.subscribers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
