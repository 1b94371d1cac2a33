//! Subscribers: one request plus whatever listens for its replies.
//!
//! A [`Subscriber`] is the unit of correlation. It owns the request it
//! was created for, and once added to a [`Registry`] it is matched against
//! every inbound frame by the triple `(node name, message name, id)`.
//!
//! Two kinds of listener can hang off a subscriber:
//!
//! - a **stream handler** ([`StreamHandler`]): at most one, runs first,
//!   keeps protocol state (object snapshots, transfer progress, ...).
//! - **callbacks** ([`Subscriber::signal`]): any number, run after the
//!   handler in registration order, each with its own copy of the frame.
//!
//! Neither kind holds a handle to the subscriber itself. Both get a
//! [`Context`] that knows the subscriber's id, which is how a stream
//! removes itself when it ends.

use std::fmt;

use oxygen_protocol::Message;

use crate::{Registry, StreamError};

/// The correlation id a subscriber is registered under.
///
/// Ids are assigned by the registry in increasing order, so sorting by
/// id is sorting by registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(i32);

impl SubscriberId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    /// The raw value stamped into frame headers.
    pub fn into_inner(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a listener can do while it is being dispatched to.
///
/// Dispatch checks the subscriber out of the registry while its listeners
/// run, so a listener is free to add new subscribers, send frames, or
/// remove any subscriber (itself included) through this context.
pub struct Context<'a> {
    registry: &'a mut Registry,
    id: SubscriberId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(registry: &'a mut Registry, id: SubscriberId) -> Self {
        Self { registry, id }
    }

    /// The id of the subscriber being dispatched to.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut *self.registry
    }

    /// Unregisters the subscriber being dispatched to. Listeners that run
    /// after this one in the same delivery still see the frame.
    pub fn close(&mut self) {
        self.registry.remove(self.id);
    }
}

/// A fan-out callback. Gets its own copy of the frame.
pub type Callback = Box<dyn FnMut(&mut Context<'_>, &mut Message) + Send>;

/// Protocol logic for a long-lived stream.
///
/// Implemented once per stream kind (object replication, events, chunked
/// transfer, ...). The set of kinds is fixed, but a trait keeps each
/// kind's state machine in its own module.
pub trait StreamHandler: Send {
    /// Handles one inbound frame, before any callback sees it.
    ///
    /// Returning `Err` terminates the stream: dispatch logs the error,
    /// passes it to [`on_error`](Self::on_error), and unregisters the
    /// subscriber.
    fn on_message(
        &mut self,
        ctx: &mut Context<'_>,
        msg: &mut Message,
    ) -> Result<(), StreamError>;

    /// Error hook. Called once, just before the stream is unregistered.
    /// Takes the error by value so a stream can hand it to its caller.
    fn on_error(&mut self, _ctx: &mut Context<'_>, _error: StreamError) {}
}

/// One outgoing request and the listeners for its replies.
pub struct Subscriber {
    request: Message,
    id: Option<SubscriberId>,
    handler: Option<Box<dyn StreamHandler>>,
    callbacks: Vec<Callback>,
}

impl Subscriber {
    /// A plain request/response subscriber.
    pub fn new(request: Message) -> Self {
        Self {
            request,
            id: None,
            handler: None,
            callbacks: Vec::new(),
        }
    }

    /// A stream subscriber driven by `handler`.
    pub fn with_handler(request: Message, handler: impl StreamHandler + 'static) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new(request)
        }
    }

    /// Appends a callback to the fan-out list.
    pub fn signal<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut Context<'_>, &mut Message) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// A subscriber whose callback runs on the first reply, after which
    /// the subscriber removes itself. The common shape for ACK/NACK calls.
    pub fn once<F>(request: Message, callback: F) -> Self
    where
        F: FnOnce(&mut Context<'_>, &mut Message) + Send + 'static,
    {
        let mut callback = Some(callback);
        Self::new(request).signal(move |ctx, msg| {
            ctx.close();
            if let Some(callback) = callback.take() {
                callback(ctx, msg);
            }
        })
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    /// The id assigned when the subscriber was added, if it has been.
    pub fn id(&self) -> Option<SubscriberId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: SubscriberId) {
        self.id = Some(id);
        self.request.set_id(id.into_inner());
        self.request.prepare();
    }

    /// True if `msg` is addressed to this subscriber.
    pub(crate) fn matches(&self, msg: &Message) -> bool {
        self.id.map(SubscriberId::into_inner) == Some(msg.id())
            && self.request.node_name() == msg.node_name()
            && self.request.message_name() == msg.message_name()
    }

    /// Runs the handler, then every callback, each on its own copy of `msg`.
    pub(crate) fn deliver(&mut self, ctx: &mut Context<'_>, msg: &Message) {
        if let Some(handler) = self.handler.as_mut() {
            let mut copy = msg.clone();
            if let Err(error) = handler.on_message(ctx, &mut copy) {
                tracing::warn!(
                    id = %ctx.id(),
                    node = msg.node_name(),
                    message = msg.message_name(),
                    %error,
                    "stream terminated"
                );
                handler.on_error(ctx, error);
                ctx.close();
                return;
            }
        }

        for callback in &mut self.callbacks {
            let mut copy = msg.clone();
            callback(ctx, &mut copy);
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("node", &self.request.node_name())
            .field("message", &self.request.message_name())
            .field("id", &self.id)
            .field("stream", &self.handler.is_some())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
