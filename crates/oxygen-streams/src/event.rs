//! Level presence: who is connected and where their cursor is.
//!
//! The stream keeps the list of connected users up to date before any
//! hook runs, so a hook can always read the current list from the
//! [`EventStream`] handle.

use std::sync::{Arc, Mutex};

use oxygen_protocol::{EventOp, Message, ProtocolError};
use oxygen_transport::{
    Context, Registry, StreamError, StreamHandler, Subscriber, SubscriberId, TransportError,
};

use crate::lock;
use crate::object::LEVEL_NODE;

const EVENT_STREAM: &str = "EVENT_STREAM";

/// A user connected to the level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    /// Object under the user's cursor, `-1` when none.
    pub object_id: i32,
    pub sub_id: i32,
}

impl User {
    fn new(id: i64, name: String) -> Self {
        Self {
            id,
            name,
            object_id: -1,
            sub_id: 0,
        }
    }
}

/// Observer hooks for the event stream. All default to doing nothing.
pub trait LevelEvents: Send {
    fn on_user_connected(&mut self, _user: &User) {}

    fn on_user_disconnected(&mut self, _id: i64, _name: &str) {}

    /// Fires for every cursor move, including moves of users the client
    /// never saw connect.
    fn on_user_cursor_moved(&mut self, _id: i64, _object_id: i32, _sub_id: i32) {}

    fn on_stream_closed(&mut self) {}
}

impl LevelEvents for () {}

/// Handle to an open event stream.
#[derive(Debug, Clone)]
pub struct EventStream {
    id: SubscriberId,
    users: Arc<Mutex<Vec<User>>>,
}

impl EventStream {
    /// Opens `LEVEL_SVR/EVENT_STREAM`.
    pub fn open<E>(registry: &mut Registry, events: E) -> Result<Self, TransportError>
    where
        E: LevelEvents + 'static,
    {
        let users = Arc::new(Mutex::new(Vec::new()));
        let handler = EventHandler {
            users: Arc::clone(&users),
            events,
        };
        let id = registry.add(Subscriber::with_handler(
            Message::new(LEVEL_NODE, EVENT_STREAM),
            handler,
        ))?;
        tracing::info!(%id, "event stream opened");
        Ok(Self { id, users })
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_open(&self, registry: &Registry) -> bool {
        registry.contains(self.id)
    }

    pub fn close(&self, registry: &mut Registry) -> bool {
        registry.remove(self.id)
    }

    /// Connected users in the order they joined.
    pub fn users(&self) -> Vec<User> {
        lock(&self.users).clone()
    }

    pub fn user(&self, id: i64) -> Option<User> {
        lock(&self.users).iter().find(|u| u.id == id).cloned()
    }
}

struct EventHandler<E> {
    users: Arc<Mutex<Vec<User>>>,
    events: E,
}

impl<E: LevelEvents> StreamHandler for EventHandler<E> {
    fn on_message(&mut self, ctx: &mut Context<'_>, msg: &mut Message) -> Result<(), StreamError> {
        let opcode = msg.read_i32()?;
        match EventOp::from_i32(opcode) {
            Some(EventOp::UserConnected) => {
                let user = User::new(msg.read_i64()?, msg.read_string()?);
                tracing::debug!(user = user.id, name = %user.name, "user connected");
                lock(&self.users).push(user.clone());
                self.events.on_user_connected(&user);
            }
            Some(EventOp::UserDisconnected) => {
                let id = msg.read_i64()?;
                let name = msg.read_string()?;
                tracing::debug!(user = id, %name, "user disconnected");
                lock(&self.users).retain(|u| u.id != id);
                self.events.on_user_disconnected(id, &name);
            }
            Some(EventOp::UserCursorMoved) => {
                let id = msg.read_i64()?;
                let object_id = msg.read_i32()?;
                let sub_id = msg.read_i32()?;
                if let Some(user) = lock(&self.users).iter_mut().find(|u| u.id == id) {
                    user.object_id = object_id;
                    user.sub_id = sub_id;
                }
                self.events.on_user_cursor_moved(id, object_id, sub_id);
            }
            Some(EventOp::End) => {
                tracing::info!(id = %ctx.id(), "event stream ended");
                lock(&self.users).clear();
                self.events.on_stream_closed();
                ctx.close();
            }
            None => {
                return Err(ProtocolError::UnexpectedOpcode {
                    context: "event stream",
                    opcode,
                }
                .into());
            }
        }
        Ok(())
    }
}
