//! Server-side plugin scheduling.
//!
//! Scheduling a plugin opens a notification stream named after it and
//! then asks the server to run it:
//!
//! ```text
//! NOTIFICATION_STREAM(name)   stream: TASK_STARTED, TASK_COMPLETED, STREAM_ENDED
//! SCHEDULE_PLUGIN(name, 1)    one-shot: ACK, or NACK (stream torn down)
//! ```
//!
//! On TASK_COMPLETED the client asks the server to close the stream
//! (`CLOSE_NOTIFICATION_STREAM(name)`) and the server answers with
//! STREAM_ENDED, which unregisters it. A plugin counts as running from
//! the moment it is scheduled until its stream is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use oxygen_protocol::{Message, PluginOp, ProtocolError, Reply};
use oxygen_transport::{
    Context, Registry, StreamError, StreamHandler, Subscriber, SubscriberId, TransportError,
};

use crate::lock;

pub const PLUGIN_NODE: &str = "PLUGIN_SVR";

const NOTIFICATION_STREAM: &str = "NOTIFICATION_STREAM";
const SCHEDULE_PLUGIN: &str = "SCHEDULE_PLUGIN";
const CLOSE_NOTIFICATION_STREAM: &str = "CLOSE_NOTIFICATION_STREAM";

type Streams = Arc<Mutex<HashMap<String, SubscriberId>>>;
type CompletedHandler = Arc<Mutex<Option<Box<dyn FnMut(&str) + Send>>>>;

/// Schedules plugins and tracks the ones still running.
///
/// Cheap to clone; clones share the same set of running plugins.
#[derive(Clone, Default)]
pub struct PluginService {
    streams: Streams,
    completed: CompletedHandler,
}

impl PluginService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler fired when a plugin reports TASK_COMPLETED.
    ///
    /// The handler must not call back into this method.
    pub fn on_task_completed<F>(&self, handler: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        *lock(&self.completed) = Some(Box::new(handler));
    }

    /// Opens the notification stream for `name` and schedules it.
    ///
    /// Returns `Ok(false)` and sends nothing if `name` is already running.
    pub fn schedule_plugin(&self, registry: &mut Registry, name: &str) -> Result<bool, TransportError> {
        if self.is_running(name) {
            tracing::debug!(plugin = %name, "plugin already running");
            return Ok(false);
        }

        let mut request = Message::new(PLUGIN_NODE, NOTIFICATION_STREAM);
        request.write_string(name);
        let handler = NotificationHandler {
            name: name.to_string(),
            streams: Arc::clone(&self.streams),
            completed: Arc::clone(&self.completed),
        };
        let stream = registry.add(Subscriber::with_handler(request, handler))?;
        lock(&self.streams).insert(name.to_string(), stream);

        let mut schedule = Message::new(PLUGIN_NODE, SCHEDULE_PLUGIN);
        schedule.write_string(name).write_i32(1);
        let streams = Arc::clone(&self.streams);
        let plugin = name.to_string();
        let scheduled = registry.add(Subscriber::once(schedule, move |ctx, reply| {
            match Reply::read(reply) {
                Ok(Reply::Ack) => tracing::info!(%plugin, "plugin scheduled"),
                Ok(Reply::Nack(error)) => {
                    tracing::warn!(%plugin, %error, "plugin schedule rejected");
                    if let Some(stream) = lock(&streams).remove(&plugin) {
                        ctx.registry().remove(stream);
                    }
                }
                Err(error) => tracing::warn!(%plugin, %error, "malformed schedule reply"),
            }
        }));

        if let Err(e) = scheduled {
            lock(&self.streams).remove(name);
            registry.remove(stream);
            return Err(e);
        }
        Ok(true)
    }

    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.streams).contains_key(name)
    }

    /// Names of running plugins, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.streams).keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PluginService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginService")
            .field("running", &self.running())
            .finish()
    }
}

struct NotificationHandler {
    name: String,
    streams: Streams,
    completed: CompletedHandler,
}

impl NotificationHandler {
    fn request_close(&self, registry: &mut Registry) -> Result<(), TransportError> {
        let mut close = Message::new(PLUGIN_NODE, CLOSE_NOTIFICATION_STREAM);
        close.write_string(&self.name);
        let plugin = self.name.clone();
        registry.add(Subscriber::once(close, move |_ctx, reply| {
            if let Ok(Reply::Nack(error)) = Reply::read(reply) {
                tracing::warn!(%plugin, %error, "close notification stream rejected");
            }
        }))?;
        Ok(())
    }
}

impl StreamHandler for NotificationHandler {
    fn on_message(&mut self, ctx: &mut Context<'_>, msg: &mut Message) -> Result<(), StreamError> {
        let opcode = msg.read_i32()?;
        match PluginOp::from_i32(opcode) {
            Some(PluginOp::TaskStarted) => {
                tracing::info!(plugin = %self.name, "plugin task started");
            }
            Some(PluginOp::TaskCompleted) => {
                tracing::info!(plugin = %self.name, "plugin task completed");
                self.request_close(ctx.registry())?;
                if let Some(handler) = lock(&self.completed).as_mut() {
                    handler(&self.name);
                }
            }
            Some(PluginOp::StreamEnded) => {
                tracing::debug!(plugin = %self.name, "notification stream ended");
                lock(&self.streams).remove(&self.name);
                ctx.close();
            }
            None => {
                return Err(ProtocolError::UnexpectedOpcode {
                    context: "plugin notification",
                    opcode,
                }
                .into());
            }
        }
        Ok(())
    }

    fn on_error(&mut self, _ctx: &mut Context<'_>, _error: StreamError) {
        lock(&self.streams).remove(&self.name);
    }
}
