//! Level object replication.
//!
//! The server pushes the state of every level object on one long-lived
//! stream. A NEW frame carries the full object record; later changes
//! arrive as UPDATE frames holding only a delta against the record the
//! client last saw. The client therefore keeps one snapshot per object
//! id, and applying an update means:
//!
//! ```text
//! snapshot[id] ──decode(delta)──► new record ──► snapshot[id], hook
//! ```
//!
//! A snapshot is the whole body of the NEW frame that introduced the
//! object, and the server diffs its updates against the same bytes:
//!
//! ```text
//! node, message, opcode=NEW, id, pos×3, scale×3, rot×3, hasCustomData, custom
//! ```
//!
//! A decoded update is therefore itself a NEW frame body, and is re-parsed
//! as a message to read the header.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use oxygen_protocol::{Message, ObjectOp, ProtocolError};
use oxygen_transport::{
    Context, Registry, StreamError, StreamHandler, Subscriber, SubscriberId, TransportError,
};

use crate::lock;

/// Node serving level state (objects and user events).
pub const LEVEL_NODE: &str = "LEVEL_SVR";

const OBJECT_STREAM: &str = "OBJECT_STREAM";
const ADD_OBJECT: &str = "ADD_OBJECT";
const UPDATE_OBJECT: &str = "UPDATE_OBJECT";

type Snapshots = Arc<Mutex<HashMap<i32, Vec<u8>>>>;

// ---------------------------------------------------------------------------
// ObjectRecord
// ---------------------------------------------------------------------------

/// The fixed header of a replicated object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObjectRecord {
    pub id: i32,
    pub pos: [f64; 3],
    pub scale: [f64; 3],
    pub rot: [f64; 3],
    /// Whether a consumer-defined payload follows the header.
    pub has_custom_data: bool,
}

impl ObjectRecord {
    /// Reads the header, leaving the cursor on the custom payload.
    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        let id = msg.read_i32()?;
        let pos = read_vec3(msg)?;
        let scale = read_vec3(msg)?;
        let rot = read_vec3(msg)?;
        let has_custom_data = msg.read_i32()? != 0;
        Ok(Self {
            id,
            pos,
            scale,
            rot,
            has_custom_data,
        })
    }

    /// The object as a NEW frame body on the object stream, `custom`
    /// appended. Snapshots and deltas are taken over these bytes.
    pub fn to_body(&self, custom: &[u8]) -> Vec<u8> {
        let mut msg = Message::new(LEVEL_NODE, OBJECT_STREAM);
        msg.write_i32(ObjectOp::New as i32).write_i32(self.id);
        self.write_transform(&mut msg);
        msg.write_raw(custom);
        msg.body().to_vec()
    }

    /// Transform and custom-data flag, without the id.
    fn write_transform(&self, msg: &mut Message) {
        for v in self.pos.iter().chain(&self.scale).chain(&self.rot) {
            msg.write_f64(*v);
        }
        msg.write_i32(i32::from(self.has_custom_data));
    }
}

fn read_vec3(msg: &mut Message) -> Result<[f64; 3], ProtocolError> {
    Ok([msg.read_f64()?, msg.read_f64()?, msg.read_f64()?])
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Observer hooks for an object stream. All default to doing nothing.
///
/// Hooks run after the snapshot table has been updated.
pub trait ObjectEvents: Send {
    /// A new object. `msg` is positioned on the custom payload.
    fn on_new_object(&mut self, _object: &ObjectRecord, _msg: &mut Message) {}

    /// An object changed. `msg` is the reconstructed NEW frame,
    /// positioned on the custom payload.
    fn on_update_object(&mut self, _object: &ObjectRecord, _msg: &mut Message) {}

    fn on_delete_object(&mut self, _id: i32) {}

    /// The server ended the stream.
    fn on_stream_closed(&mut self) {}

    /// The stream was terminated by an error.
    fn on_error(&mut self, _error: &StreamError) {}
}

impl ObjectEvents for () {}

// ---------------------------------------------------------------------------
// ObjectStream
// ---------------------------------------------------------------------------

/// Handle to an open object stream.
#[derive(Debug, Clone)]
pub struct ObjectStream {
    id: SubscriberId,
    snapshots: Snapshots,
}

impl ObjectStream {
    /// Opens `LEVEL_SVR/OBJECT_STREAM` and starts tracking snapshots.
    pub fn open<E>(registry: &mut Registry, events: E) -> Result<Self, TransportError>
    where
        E: ObjectEvents + 'static,
    {
        let snapshots = Snapshots::default();
        let handler = ObjectHandler {
            snapshots: Arc::clone(&snapshots),
            events,
        };
        let id = registry.add(Subscriber::with_handler(
            Message::new(LEVEL_NODE, OBJECT_STREAM),
            handler,
        ))?;
        tracing::info!(%id, "object stream opened");
        Ok(Self { id, snapshots })
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_open(&self, registry: &Registry) -> bool {
        registry.contains(self.id)
    }

    /// Stops listening. Snapshots are kept for inspection.
    pub fn close(&self, registry: &mut Registry) -> bool {
        registry.remove(self.id)
    }

    /// The last NEW frame body seen (or reconstructed) for object `id`.
    pub fn snapshot(&self, id: i32) -> Option<Vec<u8>> {
        lock(&self.snapshots).get(&id).cloned()
    }

    /// Ids of every known object, ascending.
    pub fn object_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = lock(&self.snapshots).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        lock(&self.snapshots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds an `ADD_OBJECT` request. The server assigns the id, so the
    /// record's `id` field is not sent.
    pub fn build_add_message(object: &ObjectRecord, custom: &[u8]) -> Message {
        let mut msg = Message::new(LEVEL_NODE, ADD_OBJECT);
        object.write_transform(&mut msg);
        msg.write_raw(custom);
        msg
    }

    /// Builds an `UPDATE_OBJECT` request carrying the delta from the
    /// current snapshot of `object.id` to `object` with `custom`.
    ///
    /// The snapshot itself is left alone; it changes when the server
    /// echoes the update back on the stream.
    ///
    /// # Errors
    ///
    /// `MissingSnapshot` if the stream has never seen the object.
    pub fn build_update_message(
        &self,
        object: &ObjectRecord,
        custom: &[u8],
    ) -> Result<Message, StreamError> {
        let id = object.id;
        let body = object.to_body(custom);
        let delta = {
            let snapshots = lock(&self.snapshots);
            let snapshot = snapshots.get(&id).ok_or(StreamError::MissingSnapshot(id))?;
            oxygen_delta::encode(snapshot, &body)
        };
        tracing::trace!(object = id, body = body.len(), delta = delta.len(), "update encoded");

        let mut msg = Message::new(LEVEL_NODE, UPDATE_OBJECT);
        msg.write_i32(id).write_bytes(&delta);
        Ok(msg)
    }
}

struct ObjectHandler<E> {
    snapshots: Snapshots,
    events: E,
}

impl<E: ObjectEvents> ObjectHandler<E> {
    fn on_new(&mut self, msg: &mut Message) -> Result<(), StreamError> {
        let body = msg.body().to_vec();
        let object = ObjectRecord::read(msg)?;
        lock(&self.snapshots).insert(object.id, body);
        tracing::debug!(object = object.id, "object created");
        self.events.on_new_object(&object, msg);
        Ok(())
    }

    fn on_update(&mut self, msg: &mut Message) -> Result<(), StreamError> {
        let id = msg.read_i32()?;
        let delta = msg.read_bytes()?;

        let body = {
            let mut snapshots = lock(&self.snapshots);
            let snapshot = snapshots.get_mut(&id).ok_or(StreamError::MissingSnapshot(id))?;
            let body = oxygen_delta::decode(snapshot, &delta)?;
            snapshot.clone_from(&body);
            body
        };

        let mut reconstructed = Message::from_body(msg.id(), &body)?;
        // Opcode of the embedded NEW frame.
        reconstructed.read_i32()?;
        let object = ObjectRecord::read(&mut reconstructed)?;
        tracing::debug!(object = id, delta = delta.len(), "object updated");
        self.events.on_update_object(&object, &mut reconstructed);
        Ok(())
    }
}

impl<E: ObjectEvents> StreamHandler for ObjectHandler<E> {
    fn on_message(&mut self, ctx: &mut Context<'_>, msg: &mut Message) -> Result<(), StreamError> {
        let opcode = msg.read_i32()?;
        match ObjectOp::from_i32(opcode) {
            Some(ObjectOp::New) => self.on_new(msg)?,
            Some(ObjectOp::Update) => self.on_update(msg)?,
            Some(ObjectOp::Delete) => {
                let id = msg.read_i32()?;
                if lock(&self.snapshots).remove(&id).is_none() {
                    tracing::debug!(object = id, "delete for unknown object");
                }
                self.events.on_delete_object(id);
            }
            Some(ObjectOp::End) => {
                lock(&self.snapshots).clear();
                tracing::info!(id = %ctx.id(), "object stream ended");
                self.events.on_stream_closed();
                ctx.close();
            }
            None => {
                return Err(ProtocolError::UnexpectedOpcode {
                    context: "object stream",
                    opcode,
                }
                .into());
            }
        }
        Ok(())
    }

    fn on_error(&mut self, _ctx: &mut Context<'_>, error: StreamError) {
        self.events.on_error(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_transport::testing::TestWire;

    #[derive(Default, Clone)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl ObjectEvents for Recorder {
        fn on_new_object(&mut self, object: &ObjectRecord, msg: &mut Message) {
            self.log.lock().unwrap().push(format!(
                "new {} pos={:?} custom={:?}",
                object.id,
                object.pos,
                msg.remaining_bytes()
            ));
        }

        fn on_update_object(&mut self, object: &ObjectRecord, _msg: &mut Message) {
            self.log
                .lock()
                .unwrap()
                .push(format!("update {} pos={:?}", object.id, object.pos));
        }

        fn on_delete_object(&mut self, id: i32) {
            self.log.lock().unwrap().push(format!("delete {id}"));
        }

        fn on_stream_closed(&mut self) {
            self.log.lock().unwrap().push("closed".into());
        }

        fn on_error(&mut self, error: &StreamError) {
            self.log.lock().unwrap().push(format!("error {error}"));
        }
    }

    fn record(id: i32, pos: [f64; 3]) -> ObjectRecord {
        ObjectRecord {
            id,
            pos,
            scale: [1.0, 1.0, 1.0],
            rot: [0.0, 0.0, 0.0],
            has_custom_data: false,
        }
    }

    /// The NEW frame the server sends for `object`.
    fn new_frame(stream: &ObjectStream, object: &ObjectRecord, custom: &[u8]) -> Message {
        Message::from_body(stream.id().into_inner(), &object.to_body(custom)).unwrap()
    }

    fn frame(stream: &ObjectStream, op: ObjectOp, payload: &[u8]) -> Message {
        let mut msg = Message::new(LEVEL_NODE, OBJECT_STREAM);
        msg.set_id(stream.id().into_inner());
        msg.write_i32(op as i32).write_raw(payload);
        msg
    }

    fn update_frame(stream: &ObjectStream, id: i32, delta: &[u8]) -> Message {
        let mut msg = Message::new(LEVEL_NODE, OBJECT_STREAM);
        msg.set_id(stream.id().into_inner());
        msg.write_i32(ObjectOp::Update as i32)
            .write_i32(id)
            .write_bytes(delta);
        msg
    }

    fn open() -> (TestWire, ObjectStream, Recorder) {
        let mut wire = TestWire::new();
        let recorder = Recorder::default();
        let stream = ObjectStream::open(wire.registry(), recorder.clone()).unwrap();
        (wire, stream, recorder)
    }

    // =======================================================================
    // Opening
    // =======================================================================

    #[test]
    fn test_open_sends_stream_request() {
        let (mut wire, stream, _) = open();

        let sent = wire.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].node_name(), LEVEL_NODE);
        assert_eq!(sent[0].message_name(), OBJECT_STREAM);
        assert_eq!(sent[0].id(), stream.id().into_inner());
        assert!(stream.is_open(wire.registry()));
    }

    // =======================================================================
    // NEW / UPDATE / DELETE / END
    // =======================================================================

    #[test]
    fn test_new_object_stores_frame_body_as_snapshot() {
        let (mut wire, stream, recorder) = open();
        let mut object = record(1, [1.0, 2.0, 3.0]);
        object.has_custom_data = true;
        let msg = new_frame(&stream, &object, &[9, 9]);
        let body = msg.body().to_vec();

        assert_eq!(wire.deliver(msg), 1);

        assert_eq!(stream.snapshot(1), Some(body));
        assert_eq!(
            recorder.entries(),
            vec!["new 1 pos=[1.0, 2.0, 3.0] custom=[9, 9]".to_string()]
        );
    }

    #[test]
    fn test_update_applies_delta_and_replaces_snapshot() {
        let (mut wire, stream, recorder) = open();
        let first = new_frame(&stream, &record(1, [1.0, 2.0, 3.0]), &[]);
        let old = first.body().to_vec();
        wire.deliver(first);

        // The server diffs whole NEW frame bodies.
        let new = record(1, [4.0, 2.0, 3.0]).to_body(&[]);
        assert_eq!(new.len(), old.len());
        let delta = oxygen_delta::encode(&old, &new);
        wire.deliver(update_frame(&stream, 1, &delta));

        assert_eq!(stream.snapshot(1), Some(new));
        assert_eq!(
            recorder.entries().last().map(String::as_str),
            Some("update 1 pos=[4.0, 2.0, 3.0]")
        );
        assert!(stream.is_open(wire.registry()));
    }

    #[test]
    fn test_update_with_custom_payload_reaches_hook() {
        let (mut wire, stream, recorder) = open();
        let mut object = record(4, [0.0; 3]);
        object.has_custom_data = true;
        let old = object.to_body(&[1, 1, 1]);
        wire.deliver(new_frame(&stream, &object, &[1, 1, 1]));

        object.rot = [0.0, 90.0, 0.0];
        let new = object.to_body(&[1, 2, 1]);
        wire.deliver(update_frame(&stream, 4, &oxygen_delta::encode(&old, &new)));

        assert_eq!(stream.snapshot(4), Some(new));
        assert_eq!(
            recorder.entries().last().map(String::as_str),
            Some("update 4 pos=[0.0, 0.0, 0.0]")
        );
    }

    #[test]
    fn test_update_unknown_id_terminates_stream() {
        let (mut wire, stream, recorder) = open();

        wire.deliver(update_frame(&stream, 42, &[]));

        assert!(!stream.is_open(wire.registry()));
        assert_eq!(
            recorder.entries(),
            vec!["error no snapshot for object 42".to_string()]
        );
    }

    #[test]
    fn test_delete_removes_snapshot() {
        let (mut wire, stream, recorder) = open();
        wire.deliver(new_frame(&stream, &record(5, [0.0; 3]), &[]));
        wire.deliver(frame(&stream, ObjectOp::Delete, &5i32.to_le_bytes()));

        assert!(stream.is_empty());
        assert_eq!(recorder.entries().last().map(String::as_str), Some("delete 5"));
    }

    #[test]
    fn test_end_clears_snapshots_and_unregisters() {
        let (mut wire, stream, recorder) = open();
        wire.deliver(new_frame(&stream, &record(1, [0.0; 3]), &[]));
        wire.deliver(new_frame(&stream, &record(2, [0.0; 3]), &[]));
        assert_eq!(stream.object_ids(), vec![1, 2]);

        wire.deliver(frame(&stream, ObjectOp::End, &[]));

        assert!(stream.is_empty());
        assert!(!stream.is_open(wire.registry()));
        assert_eq!(recorder.entries().last().map(String::as_str), Some("closed"));
    }

    #[test]
    fn test_unknown_opcode_terminates_stream() {
        let mut wire = TestWire::new();
        let stream = ObjectStream::open(wire.registry(), ()).unwrap();

        let mut msg = Message::new(LEVEL_NODE, OBJECT_STREAM);
        msg.set_id(stream.id().into_inner());
        msg.write_i32(7);
        wire.deliver(msg);

        assert!(!stream.is_open(wire.registry()));
    }

    // =======================================================================
    // Builders
    // =======================================================================

    #[test]
    fn test_build_add_message_writes_transform_and_payload() {
        let mut object = record(99, [1.0, 2.0, 3.0]);
        object.has_custom_data = true;
        let mut msg = ObjectStream::build_add_message(&object, &[7, 8]);

        assert_eq!(msg.message_name(), ADD_OBJECT);
        assert_eq!(read_vec3(&mut msg).unwrap(), [1.0, 2.0, 3.0]);
        assert_eq!(read_vec3(&mut msg).unwrap(), [1.0, 1.0, 1.0]);
        assert_eq!(read_vec3(&mut msg).unwrap(), [0.0, 0.0, 0.0]);
        assert_eq!(msg.read_i32().unwrap(), 1);
        assert_eq!(msg.remaining_bytes(), &[7, 8]);
    }

    #[test]
    fn test_build_update_message_echoed_by_server_reconstructs_record() {
        let (mut wire, stream, _) = open();
        let old = record(3, [0.0; 3]).to_body(&[1, 2, 3, 4]);
        wire.deliver(new_frame(&stream, &record(3, [0.0; 3]), &[1, 2, 3, 4]));

        let edited = record(3, [0.5, 0.0, 0.0]);
        let new = edited.to_body(&[1, 2, 3, 5]);
        let mut request = stream.build_update_message(&edited, &[1, 2, 3, 5]).unwrap();
        assert_eq!(request.message_name(), UPDATE_OBJECT);
        // Building alone leaves the snapshot untouched.
        assert_eq!(stream.snapshot(3), Some(old));

        let id = request.read_i32().unwrap();
        let delta = request.read_bytes().unwrap();
        wire.deliver(update_frame(&stream, id, &delta));

        assert_eq!(stream.snapshot(3), Some(new));
    }

    #[test]
    fn test_build_update_message_without_snapshot_fails() {
        let (_wire, stream, _) = open();
        let err = stream.build_update_message(&record(8, [0.0; 3]), &[]).unwrap_err();
        assert!(matches!(err, StreamError::MissingSnapshot(8)));
    }

    #[test]
    fn test_record_to_body_parses_as_new_frame() {
        let object = record(12, [1.5, -2.0, 0.25]);
        let mut msg = Message::from_body(0, &object.to_body(&[])).unwrap();
        assert_eq!(msg.node_name(), LEVEL_NODE);
        assert_eq!(msg.message_name(), OBJECT_STREAM);
        assert_eq!(msg.read_i32().unwrap(), ObjectOp::New as i32);
        assert_eq!(ObjectRecord::read(&mut msg).unwrap(), object);
        assert_eq!(msg.remaining(), 0);
    }
}
