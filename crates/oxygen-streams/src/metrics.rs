//! Client-side metrics, pulled by the server.
//!
//! The server opens the conversation: every frame on the
//! `METRIC_SVR/METRIC_COLLECTION` stream is a collection request, and the
//! client answers it with one `REPORT_METRIC` request per registered
//! metric. Each report is
//!
//! ```text
//! name: string, kind: string ("pos" | "counter" | "gauge"), labels: string,
//! value: f64          (counter, gauge)
//! x: f64, y: f64, z: f64   (pos)
//! ```
//!
//! Three counters are always present and refreshed just before each
//! report: the number of collections so far, and the connection's byte
//! counters.

use std::sync::{Arc, Mutex};

use oxygen_protocol::{Message, Reply};
use oxygen_transport::{
    Context, Registry, StreamError, StreamHandler, Subscriber, SubscriberId, TransportError,
};

use crate::lock;

pub const METRIC_NODE: &str = "METRIC_SVR";

const METRIC_COLLECTION: &str = "METRIC_COLLECTION";
const REPORT_METRIC: &str = "REPORT_METRIC";

const COLLECTIONS_COUNTER: &str = "oxygen_client_num_metric_collections_counter";
const BYTES_RECEIVED_COUNTER: &str = "oxygen_client_bytes_received_total";
const BYTES_SENT_COUNTER: &str = "oxygen_client_bytes_sent_total";

/// Metric kinds, in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetricKind {
    Pos,
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pos => "pos",
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

#[derive(Debug)]
struct Metric {
    name: String,
    kind: MetricKind,
    labels: String,
    /// Scalars use the first slot.
    value: [f64; 3],
}

impl Metric {
    fn write(&self, msg: &mut Message) {
        msg.write_string(&self.name)
            .write_string(self.kind.as_str())
            .write_string(&self.labels);
        let values = match self.kind {
            MetricKind::Pos => &self.value[..],
            MetricKind::Counter | MetricKind::Gauge => &self.value[..1],
        };
        for v in values {
            msg.write_f64(*v);
        }
    }
}

type SharedMetric = Arc<Mutex<Metric>>;

fn set_labels(metric: &SharedMetric, labels: impl Into<String>) {
    lock(metric).labels = labels.into();
}

/// A monotonically increasing value.
#[derive(Debug, Clone)]
pub struct Counter(SharedMetric);

impl Counter {
    pub fn increment(&self, by: f64) {
        lock(&self.0).value[0] += by;
    }

    pub fn set(&self, value: f64) {
        lock(&self.0).value[0] = value;
    }

    pub fn value(&self) -> f64 {
        lock(&self.0).value[0]
    }

    /// Replaces the label string sent with every report.
    pub fn set_labels(&self, labels: impl Into<String>) {
        set_labels(&self.0, labels);
    }
}

/// A value that goes up and down.
#[derive(Debug, Clone)]
pub struct Gauge(SharedMetric);

impl Gauge {
    pub fn set(&self, value: f64) {
        lock(&self.0).value[0] = value;
    }

    pub fn value(&self) -> f64 {
        lock(&self.0).value[0]
    }

    pub fn set_labels(&self, labels: impl Into<String>) {
        set_labels(&self.0, labels);
    }
}

/// A position in level space.
#[derive(Debug, Clone)]
pub struct PosMetric(SharedMetric);

impl PosMetric {
    pub fn set(&self, x: f64, y: f64, z: f64) {
        lock(&self.0).value = [x, y, z];
    }

    pub fn value(&self) -> [f64; 3] {
        lock(&self.0).value
    }

    pub fn set_labels(&self, labels: impl Into<String>) {
        set_labels(&self.0, labels);
    }
}

/// Handle to the metric collection stream and the metric set it reports.
#[derive(Debug, Clone)]
pub struct MetricsReporter {
    id: SubscriberId,
    metrics: Arc<Mutex<Vec<SharedMetric>>>,
}

impl MetricsReporter {
    /// Registers the built-in counters and opens the collection stream.
    pub fn open(registry: &mut Registry) -> Result<Self, TransportError> {
        let metrics = Arc::new(Mutex::new(Vec::new()));
        let collections = Counter(register(&metrics, COLLECTIONS_COUNTER, MetricKind::Counter));
        let bytes_received = Counter(register(&metrics, BYTES_RECEIVED_COUNTER, MetricKind::Counter));
        let bytes_sent = Counter(register(&metrics, BYTES_SENT_COUNTER, MetricKind::Counter));

        let handler = MetricsHandler {
            metrics: Arc::clone(&metrics),
            collections,
            bytes_received,
            bytes_sent,
        };
        let id = registry.add(Subscriber::with_handler(
            Message::new(METRIC_NODE, METRIC_COLLECTION),
            handler,
        ))?;
        tracing::info!(%id, "metrics reporter opened");
        Ok(Self { id, metrics })
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

    pub fn counter(&self, name: impl Into<String>) -> Counter {
        Counter(register(&self.metrics, name, MetricKind::Counter))
    }

    pub fn gauge(&self, name: impl Into<String>) -> Gauge {
        Gauge(register(&self.metrics, name, MetricKind::Gauge))
    }

    pub fn pos(&self, name: impl Into<String>) -> PosMetric {
        PosMetric(register(&self.metrics, name, MetricKind::Pos))
    }

    /// Number of registered metrics, built-ins included.
    pub fn len(&self) -> usize {
        lock(&self.metrics).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn register(
    metrics: &Mutex<Vec<SharedMetric>>,
    name: impl Into<String>,
    kind: MetricKind,
) -> SharedMetric {
    let metric = Arc::new(Mutex::new(Metric {
        name: name.into(),
        kind,
        labels: String::new(),
        value: [0.0; 3],
    }));
    lock(metrics).push(Arc::clone(&metric));
    metric
}

struct MetricsHandler {
    metrics: Arc<Mutex<Vec<SharedMetric>>>,
    collections: Counter,
    bytes_received: Counter,
    bytes_sent: Counter,
}

impl StreamHandler for MetricsHandler {
    fn on_message(&mut self, ctx: &mut Context<'_>, _msg: &mut Message) -> Result<(), StreamError> {
        self.collections.increment(1.0);
        let stats = ctx.registry().stats();
        self.bytes_received.set(stats.bytes_received() as f64);
        self.bytes_sent.set(stats.bytes_sent() as f64);

        let mut metrics = lock(&self.metrics).clone();
        metrics.sort_by_key(|m| lock(m).kind);

        for metric in &metrics {
            let mut request = Message::new(METRIC_NODE, REPORT_METRIC);
            let name = {
                let metric = lock(metric);
                metric.write(&mut request);
                metric.name.clone()
            };
            ctx.registry().add(Subscriber::once(request, move |_ctx, reply| {
                match Reply::read(reply) {
                    Ok(Reply::Ack) => {}
                    Ok(Reply::Nack(error)) => {
                        tracing::warn!(metric = %name, %error, "metric report rejected");
                    }
                    Err(error) => tracing::warn!(metric = %name, %error, "malformed metric reply"),
                }
            }))?;
        }
        tracing::debug!(metrics = metrics.len(), "metrics reported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_transport::testing::TestWire;

    fn collect(wire: &mut TestWire, reporter: &MetricsReporter) -> Vec<Message> {
        let mut msg = Message::new(METRIC_NODE, METRIC_COLLECTION);
        msg.set_id(reporter.id().into_inner());
        wire.deliver(msg);
        wire.sent()
    }

    fn report_header(msg: &mut Message) -> (String, String, String) {
        (
            msg.read_string().unwrap(),
            msg.read_string().unwrap(),
            msg.read_string().unwrap(),
        )
    }

    #[test]
    fn test_open_registers_builtin_counters() {
        let mut wire = TestWire::new();
        let reporter = MetricsReporter::open(wire.registry()).unwrap();

        assert_eq!(reporter.len(), 3);
        let sent = wire.sent();
        assert_eq!(sent[0].message_name(), METRIC_COLLECTION);
    }

    #[test]
    fn test_collection_reports_pos_then_counters_then_gauges() {
        let mut wire = TestWire::new();
        let reporter = MetricsReporter::open(wire.registry()).unwrap();
        wire.sent();
        let fps = reporter.gauge("fps");
        fps.set(59.5);
        let camera = reporter.pos("camera");
        camera.set(1.0, 2.0, 3.0);

        let mut reports = collect(&mut wire, &reporter);

        let kinds: Vec<(String, String)> = reports
            .iter_mut()
            .map(|m| {
                let (name, kind, _) = report_header(m);
                (name, kind)
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("camera".to_string(), "pos".to_string()),
                (COLLECTIONS_COUNTER.to_string(), "counter".to_string()),
                (BYTES_RECEIVED_COUNTER.to_string(), "counter".to_string()),
                (BYTES_SENT_COUNTER.to_string(), "counter".to_string()),
                ("fps".to_string(), "gauge".to_string()),
            ]
        );

        let pos = &mut reports[0];
        assert_eq!(
            [pos.read_f64().unwrap(), pos.read_f64().unwrap(), pos.read_f64().unwrap()],
            [1.0, 2.0, 3.0]
        );
        assert_eq!(reports[4].read_f64().unwrap(), 59.5);
        assert_eq!(reports[4].remaining(), 0);
    }

    #[test]
    fn test_collection_counter_counts_requests() {
        let mut wire = TestWire::new();
        let reporter = MetricsReporter::open(wire.registry()).unwrap();
        wire.sent();

        collect(&mut wire, &reporter);
        let mut second = collect(&mut wire, &reporter);

        let (name, _, _) = report_header(&mut second[0]);
        assert_eq!(name, COLLECTIONS_COUNTER);
        assert_eq!(second[0].read_f64().unwrap(), 2.0);
    }

    #[test]
    fn test_labels_are_sent_with_report() {
        let mut wire = TestWire::new();
        let reporter = MetricsReporter::open(wire.registry()).unwrap();
        wire.sent();
        let gauge = reporter.gauge("latency_ms");
        gauge.set_labels("region=eu");

        let mut reports = collect(&mut wire, &reporter);
        let (_, _, labels) = report_header(reports.last_mut().unwrap());
        assert_eq!(labels, "region=eu");
    }

    #[test]
    fn test_report_subscribers_remove_themselves_on_reply() {
        let mut wire = TestWire::new();
        let reporter = MetricsReporter::open(wire.registry()).unwrap();
        wire.sent();

        let reports = collect(&mut wire, &reporter);
        assert_eq!(wire.registry().len(), 1 + reports.len());

        for (i, report) in reports.iter().enumerate() {
            let mut reply = Message::new(METRIC_NODE, REPORT_METRIC);
            reply.set_id(report.id());
            if i == 0 {
                Reply::Nack(oxygen_protocol::ApplicationError::new(1, "unknown metric"))
                    .write(&mut reply);
            } else {
                Reply::Ack.write(&mut reply);
            }
            wire.deliver(reply);
        }

        assert_eq!(wire.registry().len(), 1);
        assert!(reporter.is_open(wire.registry()));
    }

    #[test]
    fn test_counter_increment_and_set() {
        let mut wire = TestWire::new();
        let reporter = MetricsReporter::open(wire.registry()).unwrap();
        let counter = reporter.counter("jumps");
        counter.increment(2.0);
        counter.increment(3.0);
        assert_eq!(counter.value(), 5.0);
        counter.set(1.0);
        assert_eq!(counter.value(), 1.0);
    }
}
