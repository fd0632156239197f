//! Publishing log records to the bus.
//!
//! A [`SinkRegistry`] is created once and its [`SinkLayer`] installed into the
//! tracing subscriber. Sinks are attached and removed at runtime through the
//! registry; each attach returns a [`SinkHandle`] owned by the caller, and
//! dropping the handle removes the sink.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber, debug};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// Capacity of the queue between a sink and its publishing task. Records are
/// dropped while the queue is full.
pub const DEFAULT_SINK_CAPACITY: usize = 1_024;

/// Events from the client library and from this module are never published,
/// publishing them would feed back into the sink.
fn is_ignored(target: &str) -> bool {
    target == module_path!() || target.starts_with("async_nats")
}

/// Receives rendered log records. Must not block.
pub trait LogPublisher: Send + Sync + 'static {
    fn publish(&self, record: Bytes);
}

/// A connection that log records can be published on.
pub trait SinkTarget {
    type Publisher: LogPublisher;

    /// A publisher for `subject`, and the task publishing on its behalf if
    /// publishing happens in the background.
    fn log_publisher(&self, subject: &str) -> (Self::Publisher, Option<JoinHandle<()>>);
}

#[derive(Default)]
struct Sinks {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Arc<dyn LogPublisher>)>>,
}

impl Sinks {
    fn remove(&self, id: u64) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(entry, _)| *entry != id);
    }
}

/// The set of active log sinks.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    inner: Arc<Sinks>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `publisher`. It receives every record until the returned
    /// handle is dropped.
    pub fn attach(&self, publisher: impl LogPublisher) -> SinkHandle {
        self.attach_with_task(publisher, None)
    }

    /// Register `publisher` together with the task draining its records, so
    /// that [`SinkHandle::close`] can wait for outstanding records.
    pub fn attach_with_task(
        &self,
        publisher: impl LogPublisher,
        task: Option<JoinHandle<()>>,
    ) -> SinkHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(publisher)));
        SinkHandle {
            id,
            sinks: Arc::downgrade(&self.inner),
            task,
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The tracing layer forwarding records to the attached sinks.
    pub fn layer(&self) -> SinkLayer {
        SinkLayer {
            registry: self.clone(),
        }
    }

    fn publish(&self, record: Bytes) {
        let entries = self
            .inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, publisher) in entries.iter() {
            publisher.publish(record.clone());
        }
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("sinks", &self.len())
            .finish()
    }
}

/// Keeps a sink registered. Dropping it (or calling [`SinkHandle::detach`])
/// removes the sink from its registry; [`SinkHandle::close`] also waits for
/// records already queued to be published.
#[derive(Debug)]
pub struct SinkHandle {
    id: u64,
    sinks: Weak<Sinks>,
    task: Option<JoinHandle<()>>,
}

impl SinkHandle {
    pub fn detach(self) {}

    /// Remove the sink and wait for its publishing task to finish.
    pub async fn close(mut self) {
        self.remove();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                debug!(?err, "log publishing task failed");
            }
        }
    }

    fn remove(&self) {
        if let Some(sinks) = self.sinks.upgrade() {
            sinks.remove(self.id);
        }
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Renders events as JSON and hands them to the registry's sinks.
///
/// Fields of the spans an event is in are published with it, outermost span
/// first, so the event's own fields and inner spans win on name clashes.
#[derive(Debug, Clone)]
pub struct SinkLayer {
    registry: SinkRegistry,
}

/// Fields recorded on a span so far, kept in the span's extensions.
struct SpanFields(Map<String, Value>);

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.0));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(SpanFields(fields)) = extensions.get_mut::<SpanFields>() {
            let mut visitor = JsonVisitor(std::mem::take(fields));
            values.record(&mut visitor);
            *fields = visitor.0;
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if is_ignored(target) || self.registry.is_empty() {
            return;
        }

        let mut fields = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(SpanFields(span_fields)) = span.extensions().get::<SpanFields>() {
                    fields.extend(span_fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        self.registry.publish(render(event, fields));
    }
}

/// `{"timestamp", "level", "target", "msg", ...fields}`
fn render(event: &Event<'_>, fields: Map<String, Value>) -> Bytes {
    let mut visitor = JsonVisitor(fields);
    event.record(&mut visitor);

    let mut record = visitor.0;
    let meta = event.metadata();
    record.insert(
        "timestamp".into(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    record.insert("level".into(), Value::String(meta.level().to_string()));
    record.insert("target".into(), Value::String(meta.target().to_owned()));

    Bytes::from(Value::Object(record).to_string())
}

#[derive(Default)]
struct JsonVisitor(Map<String, Value>);

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let key = match field.name() {
            "message" => "msg",
            name => name,
        };
        self.0.insert(key.to_owned(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, value.to_string().into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}").into());
    }
}

/// Queues records for a background task that publishes them. When the queue
/// is full, records are dropped rather than waited on.
#[derive(Debug, Clone)]
pub struct NatsLogPublisher {
    tx: mpsc::Sender<Bytes>,
}

impl NatsLogPublisher {
    /// Spawn a task publishing records on `subject`. It exits once every
    /// clone of the publisher has been dropped and the queue is drained.
    /// Must be called from within a tokio runtime
    pub fn spawn(
        client: async_nats::Client,
        subject: impl Into<String>,
    ) -> (Self, JoinHandle<()>) {
        let subject = subject.into();
        Self::spawn_with(DEFAULT_SINK_CAPACITY, move |record| {
            let client = client.clone();
            let subject = subject.clone();
            async move {
                if let Err(err) = client.publish(subject.clone(), record).await {
                    debug!(?err, subject, "failed to publish log record");
                }
            }
        })
    }

    /// Spawn a task calling `publish` for each queued record, in order.
    pub(crate) fn spawn_with<F, Fut>(capacity: usize, mut publish: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut(Bytes) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Bytes>(capacity);
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                publish(record).await;
            }
        });
        (Self { tx }, task)
    }
}

impl LogPublisher for NatsLogPublisher {
    fn publish(&self, record: Bytes) {
        let _ = self.tx.try_send(record);
    }
}

impl SinkTarget for async_nats::Client {
    type Publisher = NatsLogPublisher;

    fn log_publisher(&self, subject: &str) -> (NatsLogPublisher, Option<JoinHandle<()>>) {
        let (publisher, task) = NatsLogPublisher::spawn(self.clone(), subject);
        (publisher, Some(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing::{error, field, info, info_span};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<Bytes>>>);

    impl Collect {
        fn records(&self) -> Vec<Value> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|b| serde_json::from_slice(b).unwrap())
                .collect()
        }
    }

    impl LogPublisher for Collect {
        fn publish(&self, record: Bytes) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn with_registry<F: FnOnce()>(registry: &SinkRegistry, f: F) {
        let subscriber = tracing_subscriber::registry().with(registry.layer());
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_records_published_while_attached() {
        let registry = SinkRegistry::new();
        let sink = Collect::default();
        let handle = registry.attach(sink.clone());
        assert_eq!(registry.len(), 1);

        with_registry(&registry, || {
            info!(answer = 42, user = "ada", ok = true, "hello {}", "world");
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["msg"], "hello world");
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["answer"], 42);
        assert_eq!(record["user"], "ada");
        assert_eq!(record["ok"], true);
        assert!(record["target"].as_str().unwrap().starts_with("nats_connect"));
        assert!(record["timestamp"].is_string());

        handle.detach();
        assert!(registry.is_empty());
        with_registry(&registry, || error!("not published"));
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn test_drop_handle_removes_sink() {
        let registry = SinkRegistry::new();
        let first = Collect::default();
        let second = Collect::default();
        let first_handle = registry.attach(first.clone());
        let _second_handle = registry.attach(second.clone());

        drop(first_handle);
        assert_eq!(registry.len(), 1);

        with_registry(&registry, || info!("after drop"));
        assert!(first.records().is_empty());
        assert_eq!(second.records().len(), 1);
    }

    #[test]
    fn test_ignored_targets() {
        let registry = SinkRegistry::new();
        let sink = Collect::default();
        let _handle = registry.attach(sink.clone());

        with_registry(&registry, || {
            info!(target: "async_nats::connector", "connected");
            debug!(target: "nats_connect::sink", "inside sink module");
        });
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_handle_outlives_registry() {
        let registry = SinkRegistry::new();
        let handle = registry.attach(Collect::default());
        drop(registry);
        drop(handle);
    }

    #[test]
    fn test_span_fields_published_with_event() {
        let registry = SinkRegistry::new();
        let sink = Collect::default();
        let _handle = registry.attach(sink.clone());

        with_registry(&registry, || {
            let outer = info_span!("ctx", request_id = "abc-123", attempt = 1);
            let _outer = outer.enter();
            let inner = info_span!("inner", attempt = 2, servers = field::Empty);
            inner.record("servers", "nats://a:4222");
            let _inner = inner.enter();
            info!(attempt = 3, "inside context");
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["msg"], "inside context");
        assert_eq!(record["request_id"], "abc-123");
        assert_eq!(record["servers"], "nats://a:4222");
        assert_eq!(record["attempt"], 3);
    }

    #[test]
    fn test_explicit_parent_fields_published() {
        let registry = SinkRegistry::new();
        let sink = Collect::default();
        let _handle = registry.attach(sink.clone());

        with_registry(&registry, || {
            let span = info_span!("nats", logs_subject = "app.logs");
            error!(parent: &span, component = "error-logger", "consumer failed");
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["logs_subject"], "app.logs");
        assert_eq!(records[0]["component"], "error-logger");
    }

    fn collecting_publisher(
        capacity: usize,
    ) -> (NatsLogPublisher, JoinHandle<()>, Arc<Mutex<Vec<Bytes>>>) {
        let published = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&published);
        let (publisher, task) = NatsLogPublisher::spawn_with(capacity, move |record| {
            let out = Arc::clone(&out);
            async move { out.lock().unwrap().push(record) }
        });
        (publisher, task, published)
    }

    #[tokio::test]
    async fn test_publisher_forwards_in_order() {
        let (publisher, task, published) = collecting_publisher(8);
        for n in 0..5 {
            publisher.publish(Bytes::from(n.to_string()));
        }
        drop(publisher);

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("task exits once the publisher is dropped")
            .unwrap();
        assert_eq!(
            *published.lock().unwrap(),
            ["0", "1", "2", "3", "4"].map(Bytes::from)
        );
    }

    #[tokio::test]
    async fn test_publisher_drops_when_full() {
        // the current-thread runtime does not run the task until we await, so
        // nothing is drained while publishing
        let (publisher, task, published) = collecting_publisher(4);
        for n in 0..10 {
            publisher.publish(Bytes::from(n.to_string()));
        }
        drop(publisher);
        task.await.unwrap();

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 4);
        assert_eq!(published[0], Bytes::from("0"));
        assert_eq!(published[3], Bytes::from("3"));
    }

    #[tokio::test]
    async fn test_task_runs_until_last_clone_dropped() {
        let (publisher, task, published) = collecting_publisher(8);
        let clone = publisher.clone();
        drop(publisher);
        clone.publish(Bytes::from("late"));
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        drop(clone);
        task.await.unwrap();
        assert_eq!(published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_drains_queued_records() {
        let registry = SinkRegistry::new();
        let (publisher, task, published) = collecting_publisher(8);
        let handle = registry.attach_with_task(publisher, Some(task));

        with_registry(&registry, || {
            info!("first");
            info!("second");
        });
        // queued, not yet published
        assert!(published.lock().unwrap().is_empty());

        handle.close().await;
        assert!(registry.is_empty());
        let msgs = published
            .lock()
            .unwrap()
            .iter()
            .map(|b| serde_json::from_slice::<Value>(b).unwrap()["msg"].clone())
            .collect::<Vec<_>>();
        assert_eq!(msgs, ["first", "second"]);
    }
}
