//! Custom tracing layers and writers for SRCR hosts

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{Event, Level, Subscriber, span};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::config::JsonlConfig;
use crate::context::{NodeContextData, NodeContextGuard};

/// Event counts for one node, by level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub error: u64,
    pub warn: u64,
    pub info: u64,
    pub debug: u64,
    pub trace: u64,
}

impl EventCounts {
    fn record(&mut self, level: &Level) {
        let counter = match *level {
            Level::ERROR => &mut self.error,
            Level::WARN => &mut self.warn,
            Level::INFO => &mut self.info,
            Level::DEBUG => &mut self.debug,
            Level::TRACE => &mut self.trace,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u64 {
        self.error + self.warn + self.info + self.debug + self.trace
    }
}

/// Shared per-node event counters, filled by [`NodeContextLayer`]
///
/// Events emitted outside any node context are counted under `"-"`.
#[derive(Debug, Clone, Default)]
pub struct EventCounter {
    counts: Arc<Mutex<BTreeMap<String, EventCounts>>>,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts for one node id
    pub fn get(&self, node_id: &str) -> EventCounts {
        self.counts.lock().get(node_id).copied().unwrap_or_default()
    }

    /// Counts of every node seen so far
    pub fn snapshot(&self) -> BTreeMap<String, EventCounts> {
        self.counts.lock().clone()
    }

    pub fn reset(&self) {
        self.counts.lock().clear();
    }

    fn record(&self, node_id: Option<String>, level: &Level) {
        let key = node_id.unwrap_or_else(|| "-".to_string());
        self.counts.lock().entry(key).or_default().record(level);
    }
}

/// Layer that attaches node context to spans and counts events per node
///
/// Spans created while a [`NodeContextGuard`] is active carry a
/// [`NodeContextExtension`].
#[derive(Debug, Clone, Default)]
pub struct NodeContextLayer {
    counter: Option<EventCounter>,
}

impl NodeContextLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also count every event into `counter`
    pub fn with_counter(counter: EventCounter) -> Self {
        Self {
            counter: Some(counter),
        }
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(node_ctx) = NodeContextGuard::current()
        {
            span.extensions_mut()
                .insert(NodeContextExtension { data: node_ctx });
        }
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if let Some(counter) = &self.counter {
            counter.record(NodeContextGuard::current_node_id(), event.metadata().level());
        }
    }
}

/// Create a JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(config.include_current_span)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
        .boxed()
}

/// In-memory log sink, mostly for tests and simulation reports
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    /// Written lines that parse as JSON objects
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
