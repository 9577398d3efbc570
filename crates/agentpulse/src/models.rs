//! Telemetry data types.
//!
//! `Trace` and `Span` are the wire records the collector ingests. Both carry
//! float unix-second timestamps and snake_case keys to match the collector's
//! schema. `TraceHandle` and `SpanHandle` wrap the records for shared mutation
//! while a trace is live; once a record is ended it is immutable.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as float unix seconds (the collector stores REAL columns).
pub(crate) fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// What kind of work a span records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Llm,
    Tool,
    Custom,
}

/// Lifecycle status of a trace. The transition is one-way:
/// `Running` -> `Success` | `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Running,
    Success,
    Error,
}

/// One unit of work within a trace: a tool call, an LLM call, or an
/// arbitrary named block.
///
/// An empty `trace_id` marks an orphan span (created with no active trace);
/// `parent_span_id` is `None` for spans created at the top of a trace. The
/// two are distinct states and must not be conflated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique span identifier (dashless UUIDv4).
    pub id: String,
    /// Identifier of the owning trace; empty for orphan spans.
    pub trace_id: String,
    /// Identifier of the enclosing span, if any.
    pub parent_span_id: Option<String>,
    /// Human-readable name, e.g. the tool or function name.
    pub name: String,
    /// What kind of work this span records.
    pub kind: SpanKind,
    /// Start time as float unix seconds.
    pub started_at: f64,
    /// End time as float unix seconds; `None` while the span is open.
    pub ended_at: Option<f64>,
    /// Arbitrary JSON describing the call's input.
    pub input: Option<serde_json::Value>,
    /// Arbitrary JSON describing the call's output.
    pub output: Option<serde_json::Value>,
    /// Model identifier for LLM spans, e.g. `gpt-4o-mini`.
    pub model: Option<String>,
    /// Input tokens consumed by an LLM call.
    pub tokens_in: Option<u64>,
    /// Output tokens produced by an LLM call.
    pub tokens_out: Option<u64>,
    /// Estimated cost of the call in US dollars.
    pub cost_usd: Option<f64>,
    /// Error message, if the wrapped call failed.
    pub error: Option<String>,
}

impl Span {
    /// Create a new span. `started_at` is set now; everything else is unset.
    pub fn new(name: impl Into<String>, kind: SpanKind, trace_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            trace_id: trace_id.into(),
            parent_span_id: None,
            name: name.into(),
            kind,
            started_at: unix_now(),
            ended_at: None,
            input: None,
            output: None,
            model: None,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
            error: None,
        }
    }

    /// Whether this span was created with no active trace.
    pub fn is_orphan(&self) -> bool {
        self.trace_id.is_empty()
    }

    /// Whether the span has been ended.
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// End the span, optionally attaching an error. Ending is one-shot: a
    /// second call is a no-op and the record is immutable afterwards.
    pub fn end(&mut self, error: Option<String>) {
        if self.ended_at.is_some() {
            return;
        }
        self.ended_at = Some(unix_now());
        if let Some(message) = error {
            self.error = Some(message);
        }
    }
}

/// Shared-mutation wrapper around a [`Span`].
///
/// Handles are held both by the owning trace and by the instrumented call
/// stack; setters are no-ops once the span has ended.
#[derive(Debug, Clone)]
pub struct SpanHandle(Arc<Mutex<Span>>);

impl SpanHandle {
    pub fn new(span: Span) -> Self {
        Self(Arc::new(Mutex::new(span)))
    }

    pub fn id(&self) -> String {
        self.0.lock().unwrap().id.clone()
    }

    pub fn trace_id(&self) -> String {
        self.0.lock().unwrap().trace_id.clone()
    }

    pub fn is_orphan(&self) -> bool {
        self.0.lock().unwrap().is_orphan()
    }

    pub fn is_ended(&self) -> bool {
        self.0.lock().unwrap().is_ended()
    }

    /// Attach input data. Values that fail to serialize are dropped.
    pub fn set_input(&self, input: impl Serialize) {
        let mut span = self.0.lock().unwrap();
        if span.ended_at.is_none() {
            span.input = serde_json::to_value(input).ok();
        }
    }

    /// Attach output data. Values that fail to serialize are dropped.
    pub fn set_output(&self, output: impl Serialize) {
        let mut span = self.0.lock().unwrap();
        if span.ended_at.is_none() {
            span.output = serde_json::to_value(output).ok();
        }
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let mut span = self.0.lock().unwrap();
        if span.ended_at.is_none() {
            span.model = Some(model.into());
        }
    }

    pub fn set_tokens(&self, tokens_in: u64, tokens_out: u64) {
        let mut span = self.0.lock().unwrap();
        if span.ended_at.is_none() {
            span.tokens_in = Some(tokens_in);
            span.tokens_out = Some(tokens_out);
        }
    }

    pub fn set_cost(&self, cost_usd: f64) {
        let mut span = self.0.lock().unwrap();
        if span.ended_at.is_none() {
            span.cost_usd = Some(cost_usd);
        }
    }

    /// End the span successfully.
    pub fn end(&self) {
        self.0.lock().unwrap().end(None);
    }

    /// End the span with an error message.
    pub fn end_with_error(&self, message: impl Into<String>) {
        self.0.lock().unwrap().end(Some(message.into()));
    }

    /// Copy of the current record, for delivery or inspection.
    pub fn snapshot(&self) -> Span {
        self.0.lock().unwrap().clone()
    }

    /// Whether two handles refer to the same span.
    pub fn same_span(&self, other: &SpanHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One top-level recorded execution of an agent.
///
/// Owns its spans in creation order. The `total_*` aggregates are zero until
/// [`Trace::end`] runs; spans may be appended right up to that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace identifier (dashless UUIDv4).
    pub id: String,
    /// Name of the agent that produced this trace.
    pub agent_name: Option<String>,
    /// Lifecycle status; `Running` until the trace is ended.
    pub status: TraceStatus,
    /// Start time as float unix seconds.
    pub started_at: f64,
    /// End time as float unix seconds; `None` while the trace is open.
    pub ended_at: Option<f64>,
    /// Input tokens summed over all spans, computed at end.
    pub total_tokens_in: u64,
    /// Output tokens summed over all spans, computed at end.
    pub total_tokens_out: u64,
    /// Cost in US dollars summed over all spans, computed at end.
    pub total_cost_usd: f64,
    /// Caller-supplied JSON attached to the whole run.
    pub metadata: Option<serde_json::Value>,
    /// Error message, if the run failed.
    pub error: Option<String>,

    /// Owned spans, in creation order. Not part of the trace wire record;
    /// spans are delivered as their own batch.
    #[serde(skip)]
    pub spans: Vec<SpanHandle>,
}

impl Trace {
    pub fn new(agent_name: Option<String>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            id: new_id(),
            agent_name,
            status: TraceStatus::Running,
            started_at: unix_now(),
            ended_at: None,
            total_tokens_in: 0,
            total_tokens_out: 0,
            total_cost_usd: 0.0,
            metadata,
            error: None,
            spans: Vec::new(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// End the trace: set the final status, optionally attach an error, and
    /// sum token/cost totals over the owned spans (unset fields count as 0).
    /// One-shot; a second call is a no-op.
    pub fn end(&mut self, status: TraceStatus, error: Option<String>) {
        if self.ended_at.is_some() {
            return;
        }
        self.ended_at = Some(unix_now());
        self.status = status;
        if let Some(message) = error {
            self.error = Some(message);
        }
        for handle in &self.spans {
            let span = handle.snapshot();
            self.total_tokens_in += span.tokens_in.unwrap_or(0);
            self.total_tokens_out += span.tokens_out.unwrap_or(0);
            self.total_cost_usd += span.cost_usd.unwrap_or(0.0);
        }
    }
}

/// Shared-mutation wrapper around a [`Trace`].
#[derive(Debug, Clone)]
pub struct TraceHandle(Arc<Mutex<Trace>>);

impl TraceHandle {
    pub fn new(trace: Trace) -> Self {
        Self(Arc::new(Mutex::new(trace)))
    }

    pub fn id(&self) -> String {
        self.0.lock().unwrap().id.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.0.lock().unwrap().is_ended()
    }

    /// Append a span. Spans may be added until the trace ends.
    pub fn add_span(&self, span: SpanHandle) {
        let mut trace = self.0.lock().unwrap();
        if trace.ended_at.is_none() {
            trace.spans.push(span);
        }
    }

    /// End the trace (see [`Trace::end`]).
    pub fn end(&self, status: TraceStatus, error: Option<String>) {
        self.0.lock().unwrap().end(status, error);
    }

    /// Copy of the current trace record.
    pub fn snapshot(&self) -> Trace {
        self.0.lock().unwrap().clone()
    }

    /// Copies of all owned span records, in creation order.
    pub fn span_snapshots(&self) -> Vec<Span> {
        self.0
            .lock()
            .unwrap()
            .spans
            .iter()
            .map(SpanHandle::snapshot)
            .collect()
    }

    /// Whether two handles refer to the same trace.
    pub fn same_trace(&self, other: &TraceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_ends_once() {
        let mut span = Span::new("op", SpanKind::Custom, "t1");
        span.end(None);
        let first = span.ended_at;
        assert!(first.is_some());
        assert!(span.ended_at.unwrap() >= span.started_at);

        span.end(Some("late".to_string()));
        assert_eq!(span.ended_at, first);
        assert!(span.error.is_none());
    }

    #[test]
    fn test_span_immutable_after_end() {
        let handle = SpanHandle::new(Span::new("op", SpanKind::Tool, "t1"));
        handle.set_tokens(10, 20);
        handle.end();
        handle.set_tokens(99, 99);
        handle.set_output("ignored");

        let span = handle.snapshot();
        assert_eq!(span.tokens_in, Some(10));
        assert_eq!(span.tokens_out, Some(20));
        assert!(span.output.is_none());
    }

    #[test]
    fn test_trace_aggregates_at_end() {
        let trace = TraceHandle::new(Trace::new(Some("agent".to_string()), None));

        let a = SpanHandle::new(Span::new("a", SpanKind::Llm, trace.id()));
        a.set_tokens(100, 50);
        a.set_cost(0.01);
        a.end();
        trace.add_span(a);

        // Span with no usage counts as zero.
        let b = SpanHandle::new(Span::new("b", SpanKind::Tool, trace.id()));
        b.end();
        trace.add_span(b);

        assert_eq!(trace.snapshot().total_tokens_in, 0);

        trace.end(TraceStatus::Success, None);
        let snap = trace.snapshot();
        assert_eq!(snap.total_tokens_in, 100);
        assert_eq!(snap.total_tokens_out, 50);
        assert!((snap.total_cost_usd - 0.01).abs() < 1e-12);
        assert_eq!(snap.status, TraceStatus::Success);
    }

    #[test]
    fn test_trace_status_transition_is_one_way() {
        let trace = TraceHandle::new(Trace::new(None, None));
        trace.end(TraceStatus::Error, Some("boom".to_string()));
        trace.end(TraceStatus::Success, None);

        let snap = trace.snapshot();
        assert_eq!(snap.status, TraceStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_no_spans_after_end() {
        let trace = TraceHandle::new(Trace::new(None, None));
        trace.end(TraceStatus::Success, None);
        trace.add_span(SpanHandle::new(Span::new("late", SpanKind::Custom, trace.id())));
        assert!(trace.span_snapshots().is_empty());
    }

    #[test]
    fn test_wire_format() {
        let mut span = Span::new("lookup", SpanKind::Llm, "t1");
        span.end(None);
        let value = serde_json::to_value(&span).unwrap();
        assert_eq!(value["kind"], "llm");
        assert_eq!(value["trace_id"], "t1");
        assert!(value["parent_span_id"].is_null());
        assert!(value["started_at"].is_f64());

        let trace = Trace::new(Some("agent".to_string()), None);
        let value = serde_json::to_value(&trace).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["agent_name"], "agent");
        assert!(value.get("spans").is_none());
    }

    #[test]
    fn test_orphan_span() {
        let span = Span::new("loose", SpanKind::Custom, "");
        assert!(span.is_orphan());
        assert!(!Span::new("owned", SpanKind::Custom, "t1").is_orphan());
    }
}
