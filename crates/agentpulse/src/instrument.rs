//! Wrappers that record a trace (or nested span) around user code.
//!
//! [`traced`] and [`traced_sync`] are the two invoke paths over one shared
//! begin/finish state machine: the first call in a flow opens a new trace,
//! nested calls open child spans, and either way the outcome is captured and
//! the prior context restored on every exit path.
//!
//! ```rust,no_run
//! use agentpulse::{tool, traced};
//!
//! async fn run() -> Result<String, String> {
//!     traced("research-agent", async {
//!         let hits: Vec<String> = tool("web_search", async { Ok::<_, String>(Vec::new()) }).await?;
//!         Ok(format!("{} hits", hits.len()))
//!     })
//!     .await
//! }
//! ```

use std::fmt::Display;

use serde::Serialize;

use crate::context::{self, ContextGuard};
use crate::models::{Span, SpanHandle, SpanKind, Trace, TraceHandle, TraceStatus};

/// Options for a traced call. A bare `TraceOptions::new()` names the trace
/// after the wrapped code; a lone string is shorthand for the name.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    name: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl TraceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit name for the trace (or nested span). Wins over the derived
    /// fallback.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Free-form metadata attached to the trace record. Values that fail to
    /// serialize are dropped.
    pub fn metadata(mut self, metadata: impl Serialize) -> Self {
        self.metadata = serde_json::to_value(metadata).ok();
        self
    }
}

impl From<&str> for TraceOptions {
    fn from(name: &str) -> Self {
        TraceOptions::new().name(name)
    }
}

impl From<String> for TraceOptions {
    fn from(name: String) -> Self {
        TraceOptions::new().name(name)
    }
}

/// Best-effort name from a closure/future type: the last real path segment,
/// with generics and `{{closure}}`/async-body markers stripped.
fn derive_name(raw: &str) -> String {
    let base = raw.split('<').next().unwrap_or(raw);
    base.rsplit("::")
        .find(|segment| !segment.is_empty() && !segment.contains('{'))
        .unwrap_or("trace")
        .to_string()
}

/// What `begin` opened; tells `finish` how to close it.
enum Opened {
    NewTrace(TraceHandle),
    ChildSpan(SpanHandle),
}

fn begin(options: &TraceOptions, fallback_name: &str) -> (Opened, ContextGuard) {
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| fallback_name.to_string());

    match context::get_current_trace() {
        // Already inside a trace: record this call as a child span.
        Some(trace) => {
            let mut span = Span::new(name, SpanKind::Custom, trace.id());
            span.parent_span_id = context::get_current_span().map(|parent| parent.id());
            let span = SpanHandle::new(span);
            trace.add_span(span.clone());
            let token = context::set_current_span(Some(span.clone()));
            (Opened::ChildSpan(span), ContextGuard::for_span(token))
        }
        // Top of a flow: open a new trace with no current span.
        None => {
            let trace = TraceHandle::new(Trace::new(Some(name), options.metadata.clone()));
            let trace_token = context::set_current_trace(Some(trace.clone()));
            let span_token = context::set_current_span(None);
            (
                Opened::NewTrace(trace.clone()),
                ContextGuard::for_trace(trace_token, span_token),
            )
        }
    }
}

fn finish(opened: Opened, error: Option<String>) {
    match opened {
        Opened::ChildSpan(span) => match error {
            Some(message) => span.end_with_error(message),
            None => span.end(),
        },
        Opened::NewTrace(trace) => {
            let (status, error) = match error {
                Some(message) => (TraceStatus::Error, Some(message)),
                None => (TraceStatus::Success, None),
            };
            // A registered client forwards the finished records to the
            // transport; with none, the trace is finalized locally only.
            match crate::client::get_client() {
                Some(client) => client.end_trace(&trace, status, error),
                None => trace.end(status, error),
            }
        }
    }
}

/// Record a trace (or nested span) around an async body.
///
/// Errors are captured as the span/trace error text and returned unchanged;
/// the pre-call context is restored even if the future is cancelled.
pub async fn traced<T, E, Fut>(options: impl Into<TraceOptions>, body: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let options = options.into();
    let fallback = derive_name(std::any::type_name::<Fut>());
    if context::in_task_scope() {
        run_traced(options, fallback, body).await
    } else {
        // Establish task-local storage so the context follows the task
        // across worker threads.
        context::scope(run_traced(options, fallback, body)).await
    }
}

async fn run_traced<T, E, Fut>(
    options: TraceOptions,
    fallback_name: String,
    body: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let (opened, _guard) = begin(&options, &fallback_name);
    let result = body.await;
    finish(opened, result.as_ref().err().map(ToString::to_string));
    result
}

/// Record a trace (or nested span) around a blocking body.
pub fn traced_sync<T, E, F>(options: impl Into<TraceOptions>, body: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: Display,
{
    let options = options.into();
    let fallback = derive_name(std::any::type_name::<F>());
    let (opened, _guard) = begin(&options, &fallback);
    let result = body();
    finish(opened, result.as_ref().err().map(ToString::to_string));
    result
}

/// Record a TOOL span around an async body.
///
/// With no registered client the body runs untraced; instrumentation never
/// fails business logic.
pub async fn tool<T, E, Fut>(name: &str, body: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let Some(client) = crate::client::get_client() else {
        return body.await;
    };
    if context::in_task_scope() {
        run_tool(client, name, body).await
    } else {
        context::scope(run_tool(client, name, body)).await
    }
}

async fn run_tool<T, E, Fut>(
    client: std::sync::Arc<crate::client::AgentPulse>,
    name: &str,
    body: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let span = client.start_span(name, SpanKind::Tool, None);
    let token = context::set_current_span(Some(span.clone()));
    let _guard = ContextGuard::for_span(token);
    let result = body.await;
    match &result {
        Ok(_) => span.end(),
        Err(error) => span.end_with_error(error.to_string()),
    }
    result
}

/// Record a TOOL span around a blocking body (pass-through with no client).
pub fn tool_sync<T, E, F>(name: &str, body: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: Display,
{
    let Some(client) = crate::client::get_client() else {
        return body();
    };
    let span = client.start_span(name, SpanKind::Tool, None);
    let token = context::set_current_span(Some(span.clone()));
    let _guard = ContextGuard::for_span(token);
    let result = body();
    match &result {
        Ok(_) => span.end(),
        Err(error) => span.end_with_error(error.to_string()),
    }
    result
}
