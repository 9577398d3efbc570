//! The AgentPulse client: configuration, manual span operations, and the
//! process-wide registry the wrappers consult.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::{self, ContextGuard};
use crate::models::{Span, SpanHandle, SpanKind, Trace, TraceHandle, TraceStatus};
use crate::transport::{Transport, TransportError};

/// Default collector endpoint (self-hosted dev collector).
const DEFAULT_ENDPOINT: &str = "http://localhost:3000";
/// Default background flush cadence.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
/// Default records-per-batch threshold.
const DEFAULT_BATCH_SIZE: usize = 50;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the collector.
    pub endpoint: String,

    /// Project API key, sent as `X-AgentPulse-Key` when set.
    pub api_key: Option<String>,

    /// How often the background flusher drains the queues.
    pub flush_interval: Duration,

    /// Queue length that triggers an immediate flush of that queue.
    pub batch_size: usize,

    /// When false, no transport is constructed and all operations are
    /// local-only bookkeeping with zero network activity.
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            enabled: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read endpoint and API key from `AGENTPULSE_ENDPOINT` and
    /// `AGENTPULSE_API_KEY`; unset variables keep the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("AGENTPULSE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(key) = std::env::var("AGENTPULSE_API_KEY") {
            config.api_key = Some(key);
        }
        config
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Turn delivery off entirely.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

static GLOBAL_CLIENT: Mutex<Option<Arc<AgentPulse>>> = Mutex::new(None);

/// Build a client and register it as the process-wide instance consulted by
/// [`traced`](crate::traced) and [`tool`](crate::tool).
pub fn init(config: Config) -> Result<Arc<AgentPulse>, TransportError> {
    let client = AgentPulse::new(config)?;
    *GLOBAL_CLIENT.lock().unwrap() = Some(client.clone());
    Ok(client)
}

/// The registered client, if any.
pub fn get_client() -> Option<Arc<AgentPulse>> {
    GLOBAL_CLIENT.lock().unwrap().clone()
}

/// Deregister the process-wide client. Does not shut it down.
pub fn clear_client() {
    GLOBAL_CLIENT.lock().unwrap().take();
}

/// AgentPulse observability client.
///
/// Owns the transport and exposes manual trace/span operations for code not
/// using the wrapper functions. Construction never touches the registry; use
/// [`init`] for the process-wide instance.
pub struct AgentPulse {
    config: Config,
    transport: Option<Transport>,
}

impl AgentPulse {
    /// Create a client. With `enabled` set this must run inside a tokio
    /// runtime (the transport's flusher task needs one); disabled clients
    /// work anywhere.
    pub fn new(config: Config) -> Result<Arc<Self>, TransportError> {
        let transport = if config.enabled {
            Some(Transport::new(&config)?)
        } else {
            None
        };
        Ok(Arc::new(Self { config, transport }))
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Construct a trace without activating it. Callers decide whether to
    /// install it via the context store; most code wants
    /// [`traced`](crate::traced) instead.
    pub fn start_trace(
        &self,
        agent_name: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> TraceHandle {
        TraceHandle::new(Trace::new(agent_name.map(str::to_string), metadata))
    }

    /// Finalize a trace and queue it (and every owned span) for delivery.
    pub fn end_trace(&self, trace: &TraceHandle, status: TraceStatus, error: Option<String>) {
        trace.end(status, error);
        if let Some(transport) = &self.transport {
            transport.send_trace(trace.snapshot());
            for span in trace.span_snapshots() {
                transport.send_span(span);
            }
        }
    }

    /// Create a span under the current trace.
    ///
    /// With no active trace this returns an orphan span (empty `trace_id`):
    /// a valid object callers can populate and end without defensive checks,
    /// but it is never linked to a trace and never delivered.
    pub fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        input: Option<serde_json::Value>,
    ) -> SpanHandle {
        let Some(trace) = context::get_current_trace() else {
            tracing::debug!(span = name, "no active trace; creating orphan span");
            let mut span = Span::new(name, kind, "");
            span.input = input;
            return SpanHandle::new(span);
        };

        let mut span = Span::new(name, kind, trace.id());
        span.parent_span_id = context::get_current_span().map(|parent| parent.id());
        span.input = input;
        let span = SpanHandle::new(span);
        trace.add_span(span.clone());
        span
    }

    /// Run `body` inside a new span, guaranteeing the span is ended and the
    /// context restored on every exit path.
    pub fn with_span<T, E, F>(&self, name: &str, kind: SpanKind, body: F) -> Result<T, E>
    where
        F: FnOnce(&SpanHandle) -> Result<T, E>,
        E: Display,
    {
        let span = self.start_span(name, kind, None);
        let token = context::set_current_span(Some(span.clone()));
        let _guard = ContextGuard::for_span(token);
        let result = body(&span);
        match &result {
            Ok(_) => span.end(),
            Err(error) => span.end_with_error(error.to_string()),
        }
        result
    }

    /// Async counterpart of [`with_span`](Self::with_span).
    pub async fn with_span_async<T, E, F, Fut>(
        &self,
        name: &str,
        kind: SpanKind,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(SpanHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if context::in_task_scope() {
            self.run_span_async(name, kind, body).await
        } else {
            context::scope(self.run_span_async(name, kind, body)).await
        }
    }

    async fn run_span_async<T, E, F, Fut>(&self, name: &str, kind: SpanKind, body: F) -> Result<T, E>
    where
        F: FnOnce(SpanHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let span = self.start_span(name, kind, None);
        let token = context::set_current_span(Some(span.clone()));
        let _guard = ContextGuard::for_span(token);
        let result = body(span.clone()).await;
        match &result {
            Ok(_) => span.end(),
            Err(error) => span.end_with_error(error.to_string()),
        }
        result
    }

    /// Shorthand for [`with_span`](Self::with_span) with [`SpanKind::Tool`].
    pub fn with_tool<T, E, F>(&self, name: &str, body: F) -> Result<T, E>
    where
        F: FnOnce(&SpanHandle) -> Result<T, E>,
        E: Display,
    {
        self.with_span(name, SpanKind::Tool, body)
    }

    /// Shorthand for [`with_span_async`](Self::with_span_async) with
    /// [`SpanKind::Tool`].
    pub async fn with_tool_async<T, E, F, Fut>(&self, name: &str, body: F) -> Result<T, E>
    where
        F: FnOnce(SpanHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.with_span_async(name, SpanKind::Tool, body).await
    }

    /// Drain the transport queues now.
    pub async fn flush(&self) {
        if let Some(transport) = &self.transport {
            transport.flush().await;
        }
    }

    /// Flush and stop the transport. Expected once at process exit;
    /// idempotent if called twice.
    pub async fn shutdown(&self) {
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn local_client() -> Arc<AgentPulse> {
        AgentPulse::new(Config::new().disabled()).unwrap()
    }

    #[test]
    fn test_orphan_span_when_no_trace() {
        let client = local_client();
        let span = client.start_span("loose", SpanKind::Custom, None);
        assert!(span.is_orphan());

        // Orphans are still usable objects.
        span.set_output("data");
        span.end();
        assert!(span.is_ended());
    }

    #[test]
    fn test_start_span_links_parent_and_trace() {
        let client = local_client();
        let trace = client.start_trace(Some("agent"), None);
        let trace_token = context::set_current_trace(Some(trace.clone()));

        let outer = client.start_span("outer", SpanKind::Custom, None);
        let span_token = context::set_current_span(Some(outer.clone()));
        let inner = client.start_span("inner", SpanKind::Llm, None);

        let snap = inner.snapshot();
        assert_eq!(snap.trace_id, trace.id());
        assert_eq!(snap.parent_span_id, Some(outer.id()));
        assert_eq!(trace.span_snapshots().len(), 2);

        context::restore_span(span_token);
        context::restore_trace(trace_token);
    }

    #[test]
    fn test_with_span_restores_on_error() {
        let client = local_client();
        let trace = client.start_trace(Some("agent"), None);
        let trace_token = context::set_current_trace(Some(trace.clone()));

        let result: Result<(), String> =
            client.with_span("step", SpanKind::Custom, |_span| Err("bad".to_string()));
        assert!(result.is_err());
        assert!(context::get_current_span().is_none());

        let spans = trace.span_snapshots();
        assert_eq!(spans[0].error.as_deref(), Some("bad"));
        assert!(spans[0].is_ended());

        context::restore_trace(trace_token);
    }

    #[tokio::test]
    async fn test_with_tool_async_sets_kind() {
        let client = local_client();
        let trace = client.start_trace(Some("agent"), None);

        let result: Result<u32, Infallible> = context::scope(async {
            let _token = context::set_current_trace(Some(trace.clone()));
            client
                .with_tool_async("search", |span| async move {
                    span.set_output(serde_json::json!(["hit"]));
                    Ok(3)
                })
                .await
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        let spans = trace.span_snapshots();
        assert_eq!(spans[0].kind, SpanKind::Tool);
        assert_eq!(spans[0].output, Some(serde_json::json!(["hit"])));
    }

    #[test]
    fn test_end_trace_without_transport_is_local_only() {
        let client = local_client();
        assert!(!client.is_enabled());

        let trace = client.start_trace(Some("agent"), None);
        client.end_trace(&trace, TraceStatus::Success, None);
        assert!(trace.is_ended());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_endpoint("http://collector:9999/")
            .with_api_key("ap_test")
            .with_batch_size(5)
            .with_flush_interval(Duration::from_millis(100));
        assert_eq!(config.endpoint, "http://collector:9999/");
        assert_eq!(config.api_key.as_deref(), Some("ap_test"));
        assert_eq!(config.batch_size, 5);
        assert!(config.enabled);
        assert!(!config.clone().disabled().enabled);
    }
}
