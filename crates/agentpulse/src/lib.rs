//! Lightweight observability for AI agents.
//!
//! Records agent executions as hierarchical traces and ships them to an
//! AgentPulse collector in the background, without blocking the instrumented
//! code:
//!
//! - **Models**: `Trace` and `Span` wire records with shared-mutation handles
//! - **Context**: per-flow "current trace/span" (task-local, thread-local
//!   fallback) with save/restore tokens
//! - **Instrument**: `traced`/`tool` wrappers for async and blocking code
//! - **Client**: the `AgentPulse` facade and process-wide registry
//! - **Transport**: batched, best-effort HTTP delivery
//!
//! # Usage
//!
//! ```rust,no_run
//! use agentpulse::{Config, tool, traced};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = agentpulse::init(Config::from_env()).unwrap();
//!
//!     let result: Result<String, String> = traced("research-agent", async {
//!         let hits: Vec<String> = tool("web_search", async { Ok::<_, String>(vec![]) }).await?;
//!         Ok(format!("{} hits", hits.len()))
//!     })
//!     .await;
//!     println!("{result:?}");
//!
//!     client.shutdown().await;
//! }
//! ```
//!
//! # Manual LLM instrumentation
//!
//! LLM client adapters create the span themselves and attach model/usage
//! fields before ending it:
//!
//! ```rust,ignore
//! let span = client.start_span("chat_completion", SpanKind::Llm, Some(request_json));
//! let response = llm.chat(request).await?;
//! span.set_model(&response.model);
//! span.set_tokens(response.usage.input, response.usage.output);
//! span.set_cost(calculate_cost(&response.model, response.usage.input, response.usage.output));
//! span.set_output(&response.text);
//! span.end();
//! ```

pub mod client;
pub mod context;
pub mod cost;
pub mod instrument;
pub mod models;
pub mod transport;

// Re-export main types
pub use client::{AgentPulse, Config, clear_client, get_client, init};
pub use cost::{MODEL_COSTS, ModelCost, calculate_cost};
pub use instrument::{TraceOptions, tool, tool_sync, traced, traced_sync};
pub use models::{Span, SpanHandle, SpanKind, Trace, TraceHandle, TraceStatus};
pub use transport::{Transport, TransportError};
