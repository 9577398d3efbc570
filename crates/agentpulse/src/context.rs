//! Current trace/span visibility, scoped to one logical execution flow.
//!
//! Each flow owns independent storage: async tasks read a `tokio::task_local!`
//! slot installed by [`scope`], plain threads fall back to a `thread_local!`
//! slot. There is no shared global, so concurrent flows can never corrupt
//! each other's nesting.
//!
//! `set_*` installs a value and returns a token capturing the prior one;
//! `restore_*` pops back. Callers must restore on every exit path, which the
//! engine does via a drop guard.

use std::cell::RefCell;

use crate::models::{SpanHandle, TraceHandle};

#[derive(Debug, Clone, Default)]
struct ActiveContext {
    trace: Option<TraceHandle>,
    span: Option<SpanHandle>,
}

tokio::task_local! {
    static TASK_CONTEXT: RefCell<ActiveContext>;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<ActiveContext> = RefCell::new(ActiveContext::default());
}

fn with_active<R>(f: impl FnOnce(&mut ActiveContext) -> R) -> R {
    let mut f = Some(f);
    match TASK_CONTEXT.try_with(|cx| (f.take().unwrap())(&mut cx.borrow_mut())) {
        Ok(result) => result,
        // Not inside a task scope: use the calling thread's storage.
        Err(_) => THREAD_CONTEXT.with(|cx| (f.take().unwrap())(&mut cx.borrow_mut())),
    }
}

/// Token capturing the trace that was current before a `set_current_trace`.
#[must_use = "restore_trace must be called on every exit path"]
#[derive(Debug)]
pub struct TraceToken(Option<TraceHandle>);

/// Token capturing the span that was current before a `set_current_span`.
#[must_use = "restore_span must be called on every exit path"]
#[derive(Debug)]
pub struct SpanToken(Option<SpanHandle>);

/// The trace visible in the calling flow, if any.
pub fn get_current_trace() -> Option<TraceHandle> {
    with_active(|cx| cx.trace.clone())
}

/// The span visible in the calling flow, if any.
pub fn get_current_span() -> Option<SpanHandle> {
    with_active(|cx| cx.span.clone())
}

/// Install a new current trace, returning a token for the prior value.
pub fn set_current_trace(trace: Option<TraceHandle>) -> TraceToken {
    with_active(|cx| TraceToken(std::mem::replace(&mut cx.trace, trace)))
}

/// Pop the current trace back to the value captured in `token`.
pub fn restore_trace(token: TraceToken) {
    with_active(|cx| cx.trace = token.0);
}

/// Install a new current span, returning a token for the prior value.
pub fn set_current_span(span: Option<SpanHandle>) -> SpanToken {
    with_active(|cx| SpanToken(std::mem::replace(&mut cx.span, span)))
}

/// Pop the current span back to the value captured in `token`.
pub fn restore_span(token: SpanToken) {
    with_active(|cx| cx.span = token.0);
}

/// Whether the calling code runs inside a task-local context scope.
pub fn in_task_scope() -> bool {
    TASK_CONTEXT.try_with(|_| ()).is_ok()
}

/// Run `future` in its own context scope, seeded with a snapshot of the
/// caller's current trace/span.
///
/// The snapshot is taken when `scope` is called, not when the future is
/// polled, so wrapping a future before `tokio::spawn` hands the child task
/// the parent's context as of the spawn point (copy-on-fork: the child's
/// later set/restore calls are invisible to the parent).
pub fn scope<F: Future>(future: F) -> impl Future<Output = F::Output> {
    let snapshot = with_active(|cx| cx.clone());
    TASK_CONTEXT.scope(RefCell::new(snapshot), future)
}

/// Restores captured context tokens when dropped, so the pre-call context
/// comes back on success, error, panic, and future cancellation alike.
pub(crate) struct ContextGuard {
    trace: Option<TraceToken>,
    span: Option<SpanToken>,
}

impl ContextGuard {
    pub(crate) fn for_span(span: SpanToken) -> Self {
        Self {
            trace: None,
            span: Some(span),
        }
    }

    pub(crate) fn for_trace(trace: TraceToken, span: SpanToken) -> Self {
        Self {
            trace: Some(trace),
            span: Some(span),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(token) = self.span.take() {
            restore_span(token);
        }
        if let Some(token) = self.trace.take() {
            restore_trace(token);
        }
    }
}
