//! Output sinks
//!
//! A sink receives every trace the engine decides to submit. It is called
//! synchronously on the application thread that closed the trace, so it must
//! be fast or hand the tree off (see [`crate::queued_sink::QueuedSink`]).
//! The tree is shared, never copied: every registered sink gets a clone of
//! the same `Arc`.

use crate::node::TraceNode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub trait TraceSink: Send + Sync {
    /// Accept a finished trace. Returns `false` if the trace was refused.
    fn accept(&self, trace: Arc<TraceNode>) -> bool;

    /// Release resources; called once when the engine drops the sink.
    fn shutdown(&self) {}
}

/// Keeps every accepted trace in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    traces: Mutex<Vec<Arc<TraceNode>>>,
    closed: AtomicBool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<Arc<TraceNode>> {
        std::mem::take(&mut *self.lock())
    }

    pub fn snapshot(&self) -> Vec<Arc<TraceNode>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<TraceNode>>> {
        self.traces.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TraceSink for CollectingSink {
    fn accept(&self, trace: Arc<TraceNode>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.lock().push(trace);
        true
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(Arc<TraceNode>) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnSink { f }
    }
}

impl<F> TraceSink for FnSink<F>
where
    F: Fn(Arc<TraceNode>) -> bool + Send + Sync,
{
    fn accept(&self, trace: Arc<TraceNode>) -> bool {
        (self.f)(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_collecting_sink_take() {
        let sink = CollectingSink::new();
        assert!(sink.accept(Arc::new(TraceNode::new())));
        assert!(sink.accept(Arc::new(TraceNode::new())));
        assert_eq!(sink.len(), 2);

        let taken = sink.take();
        assert_eq!(taken.len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_collecting_sink_refuses_after_shutdown() {
        let sink = CollectingSink::new();
        sink.shutdown();
        assert!(sink.is_closed());
        assert!(!sink.accept(Arc::new(TraceNode::new())));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fn_sink() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sink = FnSink::new(move |_trace| {
            counter.fetch_add(1, Ordering::Relaxed);
            true
        });

        assert!(sink.accept(Arc::new(TraceNode::new())));
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
