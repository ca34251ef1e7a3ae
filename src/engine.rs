//! Trace engine
//!
//! Owns the global thresholds and the set of output sinks, and hands every
//! application thread its own [`Assembler`].
//!
//! The sink set is an immutable `Vec` behind an [`ArcSwap`]: submission
//! loads a snapshot without locking, registration replaces the whole vector.
//! A trace in flight therefore always sees one consistent list, even while
//! sinks are being added or the engine is shutting down.

use crate::assembler::Assembler;
use crate::config::{Thresholds, TracerConfig};
use crate::node::TraceNode;
use crate::sink::TraceSink;
use arc_swap::ArcSwap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

type SinkList = Vec<Arc<dyn TraceSink>>;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static LOCAL_ASSEMBLERS: RefCell<HashMap<u64, Assembler>> = RefCell::new(HashMap::new());
}

/// State shared by the engine handle and all of its assemblers.
pub(crate) struct EngineCore {
    id: u64,
    pub(crate) thresholds: Thresholds,
    pub(crate) pool_capacity: usize,
    sinks: ArcSwap<SinkList>,
    counters: Counters,
    handles: AtomicUsize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    undelivered: AtomicU64,
    sink_panics: AtomicU64,
}

/// Engine diagnostics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Traces that met the submission criteria
    pub traces_submitted: u64,
    /// Traces that closed without meeting the criteria
    pub traces_dropped: u64,
    /// Submitted traces no sink accepted
    pub traces_undelivered: u64,
    /// Panics caught inside sinks
    pub sink_panics: u64,
}

impl EngineCore {
    /// Broadcast a finished trace to every registered sink.
    pub(crate) fn submit(&self, trace: Arc<TraceNode>) -> bool {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let sinks = self.sinks.load_full();
        let mut accepted = false;
        for sink in sinks.iter() {
            let trace = Arc::clone(&trace);
            match panic::catch_unwind(AssertUnwindSafe(|| sink.accept(trace))) {
                Ok(ok) => accepted |= ok,
                Err(_) => {
                    self.counters.sink_panics.fetch_add(1, Ordering::Relaxed);
                    error!("trace sink panicked while accepting a trace; continuing with remaining sinks");
                }
            }
        }

        if !accepted {
            self.counters.undelivered.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    pub(crate) fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether any `Tracer` handle still refers to this engine.
    fn has_handles(&self) -> bool {
        self.handles.load(Ordering::Acquire) > 0
    }
}

/// Handle to a trace engine. Cheap to clone; clones share everything.
///
/// Thread-local assemblers of an engine whose handles are all dropped are
/// reclaimed the next time that thread sets up an assembler for another
/// engine, or immediately through [`Tracer::release_local`].
pub struct Tracer {
    core: Arc<EngineCore>,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Self {
        let core = EngineCore {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            thresholds: Thresholds::new(&config),
            pool_capacity: config.pool_capacity,
            sinks: ArcSwap::from_pointee(Vec::new()),
            counters: Counters::default(),
            handles: AtomicUsize::new(1),
        };
        Tracer {
            core: Arc::new(core),
        }
    }

    /// Live thresholds; updates apply to the next event on every thread.
    pub fn thresholds(&self) -> &Thresholds {
        &self.core.thresholds
    }

    /// Current configuration, including runtime adjustments.
    pub fn config(&self) -> TracerConfig {
        self.core.thresholds.to_config(self.core.pool_capacity)
    }

    pub fn add_sink(&self, sink: Arc<dyn TraceSink>) {
        self.core.sinks.rcu(|current| {
            let mut next = SinkList::clone(current);
            next.push(Arc::clone(&sink));
            next
        });
        debug!(sinks = self.core.sinks.load().len(), "trace sink registered");
    }

    /// Unregister a sink (by identity). Returns `false` if it was not registered.
    pub fn remove_sink(&self, sink: &Arc<dyn TraceSink>) -> bool {
        let mut removed = false;
        self.core.sinks.rcu(|current| {
            let next: SinkList = current
                .iter()
                .filter(|s| !same_sink(s, sink))
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    /// Immutable snapshot of the registered sinks.
    pub fn sinks(&self) -> Arc<SinkList> {
        self.core.sinks.load_full()
    }

    /// Hand a finished tree to every sink. Returns true if any sink accepted it.
    pub fn submit(&self, trace: Arc<TraceNode>) -> bool {
        self.core.submit(trace)
    }

    /// Swap in an empty sink set and shut down the previous sinks.
    ///
    /// Submissions already holding the old snapshot still reach the old
    /// sinks; later ones are not delivered anywhere.
    pub fn shutdown(&self) {
        let old = self.core.sinks.swap(Arc::new(Vec::new()));
        for sink in old.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| sink.shutdown())).is_err() {
                self.core.counters.sink_panics.fetch_add(1, Ordering::Relaxed);
                error!("trace sink panicked during shutdown");
            }
        }
        debug!(released = old.len(), "trace engine shut down");
    }

    /// Create a new assembler bound to this engine.
    ///
    /// The caller owns it and must keep it on a single thread of execution.
    pub fn assembler(&self) -> Assembler {
        Assembler::new(Arc::clone(&self.core))
    }

    /// Run `f` with this thread's assembler, creating it on first use.
    ///
    /// Returns `None` when called re-entrantly (for instance from a sink
    /// invoked by a submission on the same thread), so the engine never
    /// traces its own activity.
    pub fn with_local<R>(&self, f: impl FnOnce(&mut Assembler) -> R) -> Option<R> {
        LOCAL_ASSEMBLERS
            .try_with(|cell| {
                let mut assemblers = cell.try_borrow_mut().ok()?;
                if !assemblers.contains_key(&self.core.id) {
                    assemblers.retain(|_, a| a.core().has_handles());
                }
                let assembler = assemblers
                    .entry(self.core.id)
                    .or_insert_with(|| self.assembler());
                Some(f(assembler))
            })
            .ok()
            .flatten()
    }

    /// Drop this thread's assembler for this engine, if any.
    pub fn release_local(&self) -> bool {
        LOCAL_ASSEMBLERS
            .try_with(|cell| {
                cell.try_borrow_mut()
                    .map(|mut assemblers| assemblers.remove(&self.core.id).is_some())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.core.counters;
        EngineStats {
            traces_submitted: c.submitted.load(Ordering::Relaxed),
            traces_dropped: c.dropped.load(Ordering::Relaxed),
            traces_undelivered: c.undelivered.load(Ordering::Relaxed),
            sink_panics: c.sink_panics.load(Ordering::Relaxed),
        }
    }
}

impl Clone for Tracer {
    fn clone(&self) -> Self {
        self.core.handles.fetch_add(1, Ordering::AcqRel);
        Tracer {
            core: Arc::clone(&self.core),
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.core.handles.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(TracerConfig::default())
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("id", &self.core.id)
            .field("sinks", &self.core.sinks.load().len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn same_sink(a: &Arc<dyn TraceSink>, b: &Arc<dyn TraceSink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CollectingSink, FnSink};

    #[test]
    fn test_submit_without_sinks_is_undelivered() {
        let tracer = Tracer::default();
        assert!(!tracer.submit(Arc::new(TraceNode::new())));

        let stats = tracer.stats();
        assert_eq!(stats.traces_submitted, 1);
        assert_eq!(stats.traces_undelivered, 1);
    }

    #[test]
    fn test_submit_broadcasts_to_all_sinks() {
        let tracer = Tracer::default();
        let a = Arc::new(CollectingSink::new());
        let b = Arc::new(CollectingSink::new());
        tracer.add_sink(a.clone());
        tracer.add_sink(b.clone());

        let trace = Arc::new(TraceNode::new());
        assert!(tracer.submit(trace.clone()));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        // Same allocation handed to both sinks
        assert!(Arc::ptr_eq(&a.take()[0], &trace));
        assert!(Arc::ptr_eq(&b.take()[0], &trace));
    }

    #[test]
    fn test_accepted_if_any_sink_accepts() {
        let tracer = Tracer::default();
        tracer.add_sink(Arc::new(FnSink::new(|_| false)));
        assert!(!tracer.submit(Arc::new(TraceNode::new())));

        tracer.add_sink(Arc::new(FnSink::new(|_| true)));
        assert!(tracer.submit(Arc::new(TraceNode::new())));
    }

    #[test]
    fn test_panicking_sink_does_not_block_others() {
        let tracer = Tracer::default();
        let collector = Arc::new(CollectingSink::new());
        tracer.add_sink(Arc::new(FnSink::new(|_| panic!("sink failure"))));
        tracer.add_sink(collector.clone());

        assert!(tracer.submit(Arc::new(TraceNode::new())));
        assert_eq!(collector.len(), 1);
        assert_eq!(tracer.stats().sink_panics, 1);
    }

    #[test]
    fn test_remove_sink_by_identity() {
        let tracer = Tracer::default();
        let a: Arc<dyn TraceSink> = Arc::new(CollectingSink::new());
        let b: Arc<dyn TraceSink> = Arc::new(CollectingSink::new());
        tracer.add_sink(a.clone());
        tracer.add_sink(b.clone());

        assert!(tracer.remove_sink(&a));
        assert!(!tracer.remove_sink(&a));
        assert_eq!(tracer.sinks().len(), 1);
        assert!(same_sink(&tracer.sinks()[0], &b));
    }

    #[test]
    fn test_shutdown_releases_sinks() {
        let tracer = Tracer::default();
        let sink = Arc::new(CollectingSink::new());
        tracer.add_sink(sink.clone());

        let snapshot = tracer.sinks();
        tracer.shutdown();

        assert!(sink.is_closed());
        assert!(tracer.sinks().is_empty());
        assert_eq!(snapshot.len(), 1);
        assert!(!tracer.submit(Arc::new(TraceNode::new())));
    }

    #[test]
    fn test_with_local_reuses_assembler() {
        let tracer = Tracer::default();
        tracer.with_local(|a| a.enter(1, 2, 3, 100)).unwrap();
        let depth = tracer.with_local(|a| a.top().class_id).unwrap();
        assert_eq!(depth, 1);

        assert!(tracer.release_local());
        let fresh = tracer.with_local(|a| a.top().is_busy()).unwrap();
        assert!(!fresh);
    }

    #[test]
    fn test_with_local_is_not_reentrant() {
        let tracer = Tracer::default();
        let inner = tracer.clone();
        let nested = tracer
            .with_local(|_| inner.with_local(|_| ()).is_some())
            .unwrap();
        assert!(!nested);
    }

    #[test]
    fn test_orphaned_local_assemblers_are_reclaimed() {
        let sink = Arc::new(CollectingSink::new());
        let engine = {
            let tracer = Tracer::default();
            tracer.add_sink(sink.clone());
            tracer.with_local(|a| a.enter(1, 1, 1, 0)).unwrap();
            let copy = tracer.clone();
            drop(tracer);
            assert!(copy.core.has_handles());
            Arc::downgrade(&copy.core)
        };
        assert!(engine.upgrade().is_some());

        let other = Tracer::default();
        other.with_local(|a| a.enter(2, 2, 2, 0)).unwrap();

        assert!(engine.upgrade().is_none());
        assert_eq!(Arc::strong_count(&sink), 1);
        assert_eq!(other.with_local(|a| a.top().class_id), Some(2));
    }

    #[test]
    fn test_engines_have_independent_local_assemblers() {
        let t1 = Tracer::default();
        let t2 = Tracer::default();
        t1.with_local(|a| a.enter(1, 1, 1, 0));
        let busy = t2.with_local(|a| a.top().is_busy()).unwrap();
        assert!(!busy);
    }
}
