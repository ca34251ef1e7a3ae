//! Queued hand-off sink
//!
//! Decouples trace submission (on the application thread) from whatever the
//! consumer does with a tree: serialization, I/O, shipping. `accept` only
//! enqueues into a bounded lock-free queue; a sidecar thread drains it in
//! batches and feeds the consumer closure.
//!
//! ```text
//! application thread                       sidecar thread
//!   Assembler::exit                          loop {
//!     -> Tracer::submit                        drain up to BATCH_SIZE
//!       -> QueuedSink::accept ---ArrayQueue--> consumer(tree) for each
//!                                              sleep if idle
//!                                            }
//! ```
//!
//! A full queue drops the tree and counts it; the application thread is
//! never blocked.

use crate::node::TraceNode;
use crate::sink::TraceSink;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const BATCH_SIZE: usize = 100;
const IDLE_SLEEP: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    pushed: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

/// Bounded queue in front of a consumer running on its own thread.
///
/// # Example
///
/// ```no_run
/// use calltrace::{QueuedSink, Tracer};
/// use std::sync::Arc;
///
/// let tracer = Tracer::default();
/// let sink = Arc::new(QueuedSink::new(8192, |tree| {
///     println!("trace {} with {} calls", tree.trace_id(), tree.calls);
/// }));
/// tracer.add_sink(sink.clone());
///
/// // ... run instrumented code ...
///
/// tracer.shutdown(); // drains and stops the sidecar thread
/// ```
pub struct QueuedSink {
    queue: Arc<ArrayQueue<Arc<TraceNode>>>,
    shared: Arc<Shared>,
    sidecar: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedSink {
    /// Create the queue and start the sidecar thread.
    ///
    /// A `capacity` of 0 is raised to 1.
    pub fn new<F>(capacity: usize, consumer: F) -> Self
    where
        F: FnMut(Arc<TraceNode>) + Send + 'static,
    {
        let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
        let shared = Arc::new(Shared::default());

        let worker_queue = Arc::clone(&queue);
        let worker_shared = Arc::clone(&shared);
        let sidecar = thread::Builder::new()
            .name("calltrace-sink".to_string())
            .spawn(move || Self::sidecar_worker(worker_queue, worker_shared, consumer));

        let sidecar = match sidecar {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to start sink thread; traces will be refused");
                shared.closed.store(true, Ordering::SeqCst);
                None
            }
        };

        QueuedSink {
            queue,
            shared,
            sidecar: Mutex::new(sidecar),
        }
    }

    /// Stop accepting, drain what is queued and join the sidecar thread.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let handle = self
            .sidecar
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("sink consumer thread panicked");
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.shared.pushed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            queued: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    fn sidecar_worker<F>(queue: Arc<ArrayQueue<Arc<TraceNode>>>, shared: Arc<Shared>, mut consumer: F)
    where
        F: FnMut(Arc<TraceNode>),
    {
        loop {
            // Read before draining so nothing enqueued before close is missed
            let closing = shared.closed.load(Ordering::SeqCst);

            let mut drained = 0;
            while drained < BATCH_SIZE || closing {
                let Some(tree) = queue.pop() else {
                    break;
                };
                consumer(tree);
                drained += 1;
            }
            shared.delivered.fetch_add(drained as u64, Ordering::Relaxed);

            if closing {
                debug!(delivered = shared.delivered.load(Ordering::Relaxed), "sink thread stopped");
                break;
            }
            if drained == 0 {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
}

impl TraceSink for QueuedSink {
    fn accept(&self, trace: Arc<TraceNode>) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);

        match self.queue.push(trace) {
            Ok(()) => true,
            Err(_) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(capacity = self.queue.capacity(), "sink queue full, trace dropped");
                false
            }
        }
    }

    fn shutdown(&self) {
        self.close();
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for QueuedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedSink").field("stats", &self.stats()).finish()
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Trees offered while open
    pub pushed: u64,
    /// Trees refused because the queue was full
    pub dropped: u64,
    /// Trees handed to the consumer
    pub delivered: u64,
    /// Trees currently waiting
    pub queued: usize,
    pub capacity: usize,
}

impl QueueStats {
    /// Percentage of offered trees that were dropped
    pub fn drop_rate(&self) -> f64 {
        if self.pushed == 0 {
            return 0.0;
        }
        (self.dropped as f64 / self.pushed as f64) * 100.0
    }
}
