//! Calltrace - in-process call-tree tracing engine
//!
//! Instrumentation reports method enter/exit/error events to a per-thread
//! [`Assembler`], which builds a bounded, filtered call tree on the fly:
//! insignificant frames are merged into their parents, runaway traces are
//! capped, and whole trees are handed to output sinks only when a frame that
//! opened a named trace closes and meets the submission criteria.
//!
//! ```
//! use calltrace::{CollectingSink, MarkerFlags, Tracer, TracerConfig};
//! use std::sync::Arc;
//!
//! let tracer = Tracer::new(TracerConfig { min_trace_time: 0, ..Default::default() });
//! let sink = Arc::new(CollectingSink::new());
//! tracer.add_sink(sink.clone());
//!
//! tracer.with_local(|a| {
//!     a.begin(1, 0, MarkerFlags::empty());
//!     a.enter(10, 20, 30, 0);
//!     a.exit(1_000);
//! });
//!
//! assert_eq!(sink.len(), 1);
//! ```

pub mod assembler;
pub mod config;
pub mod dtrace; // W3C traceparent correlation
pub mod engine;
pub mod error;
pub mod exception;
pub mod flags;
pub mod logging;
pub mod marker;
pub mod node;
pub mod node_pool;
pub mod queued_sink;
pub mod sink;
pub mod symbol;

pub use assembler::{Assembler, TraceTarget};
pub use config::{Thresholds, TracerConfig};
pub use dtrace::{DTraceContext, DTraceError};
pub use engine::{EngineStats, Tracer};
pub use error::{ConfigError, TracerError};
pub use exception::{ErrorSummary, ExceptionRef, StackFrame};
pub use flags::{MarkerFlags, NodeFlags};
pub use marker::TraceMarker;
pub use node::{AttrValue, TraceNode};
pub use node_pool::{NodePool, NodePoolConfig, PoolStats};
pub use queued_sink::{QueueStats, QueuedSink};
pub use sink::{CollectingSink, FnSink, TraceSink};
pub use symbol::{SymbolId, SymbolResolver};
