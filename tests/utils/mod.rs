// Shared helpers for integration tests
//
// Event scripts are replayed against an assembler so the same call sequence
// can be run on several threads or several engines.

#![allow(dead_code)]

use calltrace::{
    Assembler, CollectingSink, ErrorSummary, MarkerFlags, SymbolId, TraceNode, Tracer,
    TracerConfig,
};
use std::sync::Arc;

pub const MS: u64 = 1_000_000;

/// One instrumentation event; timestamps are deltas from the previous event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Enter { class_id: SymbolId, dt: u64 },
    Exit { dt: u64 },
    Error { dt: u64 },
    Begin { trace_id: SymbolId },
}

/// Tracer with a single collecting sink attached.
pub fn collecting(config: TracerConfig) -> (Tracer, Arc<CollectingSink>) {
    let tracer = Tracer::new(config);
    let sink = Arc::new(CollectingSink::new());
    tracer.add_sink(sink.clone());
    (tracer, sink)
}

/// Replay a script verbatim.
pub fn replay(assembler: &mut Assembler, ops: &[Op]) {
    let mut now = 0;
    for op in ops {
        match *op {
            Op::Enter { class_id, dt } => {
                now += dt;
                assembler.enter(class_id, 1, 1, now);
            }
            Op::Exit { dt } => {
                now += dt;
                assembler.exit(now);
            }
            Op::Error { dt } => {
                now += dt;
                let err = ErrorSummary::new(99, format!("error at {now}")).into_ref();
                assembler.error(err, now);
            }
            Op::Begin { trace_id } => assembler.begin(trace_id, now, MarkerFlags::empty()),
        }
    }
}

/// Turn an arbitrary script into a well-formed one: exits only close open
/// frames, every top-level call opens trace `root_trace` (if given),
/// and all frames are closed at the end.
pub fn well_formed(ops: &[Op], root_trace: Option<SymbolId>) -> Vec<Op> {
    let mut out = Vec::with_capacity(ops.len() * 2);
    let mut depth = 0usize;
    for op in ops {
        match *op {
            Op::Enter { .. } => {
                out.push(*op);
                if depth == 0 {
                    if let Some(trace_id) = root_trace {
                        out.push(Op::Begin { trace_id });
                    }
                }
                depth += 1;
            }
            Op::Exit { .. } | Op::Error { .. } if depth > 0 => {
                out.push(*op);
                depth -= 1;
            }
            Op::Begin { .. } if depth > 0 => out.push(*op),
            _ => {}
        }
    }
    for _ in 0..depth {
        out.push(Op::Exit { dt: 1 });
    }
    out
}

pub fn count_enters(ops: &[Op]) -> u64 {
    ops.iter().filter(|op| matches!(op, Op::Enter { .. })).count() as u64
}

pub fn count_errors(ops: &[Op]) -> u64 {
    ops.iter().filter(|op| matches!(op, Op::Error { .. })).count() as u64
}

/// Preorder list of child counts, e.g. `[1, 2, 0, 0]` for a root with one
/// child that has two leaves.
pub fn shape(node: &TraceNode) -> Vec<usize> {
    let mut out = vec![node.num_children()];
    for child in &node.children {
        out.extend(shape(child));
    }
    out
}
