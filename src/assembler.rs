//! Per-thread call-tree assembler
//!
//! Turns a flat stream of enter/exit/error/attribute events into a bounded,
//! filtered call tree. Open frames form a stack: `top` is the innermost frame
//! and `ancestors` holds the enclosing ones, outermost first, so a frame's
//! parent is always the slot directly below it.
//!
//! Every frame close runs a compaction step that decides whether the
//! frame is submitted (it opened a trace), kept (it is significant enough to
//! show up in its parent), or recycled. Calls and errors of dropped frames are
//! always folded into the parent so no statistics are lost.
//!
//! After a frame is discarded while its parent is still open, `top` is left
//! as a clean placeholder above the parent. The next `enter` reuses it; the
//! next `exit` skips it. The "logical top" is the innermost frame that is
//! actually open.

use crate::dtrace::DTraceContext;
use crate::engine::EngineCore;
use crate::error::{Result, TracerError};
use crate::exception::{same_exception, ExceptionRef};
use crate::flags::{MarkerFlags, NodeFlags};
use crate::marker::TraceMarker;
use crate::node::{AttrValue, TraceNode};
use crate::node_pool::{NodePool, NodePoolConfig, PoolStats};
use crate::symbol::SymbolId;
use std::mem;
use std::sync::Arc;
use tracing::{trace, warn, Level};

/// Which open frame an attribute is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
pub enum TraceTarget {
    /// The logical top frame
    CurrentFrame,
    /// The innermost frame that opened any trace
    AnyTrace,
    /// The innermost frame that opened a trace with this id
    Trace(SymbolId),
}

impl TraceTarget {
    fn matches(&self, frame: &TraceNode) -> bool {
        match self {
            TraceTarget::CurrentFrame => true,
            TraceTarget::AnyTrace => frame.is_trace_root(),
            TraceTarget::Trace(id) => frame.is_trace_root() && frame.trace_id() == *id,
        }
    }
}

/// Event receiver of one thread of execution. Never shared, never locked.
pub struct Assembler {
    core: Arc<EngineCore>,
    top: TraceNode,
    ancestors: Vec<TraceNode>,
    node_count: usize,
    enabled: bool,
    pool: NodePool,
}

impl Assembler {
    pub(crate) fn new(core: Arc<EngineCore>) -> Self {
        let mut pool = NodePool::new(NodePoolConfig::new(core.pool_capacity));
        let top = pool.acquire();
        Assembler {
            core,
            top,
            ancestors: Vec::new(),
            node_count: 0,
            enabled: true,
            pool,
        }
    }

    /// Open a named trace on the current frame.
    ///
    /// The marker inherits threshold and flags from the enclosing trace, if
    /// any; `flags` are added on top. A frame can open at most one trace.
    pub fn begin(&mut self, trace_id: SymbolId, clock: u64, flags: MarkerFlags) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.open_trace(trace_id, clock, flags) {
            warn!(
                trace_id,
                class_id = self.top.class_id,
                method_id = self.top.method_id,
                error = %e,
                "trace begin ignored"
            );
        }
    }

    fn open_trace(&mut self, trace_id: SymbolId, clock: u64, flags: MarkerFlags) -> Result<()> {
        if let Some(existing) = &self.top.marker {
            return Err(TracerError::MarkerAlreadySet {
                existing: existing.trace_id,
                requested: trace_id,
            });
        }

        let enclosing = self.ancestors.iter().rev().find_map(|n| n.marker.as_deref());
        let mut marker = match enclosing {
            Some(outer) => TraceMarker::nested(trace_id, clock, outer),
            None => TraceMarker::new(trace_id, clock, self.core.thresholds.min_trace_time()),
        };
        marker.mark_flags(flags);
        if self.core.thresholds.drop_interim() {
            marker.mark_flags(MarkerFlags::DROP_INTERIM);
        }

        if enclosing.is_none() {
            // Frames below a top-level trace root never count against its budget
            self.node_count = usize::from(self.top.is_busy());
        }
        self.top.marker = Some(Box::new(marker));
        self.top.mark_flags(NodeFlags::BEGIN);
        Ok(())
    }

    /// Method entry.
    pub fn enter(&mut self, class_id: SymbolId, method_id: SymbolId, signature_id: SymbolId, tstamp: u64) {
        if !self.enabled {
            return;
        }

        if self.top.is_busy() {
            let frame = self.pool.acquire();
            let parent = mem::replace(&mut self.top, frame);
            self.ancestors.push(parent);
        }
        let in_trace = self.node_count > 0 || self.top.is_trace_root();
        if in_trace {
            self.node_count += 1;
        }

        let top = &mut self.top;
        top.class_id = class_id;
        top.method_id = method_id;
        top.signature_id = signature_id;
        top.start_time = Some(tstamp);
        top.calls += 1;

        if in_trace && self.node_count > self.core.thresholds.max_trace_records() {
            top.mark_flags(NodeFlags::OVERFLOW);
        }

        if self.traces_calls() {
            trace!(class_id, method_id, depth = self.ancestors.len(), tstamp, "enter");
        }
    }

    /// Normal method return.
    pub fn exit(&mut self, tstamp: u64) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.close(tstamp, None) {
            warn!(tstamp, error = %e, "return ignored");
        }
    }

    /// Method exit by error.
    pub fn error(&mut self, exception: ExceptionRef, tstamp: u64) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.close(tstamp, Some(exception)) {
            warn!(tstamp, error = %e, "error ignored");
        }
    }

    fn close(&mut self, tstamp: u64, exception: Option<ExceptionRef>) -> Result<()> {
        self.resync();
        let start = self.top.start_time.ok_or(TracerError::NoOpenFrame)?;

        if let Some(e) = exception {
            self.top.exception = Some(e);
            self.top.errors += 1;
        }
        self.top.duration = tstamp.saturating_sub(start);

        if self.traces_calls() {
            trace!(
                class_id = self.top.class_id,
                method_id = self.top.method_id,
                duration = self.top.duration,
                errors = self.top.errors,
                "exit"
            );
        }

        self.compact();
        Ok(())
    }

    /// Drop placeholders left above the innermost open frame.
    fn resync(&mut self) {
        while !self.top.is_busy() {
            let Some(parent) = self.ancestors.pop() else {
                break;
            };
            let placeholder = mem::replace(&mut self.top, parent);
            self.pool.release(placeholder);
        }
    }

    /// Close the top frame: submit, retain, or recycle it.
    fn compact(&mut self) {
        let min_method_time = self.core.thresholds.min_method_time();
        let min_trace_calls = self.core.thresholds.min_trace_calls();

        self.dedup_exception();

        let duration = self.top.duration;
        let calls = self.top.calls;
        let errors = self.top.errors;
        let frame_flags = self.top.flags;
        let trace_flags = self.nearest_marker().map_or(MarkerFlags::empty(), |m| m.flags);
        let parent_in_trace = self.ancestors.iter().any(TraceNode::is_trace_root);
        let size = self.top.subtree_size();

        let mut shared = self.close_trace(duration, calls, min_trace_calls);
        let mut discard = shared.is_none();
        let mut attached = false;

        if let Some(parent_idx) = self.ancestors.len().checked_sub(1) {
            let retain = parent_in_trace
                && (duration > min_method_time
                    || errors > 0
                    || frame_flags.contains(NodeFlags::FORCE)
                    || trace_flags.contains(MarkerFlags::ALL_METHODS));

            if parent_in_trace && frame_flags.contains(NodeFlags::OVERFLOW) {
                if let Some(marker) = self.enclosing_marker_mut() {
                    marker.mark_flags(MarkerFlags::OVERFLOW);
                }
            } else if retain {
                self.reparent(shared.take(), trace_flags, min_method_time);
                attached = true;
            }
            if retain {
                discard = false;
            }

            let parent = &mut self.ancestors[parent_idx];
            parent.calls += calls;
            parent.errors += errors;
        }

        if discard {
            self.node_count = self.node_count.saturating_sub(size);
            self.pool.clean_in_place(&mut self.top);
        } else {
            if !attached {
                self.node_count = self.node_count.saturating_sub(size);
            }
            let next = match self.ancestors.pop() {
                Some(parent) => parent,
                None => self.pool.acquire(),
            };
            let old = mem::replace(&mut self.top, next);
            if old.is_busy() {
                self.pool.release(old);
            }
        }

        if !parent_in_trace {
            self.node_count = 0;
        }
    }

    /// Clear an error that merely passed through from the last child, or
    /// note that it wraps the child's error.
    fn dedup_exception(&mut self) {
        let top = &mut self.top;
        let Some(own) = top.exception.as_ref() else {
            return;
        };
        let inner = top.last_child().and_then(TraceNode::find_exception);

        if same_exception(Some(own), inner) {
            top.exception = None;
            top.mark_flags(NodeFlags::EXCEPTION_PASS);
        } else if inner.is_some_and(|inner| own.is_caused_by(inner)) {
            top.mark_flags(NodeFlags::EXCEPTION_WRAP);
        }
    }

    /// Submission decision for a closing trace root. Returns the submitted
    /// tree; `top` is left empty in that case.
    fn close_trace(&mut self, duration: u64, calls: u64, min_trace_calls: u64) -> Option<Arc<TraceNode>> {
        let has_error = self.top.exception.is_some() || self.top.has_flag(NodeFlags::EXCEPTION_PASS);
        let marker = self.top.marker.as_deref_mut()?;

        let submit = marker.should_submit(duration, calls, min_trace_calls);
        if submit && has_error {
            marker.mark_flags(MarkerFlags::ERROR_MARK);
        }
        let trace_id = marker.trace_id;
        let flags = marker.flags;

        if let Some(outer) = self.ancestors.iter_mut().rev().find_map(|n| n.marker.as_deref_mut()) {
            outer.inherit_flags(flags);
        }

        if !submit {
            self.core.record_dropped();
            trace!(trace_id, duration, calls, "trace dropped");
            return None;
        }

        let tree = Arc::new(mem::take(&mut self.top));
        self.core.submit(Arc::clone(&tree));
        Some(tree)
    }

    /// Attach the closing frame to its parent, eliding it in favour of its
    /// only child when the trace asks for it and the frame adds little time.
    fn reparent(&mut self, shared: Option<Arc<TraceNode>>, trace_flags: MarkerFlags, min_method_time: u64) {
        let Some(parent) = self.ancestors.last_mut() else {
            return;
        };

        if let Some(tree) = shared {
            parent.add_child(tree);
            return;
        }

        let top = &self.top;
        let elide = trace_flags.contains(MarkerFlags::DROP_INTERIM)
            && top.is_interim_droppable()
            && top.last_child().is_some_and(|child| {
                !child.is_trace_root() && top.duration.saturating_sub(child.duration) < min_method_time
            });

        if !elide {
            parent.add_child(Arc::new(mem::take(&mut self.top)));
            return;
        }

        let mut frame = mem::take(&mut self.top);
        if let Some(mut child) = frame.children.pop() {
            let promoted = Arc::make_mut(&mut child);
            promoted.calls = frame.calls;
            promoted.errors = frame.errors;
            promoted.mark_flags(NodeFlags::DROPPED_PARENT);
            parent.add_child(child);
        }
        self.pool.release(frame);
        self.node_count = self.node_count.saturating_sub(1);
    }

    /// Attach an attribute to the first open frame matching `target`.
    pub fn attr(&mut self, target: TraceTarget, attr_id: SymbolId, value: impl Into<AttrValue>) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.set_attr(target, attr_id, value.into()) {
            warn!(attr_id, ?target, error = %e, "attribute dropped");
        }
    }

    fn set_attr(&mut self, target: TraceTarget, attr_id: SymbolId, value: AttrValue) -> Result<()> {
        let frame = self
            .frames_mut()
            .find(|f| target.matches(f))
            .ok_or(TracerError::NoMatchingFrame)?;
        frame.set_attr(attr_id, value);
        Ok(())
    }

    /// Change the submission threshold of the innermost trace.
    pub fn set_minimum_trace_time(&mut self, nanos: u64) {
        if !self.enabled {
            return;
        }
        if let Some(marker) = self.nearest_marker_mut() {
            marker.minimum_time = nanos;
        }
    }

    /// Set flags on the innermost trace, or the innermost one named `trace_id`.
    pub fn mark_trace_flags(&mut self, trace_id: Option<SymbolId>, flags: MarkerFlags) {
        if !self.enabled {
            return;
        }
        let marker = self
            .markers_mut()
            .find(|m| trace_id.map_or(true, |id| m.trace_id == id));
        if let Some(marker) = marker {
            marker.mark_flags(flags);
        }
    }

    /// Set flags on the logical top frame.
    pub fn mark_frame_flags(&mut self, flags: NodeFlags) {
        if !self.enabled {
            return;
        }
        if let Some(frame) = self.frames_mut().next() {
            frame.mark_flags(flags);
        }
    }

    /// Attach distributed-trace correlation to the innermost trace.
    pub fn set_dtrace(&mut self, ctx: DTraceContext) -> bool {
        if !self.enabled {
            return false;
        }
        match self.nearest_marker_mut() {
            Some(marker) => {
                marker.dtrace = Some(ctx);
                true
            }
            None => false,
        }
    }

    /// Whether a trace named `trace_id` is open on this thread.
    pub fn is_in_trace(&self, trace_id: SymbolId) -> bool {
        self.enabled && self.markers().any(|m| m.trace_id == trace_id)
    }

    /// Whether any trace is open on this thread.
    pub fn in_any_trace(&self) -> bool {
        self.enabled && self.nearest_marker().is_some()
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Innermost frame slot (possibly a clean placeholder).
    pub fn top(&self) -> &TraceNode {
        &self.top
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.ancestors.len() + usize::from(self.top.is_busy())
    }

    pub(crate) fn core(&self) -> &EngineCore {
        &self.core
    }

    /// Live nodes of the current trace, as counted against the node budget.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn is_placeholder_top(&self) -> bool {
        !self.top.is_busy() && !self.ancestors.is_empty() && self.top.marker.is_none()
    }

    /// Open frames from the logical top outwards.
    fn frames_mut(&mut self) -> impl Iterator<Item = &mut TraceNode> + '_ {
        let skip_top = self.is_placeholder_top();
        std::iter::once(&mut self.top)
            .filter(move |_| !skip_top)
            .chain(self.ancestors.iter_mut().rev())
    }

    fn markers(&self) -> impl Iterator<Item = &TraceMarker> + '_ {
        std::iter::once(&self.top)
            .chain(self.ancestors.iter().rev())
            .filter_map(|n| n.marker.as_deref())
    }

    fn markers_mut(&mut self) -> impl Iterator<Item = &mut TraceMarker> + '_ {
        std::iter::once(&mut self.top)
            .chain(self.ancestors.iter_mut().rev())
            .filter_map(|n| n.marker.as_deref_mut())
    }

    fn nearest_marker(&self) -> Option<&TraceMarker> {
        self.markers().next()
    }

    fn nearest_marker_mut(&mut self) -> Option<&mut TraceMarker> {
        self.markers_mut().next()
    }

    /// Nearest marker strictly below the top frame.
    fn enclosing_marker_mut(&mut self) -> Option<&mut TraceMarker> {
        self.ancestors
            .iter_mut()
            .rev()
            .find_map(|n| n.marker.as_deref_mut())
    }

    fn traces_calls(&self) -> bool {
        tracing::enabled!(Level::TRACE)
            && self
                .nearest_marker()
                .is_some_and(|m| m.has_flag(MarkerFlags::TRACE_CALLS))
    }
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("depth", &self.depth())
            .field("node_count", &self.node_count)
            .field("enabled", &self.enabled)
            .finish()
    }
}
