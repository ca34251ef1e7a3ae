//! Trace markers
//!
//! A marker is attached to the frame that opened a named trace. It decides,
//! when that frame closes, whether the assembled subtree is submitted.

use crate::dtrace::DTraceContext;
use crate::flags::MarkerFlags;
use crate::symbol::SymbolId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMarker {
    /// Trace name
    pub trace_id: SymbolId,
    /// Wall clock at trace start
    pub clock: u64,
    /// Minimum trace duration (ns) required for submission
    pub minimum_time: u64,
    pub flags: MarkerFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtrace: Option<DTraceContext>,
}

impl TraceMarker {
    /// Marker of a top-level trace.
    pub fn new(trace_id: SymbolId, clock: u64, minimum_time: u64) -> Self {
        TraceMarker {
            trace_id,
            clock,
            minimum_time,
            flags: MarkerFlags::empty(),
            dtrace: None,
        }
    }

    /// Marker of a trace nested inside `enclosing`: threshold and flags are
    /// inherited, correlation ids are not.
    pub fn nested(trace_id: SymbolId, clock: u64, enclosing: &TraceMarker) -> Self {
        TraceMarker {
            trace_id,
            clock,
            minimum_time: enclosing.minimum_time,
            flags: enclosing.flags,
            dtrace: None,
        }
    }

    pub fn has_flag(&self, flag: MarkerFlags) -> bool {
        self.flags.intersects(flag)
    }

    pub fn mark_flags(&mut self, flags: MarkerFlags) {
        self.flags |= flags;
    }

    /// Take over the inheritable flags of a closing nested trace.
    pub fn inherit_flags(&mut self, nested: MarkerFlags) {
        self.flags |= nested & MarkerFlags::INHERITABLE;
    }

    /// Submission decision for a trace whose root frame just closed.
    pub fn should_submit(&self, duration: u64, calls: u64, min_trace_calls: u64) -> bool {
        if self.flags.contains(MarkerFlags::SUBMIT) {
            return true;
        }
        (duration >= self.minimum_time || calls >= min_trace_calls)
            && !self.flags.contains(MarkerFlags::DROP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_marker_inherits_threshold_and_flags() {
        let mut outer = TraceMarker::new(1, 100, 5_000);
        outer.mark_flags(MarkerFlags::ALL_METHODS);
        outer.dtrace = Some(DTraceContext::new_root());

        let inner = TraceMarker::nested(2, 200, &outer);
        assert_eq!(inner.trace_id, 2);
        assert_eq!(inner.minimum_time, 5_000);
        assert!(inner.has_flag(MarkerFlags::ALL_METHODS));
        assert!(inner.dtrace.is_none());
    }

    #[test]
    fn test_submission_criteria() {
        let mut marker = TraceMarker::new(1, 0, 1_000);
        assert!(marker.should_submit(1_000, 1, 100));
        assert!(!marker.should_submit(999, 1, 100));
        assert!(marker.should_submit(10, 100, 100));

        marker.mark_flags(MarkerFlags::DROP);
        assert!(!marker.should_submit(5_000, 1, 100));

        marker.mark_flags(MarkerFlags::SUBMIT);
        assert!(marker.should_submit(0, 0, 100));
    }

    #[test]
    fn test_inherit_only_inheritable_flags() {
        let mut outer = TraceMarker::new(1, 0, 0);
        outer.inherit_flags(MarkerFlags::OVERFLOW | MarkerFlags::DROP | MarkerFlags::ERROR_MARK);
        assert_eq!(outer.flags, MarkerFlags::OVERFLOW | MarkerFlags::ERROR_MARK);
    }
}
