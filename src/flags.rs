//! Frame and trace flag sets

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Flags carried by a single frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct NodeFlags: u32 {
        /// Frame was entered after the trace exhausted its node budget
        const OVERFLOW = 1 << 0;
        /// Frame opened a named trace (carries a marker)
        const BEGIN = 1 << 1;
        /// Error was propagated unchanged from the last child
        const EXCEPTION_PASS = 1 << 2;
        /// Error wraps the last child's error as its cause
        const EXCEPTION_WRAP = 1 << 3;
        /// Frame absorbed the statistics of an elided parent
        const DROPPED_PARENT = 1 << 4;
        /// Frame is kept regardless of its duration
        const FORCE = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Flags carried by a trace marker.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MarkerFlags: u32 {
        /// Some frames of this trace were dropped over the node budget
        const OVERFLOW = 1 << 0;
        /// Always submit the trace
        const SUBMIT = 1 << 1;
        /// Keep every frame of the trace regardless of duration
        const ALL_METHODS = 1 << 2;
        /// Elide interim frames adding negligible time over their only child
        const DROP_INTERIM = 1 << 3;
        /// Log every call of the trace at trace level
        const TRACE_CALLS = 1 << 4;
        /// Never submit the trace
        const DROP = 1 << 5;
        /// Trace ended with (or contains) an error
        const ERROR_MARK = 1 << 12;
    }
}

impl MarkerFlags {
    /// Flags a closing nested trace hands over to the enclosing one.
    pub const INHERITABLE: MarkerFlags = MarkerFlags::OVERFLOW.union(MarkerFlags::ERROR_MARK);
}
