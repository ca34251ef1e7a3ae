//! Trace nodes
//!
//! One [`TraceNode`] holds the state of one call frame. While a frame is
//! open it lives on its assembler's frame stack, so its parent is simply
//! the stack slot below it; once closed it is either recycled or moved into
//! its parent's `children`, where it is held behind an `Arc` and never
//! mutated in place again.

use crate::exception::ExceptionRef;
use crate::flags::NodeFlags;
use crate::marker::TraceMarker;
use crate::symbol::{symbol_name, SymbolId, SymbolResolver};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;

/// Attribute value attached to a frame by instrumentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

/// One call frame of an assembled call tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceNode {
    pub class_id: SymbolId,
    pub method_id: SymbolId,
    pub signature_id: SymbolId,
    /// Monotonic entry timestamp (ns); `None` until the frame is entered
    pub start_time: Option<u64>,
    /// Valid once the frame has closed
    pub duration: u64,
    /// Calls of this frame plus everything merged beneath it
    pub calls: u64,
    pub errors: u64,
    pub flags: NodeFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(SymbolId, AttrValue)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Arc<TraceNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<Box<TraceMarker>>,
}

impl TraceNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every field so the node can back an unrelated future frame.
    ///
    /// Attribute and child storage keep their capacity but no content.
    pub fn clean(&mut self) {
        self.class_id = 0;
        self.method_id = 0;
        self.signature_id = 0;
        self.start_time = None;
        self.duration = 0;
        self.calls = 0;
        self.errors = 0;
        self.flags = NodeFlags::empty();
        self.exception = None;
        self.attributes.clear();
        self.children.clear();
        self.marker = None;
    }

    /// Frame has been entered and not yet closed.
    pub fn is_busy(&self) -> bool {
        self.start_time.is_some()
    }

    /// Frame opened a named trace.
    pub fn is_trace_root(&self) -> bool {
        self.marker.is_some()
    }

    pub fn has_flag(&self, flag: NodeFlags) -> bool {
        self.flags.intersects(flag)
    }

    pub fn mark_flags(&mut self, flags: NodeFlags) {
        self.flags |= flags;
    }

    /// Trace name, or 0 if this frame did not open a trace.
    pub fn trace_id(&self) -> SymbolId {
        self.marker.as_ref().map_or(0, |m| m.trace_id)
    }

    /// Wall clock of trace start, or 0 if this frame did not open a trace.
    pub fn clock(&self) -> u64 {
        self.marker.as_ref().map_or(0, |m| m.clock)
    }

    /// Set an attribute, replacing an earlier value with the same id.
    pub fn set_attr(&mut self, attr_id: SymbolId, value: AttrValue) {
        match self.attributes.iter_mut().find(|(id, _)| *id == attr_id) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((attr_id, value)),
        }
    }

    pub fn attr(&self, attr_id: SymbolId) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|(id, _)| *id == attr_id)
            .map(|(_, v)| v)
    }

    pub fn add_child(&mut self, child: Arc<TraceNode>) {
        self.children.push(child);
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, index: usize) -> Option<&TraceNode> {
        self.children.get(index).map(|c| c.as_ref())
    }

    pub fn last_child(&self) -> Option<&TraceNode> {
        self.children.last().map(|c| c.as_ref())
    }

    /// A frame that may be skipped in favour of its only child.
    pub fn is_interim_droppable(&self) -> bool {
        self.exception.is_none()
            && self.attributes.is_empty()
            && !self.has_flag(NodeFlags::BEGIN)
            && self.children.len() == 1
    }

    /// Locate the error raised from this frame, following frames that only
    /// passed their last child's error through.
    pub fn find_exception(&self) -> Option<&ExceptionRef> {
        if let Some(e) = &self.exception {
            return Some(e);
        }
        if self.has_flag(NodeFlags::EXCEPTION_PASS) {
            return self.last_child().and_then(TraceNode::find_exception);
        }
        None
    }

    /// Total number of frames in this subtree, this one included.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_size()).sum::<usize>()
    }

    /// Human-readable indented rendering of the subtree.
    pub fn render(&self, symbols: &dyn SymbolResolver) -> String {
        let mut out = String::new();
        self.render_into(symbols, 0, &mut out);
        out
    }

    fn render_into(&self, symbols: &dyn SymbolResolver, depth: usize, out: &mut String) {
        let _ = write!(
            out,
            "{:indent$}{:.3}ms calls={} errors={} {}.{}",
            "",
            self.duration as f64 / 1_000_000.0,
            self.calls,
            self.errors,
            symbol_name(symbols, self.class_id),
            symbol_name(symbols, self.method_id),
            indent = depth * 2
        );
        if let Some(marker) = &self.marker {
            let _ = write!(out, " <{}>", symbol_name(symbols, marker.trace_id));
        }
        if !self.flags.is_empty() {
            let _ = write!(out, " {:?}", self.flags);
        }
        if let Some(e) = &self.exception {
            let _ = write!(out, " !{}: {}", symbol_name(symbols, e.class_id), e.message);
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(symbols, depth + 1, out);
        }
    }
}
