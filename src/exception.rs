//! Captured error summaries
//!
//! Instrumentation converts an application error into an [`ErrorSummary`]
//! when it reports an `error` event. The engine never looks inside it except
//! to compare handles by identity and to follow the cause chain, so the
//! handle is an `Arc` and identity is pointer identity.

use crate::symbol::SymbolId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared handle to a captured error.
pub type ExceptionRef = Arc<ErrorSummary>;

/// One symbolic stack frame of a captured error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub class_id: SymbolId,
    pub method_id: SymbolId,
    pub file_id: SymbolId,
    pub line: u32,
}

/// Symbolic snapshot of an application error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Error type name
    pub class_id: SymbolId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<ExceptionRef>,
}

impl ErrorSummary {
    pub fn new(class_id: SymbolId, message: impl Into<String>) -> Self {
        ErrorSummary {
            class_id,
            message: message.into(),
            stack: Vec::new(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ExceptionRef) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.stack = stack;
        self
    }

    /// Wrap into a shareable handle.
    pub fn into_ref(self) -> ExceptionRef {
        Arc::new(self)
    }

    /// True if `other` is the direct cause of this error (by identity).
    pub fn is_caused_by(&self, other: &ExceptionRef) -> bool {
        self.cause
            .as_ref()
            .map_or(false, |cause| Arc::ptr_eq(cause, other))
    }

    /// Iterate over the cause chain, nearest cause first.
    pub fn causes(&self) -> impl Iterator<Item = &ErrorSummary> {
        std::iter::successors(self.cause.as_deref(), |e| e.cause.as_deref())
    }
}

/// Identity comparison of two optional handles.
pub fn same_exception(a: Option<&ExceptionRef>, b: Option<&ExceptionRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_equality() {
        let a = ErrorSummary::new(1, "boom").into_ref();
        let b = ErrorSummary::new(1, "boom").into_ref();
        assert!(same_exception(Some(&a), Some(&a.clone())));
        assert!(!same_exception(Some(&a), Some(&b)));
        assert!(!same_exception(None, Some(&b)));
    }

    #[test]
    fn test_cause_chain() {
        let root = ErrorSummary::new(1, "io").into_ref();
        let mid = ErrorSummary::new(2, "parse").with_cause(root.clone()).into_ref();
        let top = ErrorSummary::new(3, "request").with_cause(mid.clone());

        assert!(top.is_caused_by(&mid));
        assert!(!top.is_caused_by(&root));

        let chain: Vec<SymbolId> = top.causes().map(|e| e.class_id).collect();
        assert_eq!(chain, vec![2, 1]);
    }

    #[test]
    fn test_serialize_skips_empty_stack() {
        let err = ErrorSummary::new(5, "oops");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("stack"));
        assert!(!json.contains("cause"));
    }
}
