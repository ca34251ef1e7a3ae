//! Distributed trace correlation
//!
//! A trace marker may carry the W3C Trace Context of the request it belongs
//! to, so that call trees assembled in this process can be joined with spans
//! recorded by other services.
//!
//! Format: version-trace_id-span_id-trace_flags
//! Example: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Correlation ids of one span of a distributed trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DTraceContext {
    pub trace_id: [u8; 16], // 128-bit trace ID
    pub span_id: [u8; 8],   // 64-bit span ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<[u8; 8]>,
    pub trace_flags: u8, // 01 = sampled
}

/// traceparent parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DTraceError {
    #[error("Invalid traceparent format (expected: version-trace_id-span_id-flags)")]
    InvalidFormat,
    #[error("Invalid version (must be 00)")]
    InvalidVersion,
    #[error("Invalid trace_id (must be 32 hex characters)")]
    InvalidTraceId,
    #[error("Invalid span_id (must be 16 hex characters)")]
    InvalidSpanId,
    #[error("Invalid trace_flags (must be 2 hex characters)")]
    InvalidTraceFlags,
    #[error("Trace ID cannot be all zeros")]
    AllZeroTraceId,
    #[error("Span ID cannot be all zeros")]
    AllZeroSpanId,
}

impl DTraceContext {
    /// Start a new sampled distributed trace with random ids.
    pub fn new_root() -> Self {
        let mut rng = rand::thread_rng();
        DTraceContext {
            trace_id: nonzero_bytes(&mut rng),
            span_id: nonzero_bytes(&mut rng),
            parent_span_id: None,
            trace_flags: 0x01,
        }
    }

    /// Parse a W3C `traceparent` header received from a caller.
    ///
    /// The caller's span id becomes `span_id`; use [`DTraceContext::child`]
    /// to derive the span recorded locally.
    pub fn parse(traceparent: &str) -> Result<Self, DTraceError> {
        let parts: Vec<&str> = traceparent.trim().split('-').collect();
        if parts.len() != 4 {
            return Err(DTraceError::InvalidFormat);
        }

        if parts[0].len() != 2 || !is_lower_hex(parts[0]) {
            return Err(DTraceError::InvalidVersion);
        }
        let version = u8::from_str_radix(parts[0], 16).map_err(|_| DTraceError::InvalidVersion)?;
        if version != 0 {
            return Err(DTraceError::InvalidVersion);
        }

        let mut trace_id = [0u8; 16];
        if parts[1].len() != 32
            || !is_lower_hex(parts[1])
            || hex::decode_to_slice(parts[1], &mut trace_id).is_err()
        {
            return Err(DTraceError::InvalidTraceId);
        }
        if trace_id.iter().all(|&b| b == 0) {
            return Err(DTraceError::AllZeroTraceId);
        }

        let mut span_id = [0u8; 8];
        if parts[2].len() != 16
            || !is_lower_hex(parts[2])
            || hex::decode_to_slice(parts[2], &mut span_id).is_err()
        {
            return Err(DTraceError::InvalidSpanId);
        }
        if span_id.iter().all(|&b| b == 0) {
            return Err(DTraceError::AllZeroSpanId);
        }

        if parts[3].len() != 2 || !is_lower_hex(parts[3]) {
            return Err(DTraceError::InvalidTraceFlags);
        }
        let trace_flags =
            u8::from_str_radix(parts[3], 16).map_err(|_| DTraceError::InvalidTraceFlags)?;

        Ok(DTraceContext {
            trace_id,
            span_id,
            parent_span_id: None,
            trace_flags,
        })
    }

    /// Derive a child span of this one (same trace, fresh span id).
    pub fn child(&self) -> Self {
        let mut rng = rand::thread_rng();
        DTraceContext {
            trace_id: self.trace_id,
            span_id: nonzero_bytes(&mut rng),
            parent_span_id: Some(self.span_id),
            trace_flags: self.trace_flags,
        }
    }

    /// Check if trace is sampled (trace_flags & 0x01)
    pub fn is_sampled(&self) -> bool {
        self.trace_flags & 0x01 != 0
    }

    pub fn trace_id_hex(&self) -> String {
        hex::encode(self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        hex::encode(self.span_id)
    }
}

impl fmt::Display for DTraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "00-{}-{}-{:02x}",
            hex::encode(self.trace_id),
            hex::encode(self.span_id),
            self.trace_flags
        )
    }
}

fn is_lower_hex(field: &str) -> bool {
    field
        .bytes()
        .all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

fn nonzero_bytes<const N: usize>(rng: &mut impl Rng) -> [u8; N] {
    let mut bytes = [0u8; N];
    loop {
        rng.fill(&mut bytes[..]);
        if bytes.iter().any(|&b| b != 0) {
            return bytes;
        }
    }
}
