//! Error types
//!
//! Event handling never surfaces these to instrumented code: the assembler
//! logs them and carries on. They exist so internal steps can use `?` and so
//! configuration loading has something precise to report.

use crate::symbol::SymbolId;
use std::path::PathBuf;
use thiserror::Error;

/// Protocol misuse detected while assembling a trace
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TracerError {
    #[error("trace marker already set on current frame (existing trace {existing}, requested {requested})")]
    MarkerAlreadySet {
        existing: SymbolId,
        requested: SymbolId,
    },

    #[error("return/error event without an open frame")]
    NoOpenFrame,

    #[error("no open frame matches the requested target")]
    NoMatchingFrame,
}

/// Errors loading or validating tracer configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, TracerError>;
