//! Diagnostic log output
//!
//! The library only emits `tracing` events. Hosts that have no subscriber of
//! their own can install a stderr one here.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber; with `debug` every level down to TRACE is
/// shown, including per-call events of traces marked `TRACE_CALLS`.
///
/// Filtering honours `RUST_LOG`. Does nothing if a global subscriber is
/// already set.
pub fn init(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    let _ = install(filter);
}

/// Install a stderr subscriber with an explicit filter directive string
/// (e.g. `"calltrace=debug"`). Returns false if the directive is invalid
/// or a global subscriber is already set.
pub fn try_init(directives: &str) -> bool {
    match EnvFilter::try_new(directives) {
        Ok(filter) => install(filter),
        Err(_) => false,
    }
}

fn install(filter: EnvFilter) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
