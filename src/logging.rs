//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the embedding process (or to tests) through [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to `default_directive`
///
/// Safe to call more than once: later calls leave the first subscriber in place
/// and return `false`.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("debug");
        assert!(!init_tracing("info"));
    }
}
