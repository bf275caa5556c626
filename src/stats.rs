//! Connection-manager counters.
//!
//! Counter names are stable and exposed to the host proxy. Values are
//! always readable in-process (tests assert on them); when the optional
//! `metrics` Cargo feature is enabled every increment is additionally
//! recorded through the [`metrics`](https://docs.rs/metrics) crate under
//! the same name.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A named, cheaply cloneable counter.
#[derive(Clone, Debug)]
pub struct Counter {
    name: &'static str,
    value: Arc<AtomicU64>,
}

impl Counter {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The counter's stable name.
    #[must_use]
    pub fn name(&self) -> &'static str { self.name }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::counter!(self.name).increment(1);
    }

    /// The current value.
    #[must_use]
    pub fn get(&self) -> u64 { self.value.load(Ordering::Relaxed) }
}

/// The counter set maintained by a connection manager.
///
/// Clones share the underlying values, so a handle kept by the host keeps
/// observing increments made by the connection.
#[derive(Clone, Debug)]
pub struct ProxyStats {
    pub request: Counter,
    pub request_call: Counter,
    pub request_oneway: Counter,
    pub request_invalid_type: Counter,
    pub request_decoding_error: Counter,
    pub response: Counter,
    pub response_reply: Counter,
    pub response_success: Counter,
    pub response_error: Counter,
    pub response_exception: Counter,
    pub response_invalid_type: Counter,
    pub response_decoding_error: Counter,
    pub cx_destroy_local_with_active_rq: Counter,
    pub cx_destroy_remote_with_active_rq: Counter,
}

impl ProxyStats {
    /// Create a fresh, zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request: Counter::new("request"),
            request_call: Counter::new("request_call"),
            request_oneway: Counter::new("request_oneway"),
            request_invalid_type: Counter::new("request_invalid_type"),
            request_decoding_error: Counter::new("request_decoding_error"),
            response: Counter::new("response"),
            response_reply: Counter::new("response_reply"),
            response_success: Counter::new("response_success"),
            response_error: Counter::new("response_error"),
            response_exception: Counter::new("response_exception"),
            response_invalid_type: Counter::new("response_invalid_type"),
            response_decoding_error: Counter::new("response_decoding_error"),
            cx_destroy_local_with_active_rq: Counter::new("cx_destroy_local_with_active_rq"),
            cx_destroy_remote_with_active_rq: Counter::new("cx_destroy_remote_with_active_rq"),
        }
    }
}

impl Default for ProxyStats {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_values() {
        let stats = ProxyStats::new();
        let handle = stats.clone();
        stats.request.inc();
        stats.request.inc();
        assert_eq!(handle.request.get(), 2);
        assert_eq!(handle.request_call.get(), 0);
    }

    #[test]
    fn names_are_stable() {
        let stats = ProxyStats::new();
        assert_eq!(stats.request.name(), "request");
        assert_eq!(
            stats.cx_destroy_remote_with_active_rq.name(),
            "cx_destroy_remote_with_active_rq"
        );
    }
}
