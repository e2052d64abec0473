//! Round-trip latency and clock drift from Ping/Pong exchanges

use tracing::debug;

/// Latency and clock drift estimate for one peer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyTracker {
    latency: f64,
    clock_drift: f64,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-way latency in seconds
    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// Peer clock minus our clock. Positive when the peer is ahead.
    pub fn clock_drift(&self) -> f64 {
        self.clock_drift
    }

    /// Record a `Pong(start_time, _)` which the peer stamped with `peer_time`.
    ///
    /// `start_time` is our own clock when the matching ping left, so half the
    /// round trip is the one-way latency.
    pub fn record_pong(&mut self, now: f64, start_time: f64, peer_time: f64) {
        self.latency = (now - start_time) / 2.0;
        self.clock_drift = peer_time - (now - self.latency);
        debug!(
            latency = self.latency,
            clock_drift = self.clock_drift,
            "Pong recorded"
        );
    }

    /// Translate a peer timestamp into our time axis.
    ///
    /// Drift is measured but not applied yet: the result is `peer_time`
    /// unchanged.
    pub fn client_time_to_server(&self, peer_time: f64) -> f64 {
        peer_time
    }
}
