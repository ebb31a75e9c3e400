use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

/// Counters and keep-alive RTT distribution for one client, kept across reconnects.
#[derive(Debug)]
pub struct ConnectionHealth {
    session_started: Instant,
    last_message_received: Instant,
    message_count: u64,
    error_count: u64,
    reconnect_count: u64,
    rtt_histogram: Option<Histogram<u64>>,
}

/// Read-only view produced by [`ConnectionHealth::snapshot`].
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub uptime: Duration,
    pub messages: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub last_message_age: Duration,
    pub p50_rtt_us: u64,
    pub p99_rtt_us: u64,
    pub rtt_samples: u64,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            session_started: now,
            last_message_received: now,
            message_count: 0,
            error_count: 0,
            reconnect_count: 0,
            // Bounds are constant and valid; `None` only disables RTT percentiles.
            rtt_histogram: Histogram::new_with_bounds(1, 60_000_000, 3).ok(),
        }
    }

    /// A new session opened.
    pub fn reset_session(&mut self) {
        let now = Instant::now();
        self.session_started = now;
        self.last_message_received = now;
    }

    pub fn record_message(&mut self) {
        self.last_message_received = Instant::now();
        self.message_count = self.message_count.saturating_add(1);
    }

    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().clamp(1, u64::MAX as u128) as u64;
        if let Some(hist) = self.rtt_histogram.as_mut() {
            let _ = hist.record(micros);
        }
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnect_count = self.reconnect_count.saturating_add(1);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let (samples, p50, p99) = match self.rtt_histogram.as_ref() {
            Some(hist) if !hist.is_empty() => (
                hist.len(),
                hist.value_at_percentile(50.0),
                hist.value_at_percentile(99.0),
            ),
            _ => (0, 0, 0),
        };

        HealthSnapshot {
            uptime: self.session_started.elapsed(),
            messages: self.message_count,
            errors: self.error_count,
            reconnects: self.reconnect_count,
            last_message_age: self.last_message_received.elapsed(),
            p50_rtt_us: p50,
            p99_rtt_us: p99,
            rtt_samples: samples,
        }
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_rtt_percentiles() {
        let mut health = ConnectionHealth::new();
        health.record_rtt(Duration::from_micros(100));
        health.record_rtt(Duration::from_micros(200));
        health.record_rtt(Duration::from_micros(300));

        let snap = health.snapshot();
        assert_eq!(snap.rtt_samples, 3);
        assert_eq!(snap.p50_rtt_us, 200);
        assert_eq!(snap.p99_rtt_us, 300);
    }

    #[test]
    fn counters_saturate_and_survive_session_reset() {
        let mut health = ConnectionHealth::new();
        health.record_message();
        health.record_error();
        health.increment_reconnect();
        health.reset_session();

        let snap = health.snapshot();
        assert_eq!(snap.messages, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.rtt_samples, 0);
    }
}
