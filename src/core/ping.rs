use std::time::{Duration, Instant};

/// Keep-alive bookkeeping for one session.
///
/// The engine sends a ping every `interval`; any inbound unit counts as proof of life. The link
/// is considered dead once nothing has arrived for `interval + timeout`.
#[derive(Debug)]
pub struct KeepAlive {
    interval: Duration,
    timeout: Duration,
    last_ping: Option<Instant>,
    last_activity: Instant,
}

impl KeepAlive {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_ping: None,
            last_activity: Instant::now(),
        }
    }

    /// Start tracking a fresh session with (possibly server-supplied) timings.
    pub fn reset(&mut self, interval: Duration, timeout: Duration) {
        self.interval = interval;
        self.timeout = timeout;
        self.last_ping = None;
        self.last_activity = Instant::now();
    }

    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn record_ping_sent(&mut self) {
        self.last_ping = Some(Instant::now());
    }

    /// Pong received; returns the round-trip time of the latest ping, if one is outstanding.
    pub fn record_pong(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.last_activity = now;
        self.last_ping
            .take()
            .map(|sent| now.saturating_duration_since(sent))
    }

    pub fn liveness_window(&self) -> Duration {
        self.interval.saturating_add(self.timeout)
    }

    pub fn is_stale(&self) -> bool {
        self.last_activity.elapsed() > self.liveness_window()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_reports_rtt_only_for_outstanding_ping() {
        let mut ka = KeepAlive::new(Duration::from_secs(5), Duration::from_secs(10));
        assert!(ka.record_pong().is_none());

        ka.record_ping_sent();
        assert!(ka.record_pong().is_some());
        assert!(ka.record_pong().is_none());
    }

    #[test]
    fn silence_past_the_window_is_stale() {
        let mut ka = KeepAlive::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(!ka.is_stale());

        ka.last_activity = Instant::now() - Duration::from_secs(3);
        assert!(ka.is_stale());

        ka.record_activity();
        assert!(!ka.is_stale());

        ka.last_activity = Instant::now() - Duration::from_secs(3);
        ka.reset(Duration::from_secs(10), Duration::from_secs(10));
        assert!(!ka.is_stale());
        assert_eq!(ka.liveness_window(), Duration::from_secs(20));
    }
}
