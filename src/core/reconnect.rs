use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::SmallRng};

type DelayFn = dyn Fn(u32) -> Duration + Send + Sync;

/// Stateless retry policy: how many attempts, and how long to wait before each one.
///
/// Attempt numbers start at 1.
#[derive(Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Arc<DelayFn>,
    jitter: bool,
}

impl ReconnectPolicy {
    pub fn custom(
        max_attempts: u32,
        delay: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts,
            delay: Arc::new(delay),
            jitter: false,
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self::custom(max_attempts, move |_| delay)
    }

    /// `base * factor^(attempt-1)`, capped at `max`.
    pub fn exponential(base: Duration, max: Duration, factor: f64, max_attempts: u32) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            1.5
        };
        Self::custom(max_attempts, move |attempt| {
            let exp = attempt.saturating_sub(1).min(64) as i32;
            let secs = base.as_secs_f64() * factor.powi(exp);
            if secs >= max.as_secs_f64() {
                max
            } else {
                Duration::from_secs_f64(secs)
            }
        })
    }

    /// Never reconnect automatically.
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO, 0)
    }

    /// Scale every computed delay by a uniform factor in `[0.5, 1.0]`.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = (self.delay)(attempt);
        if self.jitter {
            jitter_delay(delay)
        } else {
            delay
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3), 5)
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("first_delay", &(self.delay)(1))
            .field("jitter", &self.jitter)
            .finish()
    }
}

pub fn jitter_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }

    let mut rng = SmallRng::from_entropy();
    let jitter: f64 = rng.gen_range(0.5..=1.0);
    let nanos = (base.as_nanos() as f64 * jitter) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Idle,
    Retrying,
    Exhausted,
}

/// What the engine should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then start attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Give up; `attempts` were made.
    Exhausted { attempts: u32 },
    /// Not retrying (no automatic reconnection is in progress).
    Ignore,
}

/// Mutable half of reconnection: the state machine and attempt counter.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    state: ReconnectState,
    attempts: u32,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_retrying(&self) -> bool {
        self.state == ReconnectState::Retrying
    }

    /// An Open session failed unexpectedly.
    pub fn on_connection_lost(&mut self) -> ReconnectDecision {
        if self.state != ReconnectState::Idle {
            return ReconnectDecision::Ignore;
        }
        self.attempts = 0;
        self.state = ReconnectState::Retrying;
        self.next()
    }

    /// The attempt started by [`Self::begin_attempt`] failed to open.
    pub fn on_attempt_failed(&mut self) -> ReconnectDecision {
        if self.state != ReconnectState::Retrying {
            return ReconnectDecision::Ignore;
        }
        self.next()
    }

    /// Count a new attempt; returns its number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// A session opened: back to Idle with a fresh counter.
    pub fn on_connected(&mut self) {
        self.reset();
    }

    /// Explicit caller action (connect or disconnect) forces Idle.
    pub fn reset(&mut self) {
        self.state = ReconnectState::Idle;
        self.attempts = 0;
    }

    fn next(&mut self) -> ReconnectDecision {
        if self.attempts < self.policy.max_attempts() {
            let attempt = self.attempts + 1;
            ReconnectDecision::Retry {
                attempt,
                delay: self.policy.delay(attempt),
            }
        } else {
            self.state = ReconnectState::Exhausted;
            ReconnectDecision::Exhausted {
                attempts: self.attempts,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_failed_attempts_exhaust_a_three_attempt_policy() {
        let mut ctl = ReconnectController::new(ReconnectPolicy::fixed(Duration::from_millis(5), 3));
        let mut started = Vec::new();

        let mut decision = ctl.on_connection_lost();
        while let ReconnectDecision::Retry { attempt, delay } = decision {
            assert_eq!(delay, Duration::from_millis(5));
            assert_eq!(ctl.begin_attempt(), attempt);
            started.push(attempt);
            decision = ctl.on_attempt_failed();
        }

        assert_eq!(started, vec![1, 2, 3]);
        assert_eq!(decision, ReconnectDecision::Exhausted { attempts: 3 });
        assert_eq!(ctl.state(), ReconnectState::Exhausted);
        assert_eq!(ctl.on_attempt_failed(), ReconnectDecision::Ignore);
        assert_eq!(ctl.on_connection_lost(), ReconnectDecision::Ignore);
    }

    #[test]
    fn success_and_explicit_reset_return_to_idle() {
        let mut ctl = ReconnectController::new(ReconnectPolicy::fixed(Duration::ZERO, 2));
        ctl.on_connection_lost();
        ctl.begin_attempt();
        ctl.on_connected();
        assert_eq!(ctl.state(), ReconnectState::Idle);
        assert_eq!(ctl.attempts(), 0);

        ctl.on_connection_lost();
        ctl.begin_attempt();
        ctl.on_attempt_failed();
        ctl.begin_attempt();
        assert!(matches!(ctl.on_attempt_failed(), ReconnectDecision::Exhausted { .. }));
        ctl.reset();
        assert!(matches!(
            ctl.on_connection_lost(),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn zero_attempt_policy_exhausts_immediately() {
        let mut ctl = ReconnectController::new(ReconnectPolicy::none());
        assert_eq!(
            ctl.on_connection_lost(),
            ReconnectDecision::Exhausted { attempts: 0 }
        );
    }

    #[test]
    fn exponential_policy_grows_and_caps() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(100),
            Duration::from_millis(350),
            2.0,
            10,
        );
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(350));
        assert_eq!(policy.delay(9), Duration::from_millis(350));
    }

    #[test]
    fn jitter_delay_respects_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let delay = jitter_delay(base);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= base);
        }
        assert_eq!(jitter_delay(Duration::ZERO), Duration::ZERO);

        let policy = ReconnectPolicy::fixed(base, 1).with_jitter();
        assert!(policy.delay(1) <= base);
    }
}
