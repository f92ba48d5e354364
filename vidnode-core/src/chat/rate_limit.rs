use std::collections::VecDeque;

/// Number of recent accepted messages inspected for a burst.
pub const WINDOW_SIZE: usize = 3;
/// A full window spanning less than this is a burst.
pub const BURST_SPAN_MS: i64 = 5000;
pub const BASE_PENALTY_MS: i64 = 5000;
pub const PENALTY_STEP_MS: i64 = 5000;
/// Retrying this soon after a penalty expires escalates it.
pub const EAGERNESS_WINDOW_MS: i64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterState {
    Normal,
    /// `since_ms` is the start of the burst that imposed the limit. Escalation
    /// keeps it, so each level's penalty is measured from the same point.
    Limited { level: u32, since_ms: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Accept,
    /// Rejected, and the client is told how long the penalty now is.
    Limited { rate_limit_seconds: u64 },
    /// Rejected without a reply.
    Drop,
}

/// Per-connection chat flood guard: a sliding window of the last
/// [`WINDOW_SIZE`] timestamps plus an escalating penalty.
#[derive(Debug, Clone)]
pub struct ChatRateLimiter {
    timestamps: VecDeque<i64>,
    state: LimiterState,
}

impl ChatRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::with_capacity(WINDOW_SIZE + 1),
            state: LimiterState::Normal,
        }
    }

    #[must_use]
    pub const fn state(&self) -> LimiterState {
        self.state
    }

    #[must_use]
    pub const fn penalty_ms(level: u32) -> i64 {
        BASE_PENALTY_MS + level as i64 * PENALTY_STEP_MS
    }

    /// Decide what to do with a message arriving at `now_ms`.
    pub fn check(&mut self, now_ms: i64) -> RateDecision {
        if let LimiterState::Limited { level, since_ms } = self.state {
            let elapsed = now_ms - since_ms;
            let penalty = Self::penalty_ms(level);

            if elapsed < penalty {
                return RateDecision::Drop;
            }
            if elapsed < penalty + EAGERNESS_WINDOW_MS {
                let level = level + 1;
                self.state = LimiterState::Limited { level, since_ms };
                return RateDecision::Limited {
                    rate_limit_seconds: penalty_seconds(level),
                };
            }
            self.state = LimiterState::Normal;
        }

        self.timestamps.push_back(now_ms);
        while self.timestamps.len() > WINDOW_SIZE {
            self.timestamps.pop_front();
        }

        if self.timestamps.len() == WINDOW_SIZE {
            if let (Some(&oldest), Some(&newest)) = (self.timestamps.front(), self.timestamps.back()) {
                if newest - oldest < BURST_SPAN_MS {
                    self.state = LimiterState::Limited {
                        level: 0,
                        since_ms: oldest,
                    };
                    return RateDecision::Limited {
                        rate_limit_seconds: penalty_seconds(0),
                    };
                }
            }
        }

        RateDecision::Accept
    }
}

impl Default for ChatRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn penalty_seconds(level: u32) -> u64 {
    u64::try_from(ChatRateLimiter::penalty_ms(level) / 1000).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_messages_are_accepted() {
        let mut limiter = ChatRateLimiter::new();
        for t in [0, 3000, 6000, 9000, 12_000] {
            assert_eq!(limiter.check(t), RateDecision::Accept);
        }
        assert_eq!(limiter.state(), LimiterState::Normal);
    }

    #[test]
    fn test_escalation_sequence() {
        let mut limiter = ChatRateLimiter::new();
        assert_eq!(limiter.check(0), RateDecision::Accept);
        assert_eq!(limiter.check(100), RateDecision::Accept);
        assert_eq!(
            limiter.check(200),
            RateDecision::Limited {
                rate_limit_seconds: 5
            }
        );
        assert_eq!(limiter.state(), LimiterState::Limited { level: 0, since_ms: 0 });

        // inside the 5s penalty
        assert_eq!(limiter.check(4000), RateDecision::Drop);

        // inside the eagerness window after the first penalty
        assert_eq!(
            limiter.check(5100),
            RateDecision::Limited {
                rate_limit_seconds: 10
            }
        );
        assert_eq!(limiter.state(), LimiterState::Limited { level: 1, since_ms: 0 });

        assert_eq!(limiter.check(9000), RateDecision::Drop);

        // past the 10s penalty and its grace window
        assert_eq!(limiter.check(15_000), RateDecision::Accept);
        assert_eq!(limiter.state(), LimiterState::Normal);
    }

    #[test]
    fn test_patient_retry_returns_to_normal() {
        let mut limiter = ChatRateLimiter::new();
        limiter.check(0);
        limiter.check(10);
        limiter.check(20);
        assert_eq!(limiter.check(8000), RateDecision::Accept);
        assert_eq!(limiter.state(), LimiterState::Normal);
    }

    #[test]
    fn test_burst_after_recovery_retriggers() {
        let mut limiter = ChatRateLimiter::new();
        limiter.check(0);
        limiter.check(10);
        limiter.check(20);
        assert_eq!(limiter.check(9000), RateDecision::Accept);
        assert_eq!(limiter.check(9100), RateDecision::Accept);
        assert_eq!(
            limiter.check(9200),
            RateDecision::Limited {
                rate_limit_seconds: 5
            }
        );
    }

    #[test]
    fn test_repeated_eager_retries_compound() {
        let mut limiter = ChatRateLimiter::new();
        limiter.check(0);
        limiter.check(1);
        limiter.check(2);
        assert_eq!(
            limiter.check(5000),
            RateDecision::Limited {
                rate_limit_seconds: 10
            }
        );
        assert_eq!(
            limiter.check(10_500),
            RateDecision::Limited {
                rate_limit_seconds: 15
            }
        );
        assert_eq!(limiter.state(), LimiterState::Limited { level: 2, since_ms: 0 });
    }
}
