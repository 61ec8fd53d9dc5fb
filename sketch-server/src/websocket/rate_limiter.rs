use std::time::{Duration, Instant};

/// Token bucket: `max_tokens` burst, one token back every `refill_rate`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tokens: u32,
    max_tokens: u32,
    refill_rate: Duration,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new() -> Self {
        // 30 burst, 1 token every 500ms
        Self::new_with_limits(30, Duration::from_millis(500))
    }

    /// Budget for live ink: a second of samples as burst, refilled at the
    /// configured sample rate.
    pub fn for_ink(samples_per_second: u32) -> Self {
        let rate = samples_per_second.max(1);
        Self::new_with_limits(rate, Duration::from_micros(1_000_000 / u64::from(rate)))
    }

    pub fn new_with_limits(max_tokens: u32, refill_rate: Duration) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate: refill_rate.max(Duration::from_micros(1)),
            last_refill: Instant::now(),
        }
    }

    pub fn check_rate_limit(&mut self) -> bool {
        self.refill_tokens();

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill_tokens(&mut self) {
        let time_passed = self.last_refill.elapsed();
        let refills = time_passed.as_micros() / self.refill_rate.as_micros();
        if refills == 0 {
            return;
        }

        let tokens_to_add = u32::try_from(refills).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(tokens_to_add).min(self.max_tokens);
        // Keep the remainder so partial intervals are not lost.
        self.last_refill += self.refill_rate * tokens_to_add;
        if self.tokens == self.max_tokens {
            self.last_refill = Instant::now();
        }
    }

    pub fn get_remaining_tokens(&mut self) -> u32 {
        self.refill_tokens();
        self.tokens
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let mut limiter = RateLimiter::new_with_limits(3, Duration::from_secs(60));

        assert!(limiter.check_rate_limit());
        assert!(limiter.check_rate_limit());
        assert!(limiter.check_rate_limit());
        assert!(!limiter.check_rate_limit());
        assert_eq!(limiter.get_remaining_tokens(), 0);
    }

    #[tokio::test]
    async fn test_sub_second_refill() {
        let mut limiter = RateLimiter::new_with_limits(2, Duration::from_millis(20));
        assert!(limiter.check_rate_limit());
        assert!(limiter.check_rate_limit());
        assert!(!limiter.check_rate_limit());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.check_rate_limit());
    }

    #[test]
    fn test_ink_budget_matches_sample_rate() {
        let mut limiter = RateLimiter::for_ink(40);
        let allowed = (0..100).filter(|_| limiter.check_rate_limit()).count();
        // A tight loop can earn back at most a token or two.
        assert!((40..=42).contains(&allowed), "allowed {}", allowed);
    }
}
