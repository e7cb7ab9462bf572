//! Token bucket implementation.

use parking_lot::Mutex;
use std::time::Instant;

/// Verdict for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed
    Admit,
    /// The client has no tokens left
    Deny,
}

impl Admission {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Mutable part of a bucket, guarded by the bucket's own lock.
#[derive(Debug)]
struct BucketState {
    /// Available tokens, always within `[0, capacity]`
    tokens: f64,
    /// Last time tokens were added; never moves backwards
    last_refill: Instant,
}

/// A per-client token bucket.
///
/// Tokens refill continuously at `refill_rate` per second up to `capacity`.
/// Each admitted request takes one token. Refill and consume happen under a
/// single lock scoped to this bucket, so concurrent requests from one client
/// cannot spend the same token twice while unrelated clients never contend.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: now,
            }),
        }
    }

    /// Refill for the time elapsed since the last refill, then try to take a token.
    ///
    /// A `now` earlier than the last refill counts as zero elapsed time.
    pub fn try_consume(&self, now: Instant) -> Admission {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate)
            .min(self.capacity as f64);
        if now > state.last_refill {
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Admission::Admit
        } else {
            Admission::Deny
        }
    }

    /// Tokens currently held, without refilling.
    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_bucket_is_full() {
        let bucket = TokenBucket::new(5, 1.0, Instant::now());
        assert_eq!(bucket.tokens(), 5.0);
        assert_eq!(bucket.capacity(), 5);
    }

    #[test]
    fn test_single_token_refills_after_one_second() {
        let start = Instant::now();
        let bucket = TokenBucket::new(1, 1.0, start);

        assert_eq!(bucket.try_consume(start), Admission::Admit);
        assert_eq!(bucket.try_consume(start), Admission::Deny);
        assert_eq!(
            bucket.try_consume(start + Duration::from_millis(500)),
            Admission::Deny
        );
        assert_eq!(
            bucket.try_consume(start + Duration::from_secs(1)),
            Admission::Admit
        );
    }

    #[test]
    fn test_burst_then_deny() {
        let start = Instant::now();
        let bucket = TokenBucket::new(5, 1.0, start);

        for _ in 0..5 {
            assert!(bucket.try_consume(start).is_admitted());
        }

        // The 6th immediate request should be rejected
        assert_eq!(bucket.try_consume(start), Admission::Deny);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let bucket = TokenBucket::new(3, 10.0, start);

        assert!(bucket.try_consume(start).is_admitted());
        let later = start + Duration::from_secs(3600);
        assert!(bucket.try_consume(later).is_admitted());

        // Refilled to 3, then one taken
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn test_fractional_refill() {
        let start = Instant::now();
        let bucket = TokenBucket::new(1, 4.0, start);

        assert!(bucket.try_consume(start).is_admitted());
        assert!(!bucket.try_consume(start + Duration::from_millis(100)).is_admitted());
        assert!(bucket.try_consume(start + Duration::from_millis(300)).is_admitted());
    }

    #[test]
    fn test_backwards_clock_is_clamped() {
        let start = Instant::now();
        let later = start + Duration::from_secs(10);
        let bucket = TokenBucket::new(2, 1.0, later);

        assert!(bucket.try_consume(later).is_admitted());
        // An earlier instant neither refills nor rewinds the refill time
        assert!(bucket.try_consume(start).is_admitted());
        assert_eq!(bucket.try_consume(start), Admission::Deny);
        assert_eq!(bucket.try_consume(later), Admission::Deny);
        assert!(bucket.try_consume(later + Duration::from_secs(1)).is_admitted());
    }

    #[test]
    fn test_tokens_never_negative() {
        let start = Instant::now();
        let bucket = TokenBucket::new(1, 1.0, start);

        for _ in 0..10 {
            bucket.try_consume(start);
        }
        assert_eq!(bucket.tokens(), 0.0);
    }
}
