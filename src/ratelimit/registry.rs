//! Visitor registry mapping clients to their token buckets.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::bucket::{Admission, TokenBucket};
use super::client::ClientId;
use crate::config::RateLimitingConfig;

/// The single limit policy applied to every client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitConfig {
    /// Bucket capacity (maximum burst)
    pub burst: u32,
    /// Tokens added per second
    pub rate: f64,
}

impl LimitConfig {
    /// Create a new limit policy.
    pub fn new(burst: u32, rate: f64) -> Self {
        Self { burst, rate }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self::from(&RateLimitingConfig::default())
    }
}

impl From<&RateLimitingConfig> for LimitConfig {
    fn from(config: &RateLimitingConfig) -> Self {
        Self::new(config.burst, config.rate)
    }
}

/// Registry of every client seen since the last sweep.
///
/// Lookups of known clients share a read lock. Creating a bucket and resetting
/// the registry take the write lock, so two racing first requests from the same
/// client always end up with the same bucket. Consuming tokens happens on the
/// bucket's own lock, outside the registry lock.
pub struct VisitorRegistry {
    visitors: RwLock<HashMap<ClientId, Arc<TokenBucket>>>,
    limits: LimitConfig,
}

impl VisitorRegistry {
    /// Create an empty registry applying `limits` to every client.
    pub fn new(limits: LimitConfig) -> Self {
        Self {
            visitors: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// The policy used for new buckets.
    pub fn limits(&self) -> LimitConfig {
        self.limits
    }

    /// Return the bucket for `client`, creating a full one on first sight.
    pub fn get_or_create(&self, client: &ClientId) -> Arc<TokenBucket> {
        if let Some(bucket) = self.visitors.read().get(client) {
            return Arc::clone(bucket);
        }

        let mut visitors = self.visitors.write();
        let bucket = visitors.entry(client.clone()).or_insert_with(|| {
            debug!(
                client = %client,
                burst = self.limits.burst,
                rate = self.limits.rate,
                "Creating new visitor bucket"
            );
            Arc::new(TokenBucket::new(
                self.limits.burst,
                self.limits.rate,
                Instant::now(),
            ))
        });
        Arc::clone(bucket)
    }

    /// Check and consume one token for `client` at the current time.
    pub fn check(&self, client: &ClientId) -> Admission {
        self.check_at(client, Instant::now())
    }

    /// Check and consume one token for `client` at `now`.
    pub fn check_at(&self, client: &ClientId, now: Instant) -> Admission {
        let admission = self.get_or_create(client).try_consume(now);
        trace!(client = %client, admission = ?admission, "Checked visitor bucket");
        admission
    }

    /// Drop every tracked client, returning how many were removed.
    ///
    /// Clients mid-penalty get a full bucket on their next request. Eviction
    /// is wholesale; there is no idle tracking.
    pub fn reset_all(&self) -> usize {
        let previous = std::mem::take(&mut *self.visitors.write());
        previous.len()
    }

    /// Current token count for `client`, if it is tracked.
    pub fn tokens(&self, client: &ClientId) -> Option<f64> {
        self.visitors.read().get(client).map(|bucket| bucket.tokens())
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.visitors.read().len()
    }

    /// Whether no clients are tracked.
    pub fn is_empty(&self) -> bool {
        self.visitors.read().is_empty()
    }
}

impl Default for VisitorRegistry {
    fn default() -> Self {
        Self::new(LimitConfig::default())
    }
}
