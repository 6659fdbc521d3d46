use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Identity a request is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientId {
    /// A configured API key presented by the caller.
    ApiKey(String),
    /// Anonymous or unauthenticated caller, by peer address.
    Peer(IpAddr),
    /// Neither a valid key nor a peer address (in-process requests).
    Unknown,
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Never log a whole key.
            ClientId::ApiKey(key) => {
                let prefix: String = key.chars().take(4).collect();
                write!(f, "key:{prefix}***")
            }
            ClientId::Peer(ip) => write!(f, "ip:{ip}"),
            ClientId::Unknown => f.write_str("unknown"),
        }
    }
}

/// Admission limits applied to every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Requests a fresh client may make back to back.
    pub burst: u32,
    /// Sustained requests per second. Zero means the burst never refills.
    pub per_second: u32,
}

impl RateLimit {
    fn capacity(&self) -> f64 {
        f64::from(self.burst.max(1))
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.per_second)
    }
}

/// Outcome of charging one request to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// `retry_after` is when the next token arrives, if one ever will.
    Limited { retry_after: Option<Duration> },
}

struct Bucket {
    tokens: f64,
    touched: Instant,
}

impl Bucket {
    fn full(limit: &RateLimit, now: Instant) -> Self {
        Self {
            tokens: limit.capacity(),
            touched: now,
        }
    }

    fn admit(&mut self, limit: &RateLimit, now: Instant) -> Admission {
        let idle = now.saturating_duration_since(self.touched).as_secs_f64();
        self.tokens = (self.tokens + idle * limit.refill_per_sec()).min(limit.capacity());
        self.touched = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Admission::Allowed;
        }
        let retry_after = (limit.per_second > 0)
            .then(|| Duration::from_secs_f64((1.0 - self.tokens) / limit.refill_per_sec()));
        Admission::Limited { retry_after }
    }
}

/// Token bucket limiter with one bucket per [`ClientId`].
pub struct RateLimiter {
    limit: RateLimit,
    buckets: Mutex<HashMap<ClientId, Bucket>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Charge one request to `client`.
    pub async fn admit(&self, client: &ClientId) -> Admission {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(client) {
            Some(bucket) => bucket.admit(&self.limit, now),
            None => {
                let mut bucket = Bucket::full(&self.limit, now);
                let admission = bucket.admit(&self.limit, now);
                buckets.insert(client.clone(), bucket);
                admission
            }
        }
    }

    /// Forget clients idle for at least `max_idle`. Returns how many are still tracked.
    ///
    /// A forgotten client starts again with a full burst.
    pub async fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, b| now.saturating_duration_since(b.touched) < max_idle);
        buckets.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn peer(last: u8) -> ClientId {
        ClientId::Peer(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_limited() {
        let limiter = RateLimiter::new(RateLimit {
            burst: 3,
            per_second: 2,
        });
        for _ in 0..3 {
            assert_eq!(limiter.admit(&peer(1)).await, Admission::Allowed);
        }
        match limiter.admit(&peer(1)).await {
            Admission::Limited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_millis(500)));
            }
            Admission::Allowed => panic!("burst should be spent"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new(RateLimit {
            burst: 1,
            per_second: 2,
        });
        assert_eq!(limiter.admit(&peer(1)).await, Admission::Allowed);
        assert!(matches!(
            limiter.admit(&peer(1)).await,
            Admission::Limited { .. }
        ));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.admit(&peer(1)).await, Admission::Allowed);
    }

    #[tokio::test]
    async fn test_zero_rate_never_refills() {
        let limiter = RateLimiter::new(RateLimit {
            burst: 1,
            per_second: 0,
        });
        limiter.admit(&ClientId::Unknown).await;
        assert_eq!(
            limiter.admit(&ClientId::Unknown).await,
            Admission::Limited { retry_after: None }
        );
    }

    #[tokio::test]
    async fn test_clients_are_charged_separately() {
        let limiter = RateLimiter::new(RateLimit {
            burst: 1,
            per_second: 0,
        });
        let key = ClientId::ApiKey("k1".to_string());
        assert_eq!(limiter.admit(&key).await, Admission::Allowed);
        assert_ne!(limiter.admit(&key).await, Admission::Allowed);
        assert_eq!(limiter.admit(&peer(1)).await, Admission::Allowed);
        assert_eq!(limiter.admit(&peer(2)).await, Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle_forgets_quiet_clients() {
        let limiter = RateLimiter::new(RateLimit {
            burst: 1,
            per_second: 0,
        });
        limiter.admit(&peer(1)).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.admit(&peer(2)).await;

        assert_eq!(limiter.prune_idle(Duration::from_secs(20)).await, 1);
        // peer 1 was forgotten, so it gets a fresh burst.
        assert_eq!(limiter.admit(&peer(1)).await, Admission::Allowed);
    }

    #[test]
    fn test_display_hides_key() {
        let id = ClientId::ApiKey("supersecret".to_string());
        assert_eq!(id.to_string(), "key:supe***");
        assert_eq!(peer(7).to_string(), "ip:10.0.0.7");
    }
}
