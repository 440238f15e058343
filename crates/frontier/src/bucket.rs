use std::time::Instant;

use dashmap::DashMap;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket per hostname. Refill is lazy: a host that goes quiet costs
/// nothing until it is asked about again. Consumption is whole-token only.
pub struct HostRateLimiter {
    buckets: DashMap<String, Bucket>,
    rps: f64,
    burst: f64,
}

impl HostRateLimiter {
    pub fn new(rps: f64, burst: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            rps,
            burst: burst.max(1.0),
        }
    }

    /// Take one token for `host` if at least one is available. Callers that
    /// get `false` must back off and retry; this never blocks.
    pub fn try_consume(&self, host: &str) -> bool {
        self.try_consume_at(host, Instant::now())
    }

    pub fn try_consume_at(&self, host: &str, now: Instant) -> bool {
        let mut bucket = self.buckets.entry(host.to_string()).or_insert_with(|| Bucket {
            tokens: self.burst,
            last_refill: now,
        });
        self.refill(&mut bucket, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current level, for telemetry only. Hosts never seen report a full bucket.
    pub fn tokens(&self, host: &str) -> f64 {
        self.tokens_at(host, Instant::now())
    }

    pub fn tokens_at(&self, host: &str, now: Instant) -> f64 {
        match self.buckets.get_mut(host) {
            Some(mut bucket) => {
                self.refill(&mut bucket, now);
                bucket.tokens
            }
            None => self.burst,
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
            bucket.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn burst_then_refill() {
        // rps=2 burst=2: ok, ok, fail, fail at +250ms, ok at +500ms.
        let limiter = HostRateLimiter::new(2.0, 2.0);
        let t0 = Instant::now();
        assert!(limiter.try_consume_at("h", t0));
        assert!(limiter.try_consume_at("h", t0));
        assert!(!limiter.try_consume_at("h", t0));
        assert!(!limiter.try_consume_at("h", t0 + Duration::from_millis(250)));
        assert!(limiter.try_consume_at("h", t0 + Duration::from_millis(500)));
    }

    #[test]
    fn no_partial_consumption() {
        let limiter = HostRateLimiter::new(1.0, 1.0);
        let t0 = Instant::now();
        assert!(limiter.try_consume_at("h", t0));
        // 0.5 tokens available: a failed consume must not deduct anything.
        let t_half = t0 + Duration::from_millis(500);
        assert!(!limiter.try_consume_at("h", t_half));
        let before = limiter.tokens_at("h", t_half);
        assert!(!limiter.try_consume_at("h", t_half));
        let after = limiter.tokens_at("h", t_half);
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn tokens_clamp_to_burst() {
        let limiter = HostRateLimiter::new(10.0, 3.0);
        let t0 = Instant::now();
        assert!(limiter.try_consume_at("h", t0));
        // A long quiet period refills to burst, not beyond.
        let later = t0 + Duration::from_secs(60);
        assert!((limiter.tokens_at("h", later) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn hosts_are_independent() {
        let limiter = HostRateLimiter::new(1.0, 1.0);
        let t0 = Instant::now();
        assert!(limiter.try_consume_at("a.example", t0));
        assert!(limiter.try_consume_at("b.example", t0));
        assert!(!limiter.try_consume_at("a.example", t0));
    }

    #[test]
    fn unseen_host_reports_full_bucket() {
        let limiter = HostRateLimiter::new(2.0, 4.0);
        assert!((limiter.tokens("never-seen.example") - 4.0).abs() < 1e-9);
    }
}
