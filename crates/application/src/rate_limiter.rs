use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use config::RateLimitConfig;

/// 单个客户端的令牌桶
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// 限流错误类型
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    #[error("too many requests from {client}, retry after {retry_after:?}")]
    TooManyRequests {
        client: String,
        retry_after: Duration,
    },
}

/// 按客户端地址限流
/// 每个地址一个令牌桶，以 `requests_per_second` 的速率补充，最多积累 `burst` 个。
pub struct RequestRateGuard {
    requests_per_second: f64,
    burst: f64,
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
}

impl RequestRateGuard {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst: f64::from(burst.max(1)),
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    /// 检查客户端是否还有令牌，有则消耗一个
    pub fn check(&self, client: &str) -> Result<(), RateLimitError> {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), RateLimitError> {
        let Ok(mut buckets) = self.buckets.write() else {
            // 锁中毒时放行
            return Ok(());
        };

        let bucket = buckets
            .entry(client.to_owned())
            .or_insert_with(|| TokenBucket::full(self.burst, now));
        bucket.refill(self.requests_per_second, self.burst, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - bucket.tokens;
        let retry_after = if self.requests_per_second > 0.0 {
            Duration::from_secs_f64(missing / self.requests_per_second)
        } else {
            Duration::MAX
        };
        Err(RateLimitError::TooManyRequests {
            client: client.to_owned(),
            retry_after,
        })
    }

    /// 清理已经补满的桶（防止内存泄漏），返回清理数量
    pub fn cleanup_idle(&self) -> usize {
        self.cleanup_idle_at(Instant::now())
    }

    pub fn cleanup_idle_at(&self, now: Instant) -> usize {
        let Ok(mut buckets) = self.buckets.write() else {
            return 0;
        };
        let before = buckets.len();
        let (rate, capacity) = (self.requests_per_second, self.burst);
        buckets.retain(|_, bucket| {
            bucket.refill(rate, capacity, now);
            bucket.tokens < capacity
        });
        before - buckets.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.read().map(|b| b.len()).unwrap_or(0)
    }
}

impl Default for RequestRateGuard {
    fn default() -> Self {
        Self::new(1.0, 5) // 默认每秒补充 1 个，最多突发 5 个
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_limited() {
        let guard = RequestRateGuard::new(1.0, 3);
        let now = Instant::now();

        for i in 0..3 {
            assert!(guard.check_at("10.0.0.1", now).is_ok(), "request {} should pass", i + 1);
        }

        match guard.check_at("10.0.0.1", now) {
            Err(RateLimitError::TooManyRequests { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn clients_are_independent() {
        let guard = RequestRateGuard::new(1.0, 1);
        let now = Instant::now();
        assert!(guard.check_at("10.0.0.1", now).is_ok());
        assert!(guard.check_at("10.0.0.1", now).is_err());
        assert!(guard.check_at("10.0.0.2", now).is_ok());
    }

    #[test]
    fn tokens_refill_over_time() {
        let guard = RequestRateGuard::new(2.0, 1);
        let now = Instant::now();
        assert!(guard.check_at("c", now).is_ok());
        assert!(guard.check_at("c", now).is_err());
        assert!(guard.check_at("c", now + Duration::from_millis(500)).is_ok());
    }

    #[test]
    fn cleanup_drops_only_full_buckets() {
        let guard = RequestRateGuard::new(1.0, 5);
        let now = Instant::now();
        guard.check_at("idle", now).unwrap();
        guard.check_at("busy", now + Duration::from_secs(10)).unwrap();

        let removed = guard.cleanup_idle_at(now + Duration::from_secs(10));
        assert_eq!(removed, 1);
        assert_eq!(guard.tracked_clients(), 1);
    }
}
