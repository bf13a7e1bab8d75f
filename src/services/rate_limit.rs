use std::collections::HashMap;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::Config;

/// トークンバケットのパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// バケット容量
    pub capacity: u32,
    /// 1周期ごとに補充されるトークン数
    pub refill_tokens: u32,
    /// 補充周期
    pub refill_period: Duration,
    /// 最終アクセスからこの時間を過ぎたバケットは掃除対象
    pub retention: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        // 10分ごとに5リクエストまで
        Self {
            capacity: 5,
            refill_tokens: 5,
            refill_period: Duration::minutes(10),
            retention: Duration::hours(1),
        }
    }
}

impl RateLimitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capacity: config.rate_limit_capacity,
            refill_tokens: config.rate_limit_capacity,
            refill_period: Duration::seconds(config.rate_limit_window_secs),
            retention: Duration::seconds(config.rate_limit_retention_secs),
        }
    }
}

/// tryConsume の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: OffsetDateTime,
    last_accessed: OffsetDateTime,
}

impl Bucket {
    fn new(policy: &RateLimitPolicy, now: OffsetDateTime) -> Self {
        Self {
            tokens: policy.capacity,
            last_refill: now,
            last_accessed: now,
        }
    }

    /// 経過した周期の分だけまとめて補充する
    fn refill(&mut self, policy: &RateLimitPolicy, now: OffsetDateTime) {
        let period = policy.refill_period.whole_nanoseconds();
        let elapsed = (now - self.last_refill).whole_nanoseconds();
        if period <= 0 || elapsed < period {
            return;
        }
        let periods = elapsed / period;
        let added = periods.saturating_mul(i128::from(policy.refill_tokens));
        let tokens = (i128::from(self.tokens) + added).min(i128::from(policy.capacity));
        self.tokens = u32::try_from(tokens).unwrap_or(policy.capacity);
        self.last_refill += policy.refill_period * (periods.min(i128::from(i32::MAX)) as i32);
    }

    fn try_take(&mut self, policy: &RateLimitPolicy, now: OffsetDateTime) -> RateLimitDecision {
        self.refill(policy, now);
        self.last_accessed = now;

        if self.tokens > 0 {
            self.tokens -= 1;
            RateLimitDecision::Allowed {
                remaining: self.tokens,
            }
        } else {
            let next_refill = self.last_refill + policy.refill_period;
            RateLimitDecision::Denied {
                retry_after: (next_refill - now).max(Duration::ZERO),
            }
        }
    }
}

/// キーごとのトークンバケット
///
/// バケットは初回アクセス時に作られ、`cleanup` で一定時間アクセスのないものが削除される。
pub struct RateLimiter {
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// トークンを1つ消費する
    ///
    /// 補充と消費は同一のロック内で行うため、同じキーへの同時呼び出しでも
    /// 残量以上の Allowed は返らない。
    pub async fn try_consume(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(&self.policy, now));
        bucket.try_take(&self.policy, now)
    }

    /// 保持期間を過ぎたバケットを削除
    ///
    /// # Returns
    /// 削除件数
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let retention = self.policy.retention;
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now - bucket.last_accessed <= retention);
        let removed = before - buckets.len();
        tracing::info!(removed, remaining = buckets.len(), "レートリミットバケットを掃除");
        removed
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
