use std::sync::{Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

/// 現在時刻の供給元
///
/// TTL 判定とレートリミットの補充計算はすべてこのトレイト経由で時刻を取得する。
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// システム時刻（UTC）を返す Clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// 手動で進める Clock
///
/// テストで TTL 境界やバケット補充を決定的に検証するために使う。
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 指定した時間だけ時刻を進める
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
