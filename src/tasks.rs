//! バックグラウンドの定期タスク
//!
//! 期限切れトークンのスイープとレートリミットバケットの掃除を、
//! CancellationToken で停止できる tokio タスクとして実行する。
//! ジョブは tick ごとに完了まで待つため、同じタスクが重複実行されることはない。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::models::{PasswordResetRequest, PendingRegistration};
use crate::repositories::EphemeralStore;
use crate::services::RateLimiter;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// 一定間隔でジョブを実行するタスクを起動
///
/// 失敗はログに残し、次の tick で再試行する
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<usize>> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    tokio::spawn(async move {
        tracing::info!(task = name, period_secs = period.as_secs(), "定期タスク開始");
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match job().await {
                        Ok(removed) => tracing::debug!(task = name, removed, "定期タスク完了"),
                        Err(e) => tracing::error!(task = name, error = ?e, "定期タスク失敗（次回再試行）"),
                    }
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }

        tracing::info!(task = name, "定期タスク停止");
    })
}

/// 仮登録とリセット要求の期限切れスイープ
pub fn spawn_token_sweeper(
    pending: Arc<dyn EphemeralStore<PendingRegistration>>,
    resets: Arc<dyn EphemeralStore<PasswordResetRequest>>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    spawn_periodic("token_sweep", period, shutdown, move || {
        let pending = pending.clone();
        let resets = resets.clone();
        async move {
            let removed_pending = pending.sweep_expired().await?;
            let removed_resets = resets.sweep_expired().await?;
            if removed_pending + removed_resets > 0 {
                tracing::info!(
                    pending = removed_pending,
                    resets = removed_resets,
                    "期限切れトークンを削除"
                );
            }
            Ok::<_, anyhow::Error>(removed_pending + removed_resets)
        }
    })
}

/// 使われていないレートリミットバケットの掃除
pub fn spawn_rate_limit_cleanup(
    limiter: Arc<RateLimiter>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    spawn_periodic("rate_limit_cleanup", period, shutdown, move || {
        let limiter = limiter.clone();
        async move { Ok::<_, anyhow::Error>(limiter.cleanup().await) }
    })
}
