use std::sync::Arc;

use sqlx::PgPool;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::AppError;
use crate::models::{PasswordResetRequest, PendingRegistration};
use crate::repositories::{EphemeralStore, InMemoryEphemeralStore, PgUserRepository, UserRepository};
use crate::services::{
    AuthService, Notifier, PasswordResetService, RateLimitPolicy, RateLimiter,
    RegistrationService, build_notifier,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// 認証サービス
    pub auth_service: AuthService,
    /// 登録・メール確認サービス
    pub registration_service: RegistrationService,
    /// パスワードリセットサービス
    pub password_reset_service: PasswordResetService,
    /// クライアントごとのレートリミッター
    pub rate_limiter: Arc<RateLimiter>,
    /// 仮登録ストア（定期スイープ用）
    pub pending_store: Arc<dyn EphemeralStore<PendingRegistration>>,
    /// パスワードリセット要求ストア（定期スイープ用）
    pub reset_store: Arc<dyn EphemeralStore<PasswordResetRequest>>,
}

impl AppState {
    /// 新しい AppState を作成（PostgreSQL・システム時刻・設定に応じたメール送信）
    pub fn new(db_pool: PgPool, config: Config) -> Result<Self, AppError> {
        let notifier = build_notifier(&config)?;
        Ok(Self::from_parts(
            Arc::new(PgUserRepository::new(db_pool)),
            notifier,
            Arc::new(SystemClock),
            config,
        ))
    }

    /// 依存を指定して AppState を組み立てる
    pub fn from_parts(
        user_repo: Arc<dyn UserRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        let config = Arc::new(config);

        let pending_store: Arc<dyn EphemeralStore<PendingRegistration>> =
            Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        let reset_store: Arc<dyn EphemeralStore<PasswordResetRequest>> =
            Arc::new(InMemoryEphemeralStore::new(clock.clone()));

        let rate_limiter = Arc::new(RateLimiter::new(
            RateLimitPolicy::from_config(&config),
            clock.clone(),
        ));

        let auth_service = AuthService::new(user_repo.clone());
        let registration_service = RegistrationService::new(
            user_repo.clone(),
            pending_store.clone(),
            notifier.clone(),
            clock.clone(),
            config.clone(),
        );
        let password_reset_service = PasswordResetService::new(
            user_repo,
            reset_store.clone(),
            notifier,
            clock,
            config.clone(),
        );

        Self {
            config,
            auth_service,
            registration_service,
            password_reset_service,
            rate_limiter,
            pending_store,
            reset_store,
        }
    }

    /// バックグラウンドのメール送信が終わるまで待つ
    pub async fn drain_dispatchers(&self) {
        for tracker in [
            self.registration_service.dispatcher(),
            self.password_reset_service.dispatcher(),
        ] {
            tracker.close();
            tracker.wait().await;
        }
    }
}
