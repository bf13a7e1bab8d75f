use std::sync::Arc;

use tokio_util::task::TaskTracker;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::AppError;
use crate::models::PasswordResetRequest;
use crate::repositories::{EphemeralStore, UserRepository};
use crate::services::auth::hash_password;
use crate::services::email::Notifier;
use crate::services::token::{generate_token, hash_token, normalize_email};

/// パスワードリセットサービス
#[derive(Clone)]
pub struct PasswordResetService {
    user_repo: Arc<dyn UserRepository>,
    resets: Arc<dyn EphemeralStore<PasswordResetRequest>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    dispatcher: TaskTracker,
}

impl PasswordResetService {
    /// 新しい PasswordResetService を作成
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        resets: Arc<dyn EphemeralStore<PasswordResetRequest>>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            user_repo,
            resets,
            notifier,
            clock,
            config,
            dispatcher: TaskTracker::new(),
        }
    }

    pub fn dispatcher(&self) -> &TaskTracker {
        &self.dispatcher
    }

    /// パスワードリセットをリクエスト
    ///
    /// # Security
    /// - ユーザーが存在しない場合も常に成功を返す（情報漏洩防止）
    /// - トークン（平文）はログに出力しない
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email);
        tracing::info!(email = %email, "パスワードリセットリクエスト");

        if self.user_repo.find_by_email(&email).await?.is_none() {
            tracing::info!(email = %email, "パスワードリセット: ユーザー不在（成功レスポンス返却）");
            return Ok(());
        }

        let token = generate_token();
        let request = PasswordResetRequest::new(
            hash_token(&token),
            email.clone(),
            self.clock.now(),
            self.config.password_reset_ttl(),
        );

        // 既存の要求は破棄して置き換える
        if self.resets.reissue(request).await?.is_some() {
            tracing::debug!(email = %email, "以前のリセット要求を無効化");
        }

        let reset_url = self.build_reset_url(&token);
        let notifier = self.notifier.clone();
        self.dispatcher.spawn(async move {
            match notifier.send_password_reset(&email, &reset_url).await {
                Ok(()) => tracing::info!(email = %email, "パスワードリセットメール送信完了"),
                Err(e) => {
                    tracing::error!(email = %email, error = ?e, "パスワードリセットメールの送信に失敗")
                }
            }
        });

        Ok(())
    }

    /// パスワードをリセット
    ///
    /// # Security
    /// - トークン・新パスワードはログに出力しない
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        let token_hash = hash_token(token);

        let request = self
            .resets
            .take(&token_hash)
            .await?
            .ok_or(AppError::InvalidOrExpiredToken)?;

        // 永続ユーザーが消えているのは内部不整合
        let Some(mut user) = self.user_repo.find_by_email(&request.email).await? else {
            tracing::error!(email = %request.email, "リセット要求に対応するユーザーが存在しない");
            return Err(AppError::Internal(anyhow::anyhow!(
                "reset request refers to a missing user"
            )));
        };

        user.password_hash = hash_password(new_password)?;
        user.updated_at = self.clock.now();

        if let Err(e) = self.user_repo.save(&user).await {
            tracing::warn!(email = %request.email, "パスワード更新に失敗したためリセット要求を復元");
            if let Err(restore_err) = self.resets.put(request).await {
                tracing::error!(error = ?restore_err, "リセット要求の復元に失敗");
            }
            return Err(e);
        }

        tracing::info!(user_id = %user.id, "パスワードリセット完了");
        Ok(())
    }

    /// リセットURLを構築
    fn build_reset_url(&self, token: &str) -> String {
        format!("{}?token={}", self.config.password_reset_url_base, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Role, User};
    use crate::repositories::{InMemoryEphemeralStore, InMemoryUserRepository};
    use crate::services::auth::verify_password;
    use crate::services::email::{RecordingNotifier, SentMail};
    use time::Duration;
    use time::macros::datetime;
    use uuid::Uuid;

    struct Harness {
        clock: Arc<ManualClock>,
        users: Arc<InMemoryUserRepository>,
        resets: Arc<InMemoryEphemeralStore<PasswordResetRequest>>,
        notifier: Arc<RecordingNotifier>,
        service: PasswordResetService,
    }

    impl Harness {
        async fn new() -> Self {
            let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
            let users = Arc::new(InMemoryUserRepository::new());
            let resets = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
            let notifier = Arc::new(RecordingNotifier::new());
            let service = PasswordResetService::new(
                users.clone(),
                resets.clone(),
                notifier.clone(),
                clock.clone(),
                Arc::new(Config::for_tests()),
            );

            let now = clock.now();
            users
                .save(&User {
                    id: Uuid::new_v4(),
                    email: "user@gmail.com".to_string(),
                    first_name: "Taro".to_string(),
                    last_name: "Yamada".to_string(),
                    password_hash: hash_password("old-password").unwrap(),
                    role: Role::User,
                    enabled: true,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();

            Self {
                clock,
                users,
                resets,
                notifier,
                service,
            }
        }

        async fn drain(&self) {
            self.service.dispatcher().close();
            self.service.dispatcher().wait().await;
            self.service.dispatcher().reopen();
        }

        async fn request_token(&self) -> String {
            self.service.forgot_password("user@gmail.com").await.unwrap();
            self.drain().await;
            self.notifier.last_token().await.unwrap()
        }

        async fn stored_hash(&self) -> String {
            self.users
                .find_by_email("user@gmail.com")
                .await
                .unwrap()
                .unwrap()
                .password_hash
        }
    }

    #[tokio::test]
    async fn test_forgot_password_sends_reset_link() {
        let h = Harness::new().await;
        h.service.forgot_password("user@gmail.com").await.unwrap();
        h.drain().await;

        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SentMail::PasswordReset { to, link } => {
                assert_eq!(to, "user@gmail.com");
                assert!(link.starts_with("http://localhost:5173/reset-password?token="));
            }
            other => panic!("unexpected mail: {other:?}"),
        }
        assert_eq!(h.resets.len().await, 1);
    }

    #[tokio::test]
    async fn test_forgot_password_unknown_email_looks_identical() {
        let h = Harness::new().await;
        let unknown = h.service.forgot_password("ghost@gmail.com").await;
        let known = h.service.forgot_password("user@gmail.com").await;
        h.drain().await;

        assert!(matches!(unknown, Ok(())));
        assert!(matches!(known, Ok(())));
        assert_eq!(h.notifier.sent().await.len(), 1);
        assert_eq!(h.resets.len().await, 1);
    }

    #[tokio::test]
    async fn test_forgot_password_replaces_previous_request() {
        let h = Harness::new().await;
        let first = h.request_token().await;
        let second = h.request_token().await;
        assert_ne!(first, second);
        assert_eq!(h.resets.len().await, 1);

        let old = h.service.reset_password(&first, "new-password").await;
        assert!(matches!(old, Err(AppError::InvalidOrExpiredToken)));
        h.service.reset_password(&second, "new-password").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_forgot_password_keeps_single_request() {
        let h = Harness::new().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = h.service.clone();
            handles.push(tokio::spawn(async move {
                service.forgot_password("user@gmail.com").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        h.drain().await;

        assert_eq!(h.resets.len().await, 1);
        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 8);

        // 有効なのは最後に発行された1件だけ
        let mut accepted = 0;
        for mail in &sent {
            let SentMail::PasswordReset { link, .. } = mail else {
                panic!("unexpected mail: {mail:?}");
            };
            let (_, token) = link.split_once("token=").unwrap();
            if h.service.reset_password(token, "new-password").await.is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert!(h.resets.is_empty().await);
    }

    #[tokio::test]
    async fn test_forgot_password_ignores_delivery_failure() {
        let h = Harness::new().await;
        h.notifier.fail_sends(true);
        assert!(h.service.forgot_password("user@gmail.com").await.is_ok());
        h.drain().await;
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_password_updates_hash_once() {
        let h = Harness::new().await;
        let token = h.request_token().await;

        h.service.reset_password(&token, "new-password").await.unwrap();
        let hash = h.stored_hash().await;
        assert!(verify_password("new-password", &hash).unwrap());
        assert!(!verify_password("old-password", &hash).unwrap());
        assert!(h.resets.is_empty().await);

        let again = h.service.reset_password(&token, "another-password").await;
        assert!(matches!(again, Err(AppError::InvalidOrExpiredToken)));
    }

    #[tokio::test]
    async fn test_reset_password_expired_token() {
        let h = Harness::new().await;
        let token = h.request_token().await;
        h.clock.advance(Duration::minutes(15));

        let result = h.service.reset_password(&token, "new-password").await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredToken)));
        assert!(verify_password("old-password", &h.stored_hash().await).unwrap());
    }

    #[tokio::test]
    async fn test_reset_password_within_ttl() {
        let h = Harness::new().await;
        let token = h.request_token().await;
        h.clock.advance(Duration::minutes(14));

        assert!(h.service.reset_password(&token, "new-password").await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_password_restores_request_when_save_fails() {
        let h = Harness::new().await;
        let token = h.request_token().await;

        h.users.fail_saves(true);
        assert!(h.service.reset_password(&token, "new-password").await.is_err());
        assert_eq!(h.resets.len().await, 1);

        h.users.fail_saves(false);
        assert!(h.service.reset_password(&token, "new-password").await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_password_for_missing_user_is_internal() {
        let h = Harness::new().await;
        // ユーザーが永続ストアに存在しないリセット要求を直接作る
        let token = generate_token();
        h.resets
            .put(PasswordResetRequest::new(
                hash_token(&token),
                "deleted@gmail.com".to_string(),
                h.clock.now(),
                Duration::minutes(15),
            ))
            .await
            .unwrap();

        let result = h.service.reset_password(&token, "new-password").await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
