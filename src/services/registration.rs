use std::sync::Arc;

use time::OffsetDateTime;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{PendingRegistration, Role, User};
use crate::repositories::{EphemeralStore, StoreError, UserRepository};
use crate::services::auth::hash_password;
use crate::services::domain_policy::EmailDomainPolicy;
use crate::services::email::Notifier;
use crate::services::token::{generate_token, hash_token, normalize_email};

/// 登録リクエストの入力
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

/// 仮登録の受付結果
#[derive(Debug, Clone)]
pub struct RegistrationReceipt {
    pub email: String,
    pub role: Role,
    pub expires_at: OffsetDateTime,
}

/// 登録・メール確認サービス
///
/// 状態遷移: 未登録 → 確認待ち（仮登録） → 確認済み（永続ユーザー）。
/// 確認待ちは有効期限切れで未登録に戻る。
#[derive(Clone)]
pub struct RegistrationService {
    user_repo: Arc<dyn UserRepository>,
    pending: Arc<dyn EphemeralStore<PendingRegistration>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    domains: Arc<EmailDomainPolicy>,
    config: Arc<Config>,
    dispatcher: TaskTracker,
}

impl RegistrationService {
    /// 新しい RegistrationService を作成
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        pending: Arc<dyn EphemeralStore<PendingRegistration>>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        let domains = Arc::new(EmailDomainPolicy::new(&config.allowed_email_domains));
        Self {
            user_repo,
            pending,
            notifier,
            clock,
            domains,
            config,
            dispatcher: TaskTracker::new(),
        }
    }

    /// 非同期メール送信タスクの管理（シャットダウン時の待ち合わせ用）
    pub fn dispatcher(&self) -> &TaskTracker {
        &self.dispatcher
    }

    /// 仮登録を作成し、確認メールを送る
    ///
    /// # Security
    /// - パスワード・トークンはログに出力しない
    /// - 確認メールの送信失敗は呼び出し側に返さない（ログのみ）
    pub async fn register(&self, input: NewRegistration) -> Result<RegistrationReceipt, AppError> {
        let email = normalize_email(&input.email);

        if !self.domains.is_allowed(&email) {
            tracing::info!(email = %email, "登録拒否: 許可されていないドメイン");
            return Err(AppError::Validation(format!(
                "このメールドメインは利用できません。利用可能なドメイン: {}",
                self.domains.allowed_list()
            )));
        }

        if self.user_repo.exists_by_email(&email).await? {
            return Err(AppError::AlreadyRegistered);
        }

        if self.pending.get_by_email(&email).await?.is_some() {
            return Err(AppError::VerificationPending);
        }

        // 最初のユーザーは管理者（確認待ちの仮登録は数えない）
        let role = if self.user_repo.count_all().await? == 0 {
            Role::Admin
        } else {
            Role::User
        };

        let password_hash = hash_password(&input.password)?;
        let token = generate_token();
        let now = self.clock.now();
        let record = PendingRegistration {
            token_hash: hash_token(&token),
            email: email.clone(),
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            password_hash,
            role,
            created_at: now,
            expires_at: now + self.config.pending_registration_ttl(),
        };
        let expires_at = record.expires_at;

        self.pending.put(record).await.map_err(|e| match e {
            // 同時登録の競合に負けた場合
            StoreError::DuplicateEmail => AppError::VerificationPending,
            other => AppError::from(other),
        })?;

        tracing::info!(email = %email, role = %role, "仮登録を作成");

        self.dispatch_verification(email.clone(), self.verification_link(&token));

        Ok(RegistrationReceipt {
            email,
            role,
            expires_at,
        })
    }

    /// トークンを確認し、仮登録を永続ユーザーに昇格する
    ///
    /// 永続化に失敗した場合は仮登録を戻し、再試行できるようにする
    pub async fn verify(&self, token: &str) -> Result<User, AppError> {
        let token_hash = hash_token(token);
        let pending = self
            .pending
            .take(&token_hash)
            .await?
            .ok_or(AppError::InvalidOrExpiredToken)?;

        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            email: pending.email.clone(),
            first_name: pending.first_name.clone(),
            last_name: pending.last_name.clone(),
            password_hash: pending.password_hash.clone(),
            role: pending.role,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        match self.user_repo.save(&user).await {
            Ok(saved) => {
                tracing::info!(user_id = %saved.id, email = %saved.email, role = %saved.role, "メールアドレス確認完了");
                Ok(saved)
            }
            // 同じメールアドレスが既に確認済みなら、再試行しても成功しないので復元しない
            Err(AppError::AlreadyRegistered) => {
                tracing::warn!(email = %pending.email, "確認済みユーザーが既に存在するため仮登録を破棄");
                Err(AppError::AlreadyRegistered)
            }
            Err(e) => {
                tracing::warn!(email = %pending.email, "ユーザー保存に失敗したため仮登録を復元");
                if let Err(restore_err) = self.pending.put(pending).await {
                    tracing::error!(error = ?restore_err, "仮登録の復元に失敗");
                }
                Err(e)
            }
        }
    }

    /// 確認メールを再送する（新しいトークンを発行し、古いトークンは無効化）
    ///
    /// 初回登録と異なり、送信失敗は呼び出し側にエラーとして返す
    pub async fn resend_verification(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email);

        // 確認済みのメールアドレスには仮登録が残っていても再送しない
        if self.user_repo.exists_by_email(&email).await? {
            return Err(AppError::RegistrationNotFound);
        }

        let token = generate_token();
        let token_hash = hash_token(&token);
        let now = self.clock.now();
        let ttl = self.config.pending_registration_ttl();

        // 参照と置き換えは一度のロック内で行う
        self.pending
            .refresh_by_email(
                &email,
                Box::new(move |current: &PendingRegistration| {
                    current.reissued(token_hash, now, ttl)
                }),
            )
            .await
            .map_err(|e| match e {
                // 確認待ちの登録が存在しない（未登録・期限切れ・確認済み）
                StoreError::NotFound => AppError::RegistrationNotFound,
                other => AppError::from(other),
            })?;

        self.notifier
            .send_verification(&email, &self.verification_link(&token))
            .await
            .map_err(|e| {
                tracing::error!(email = %email, error = ?e, "確認メールの再送に失敗");
                AppError::NotificationDeliveryFailed(e)
            })?;

        tracing::info!(email = %email, "確認メールを再送");
        Ok(())
    }

    /// 確認メールをバックグラウンドで送る（失敗はログのみ）
    fn dispatch_verification(&self, email: String, link: String) {
        let notifier = self.notifier.clone();
        self.dispatcher.spawn(async move {
            if let Err(e) = notifier.send_verification(&email, &link).await {
                tracing::error!(email = %email, error = ?e, "確認メールの送信に失敗");
            }
        });
    }

    fn verification_link(&self, token: &str) -> String {
        format!("{}?token={}", self.config.verification_url_base, token)
    }
}
