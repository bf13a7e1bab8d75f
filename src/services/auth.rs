use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::AppError;
use crate::models::User;
use crate::repositories::UserRepository;
use crate::services::token::normalize_email;

/// タイミング攻撃対策用のダミーハッシュ
///
/// `hash_password` と同じパラメータ（m=19456, t=2, p=1, 32バイト出力）の有効な PHC 文字列。
/// どのパスワードとも一致しないが、検証では本物と同じ argon2 計算が走る。
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$dmVyaWdhdGUtZHVtbXkhIQ$skv9rXdO5CSocxp8mgzUskxPZHvrN5BUrmq7jbBd9qc";

/// パスワードをargon2idでハッシュ化
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュ生成エラー");
            AppError::Internal(anyhow::anyhow!("password hash error"))
        })?;
    Ok(hash.to_string())
}

/// パスワードを検証
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| {
        tracing::error!(error = ?e, "パスワードハッシュのパースエラー");
        AppError::Internal(anyhow::anyhow!("password hash parse error"))
    })?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// 認証サービス
///
/// 資格情報の照合のみを行う。セッショントークンの発行は外部に委譲する。
#[derive(Clone)]
pub struct AuthService {
    user_repo: Arc<dyn UserRepository>,
}

impl AuthService {
    /// 新しい AuthService を作成
    pub fn new(user_repo: Arc<dyn UserRepository>) -> Self {
        Self { user_repo }
    }

    /// ユーザー認証を実行
    ///
    /// タイミング攻撃対策: ユーザーが存在しない場合もダミーのパスワード検証を実行
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = normalize_email(email);
        let Some(user) = self.user_repo.find_by_email(&email).await? else {
            let _ = verify_password(password, DUMMY_HASH);
            tracing::warn!(email = %email, "認証失敗: ユーザー不在");
            return Err(AppError::Authentication("invalid_credentials".to_string()));
        };

        if !verify_password(password, &user.password_hash)? {
            tracing::warn!(email = %email, "認証失敗: パスワード不一致");
            return Err(AppError::Authentication("invalid_credentials".to_string()));
        }

        if !user.enabled {
            tracing::warn!(email = %email, "認証失敗: 無効化されたアカウント");
            return Err(AppError::NotAuthorized);
        }

        tracing::info!(email = %email, "認証成功");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::repositories::InMemoryUserRepository;
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn seed(repo: &InMemoryUserRepository, email: &str, password: &str, enabled: bool) {
        let now = OffsetDateTime::now_utc();
        repo.save(&User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Hanako".to_string(),
            last_name: "Suzuki".to_string(),
            password_hash: hash_password(password).unwrap(),
            role: Role::User,
            enabled,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("password123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("password123", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_dummy_hash_runs_full_verification() {
        // パースに失敗すると argon2 計算が省略され、応答時間でユーザー有無が分かってしまう
        assert!(matches!(verify_password("whatever", DUMMY_HASH), Ok(false)));

        let real = hash_password("password123").unwrap();
        let dummy = PasswordHash::new(DUMMY_HASH).unwrap();
        let real = PasswordHash::new(&real).unwrap();
        assert_eq!(dummy.algorithm, real.algorithm);
        assert_eq!(dummy.params, real.params);
        assert_eq!(
            dummy.hash.map(|h| h.len()),
            real.hash.map(|h| h.len())
        );
    }

    #[test]
    fn test_verify_invalid_hash_format() {
        assert!(verify_password("password123", "invalid_hash_format").is_err());
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let repo = Arc::new(InMemoryUserRepository::new());
        seed(&repo, "user@gmail.com", "password123", true).await;
        let service = AuthService::new(repo);

        let user = service
            .authenticate(" User@Gmail.com", "password123")
            .await
            .unwrap();
        assert_eq!(user.email, "user@gmail.com");
    }

    #[tokio::test]
    async fn test_authenticate_wrong_password() {
        let repo = Arc::new(InMemoryUserRepository::new());
        seed(&repo, "user@gmail.com", "password123", true).await;
        let service = AuthService::new(repo);

        let result = service.authenticate("user@gmail.com", "nope-nope").await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_authenticate_unknown_user() {
        let service = AuthService::new(Arc::new(InMemoryUserRepository::new()));
        let result = service.authenticate("ghost@gmail.com", "password123").await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_authenticate_disabled_user() {
        let repo = Arc::new(InMemoryUserRepository::new());
        seed(&repo, "user@gmail.com", "password123", false).await;
        let service = AuthService::new(repo);

        let result = service.authenticate("user@gmail.com", "password123").await;
        assert!(matches!(result, Err(AppError::NotAuthorized)));
    }
}
