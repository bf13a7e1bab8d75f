use time::{Duration, OffsetDateTime};

use crate::models::Role;
use crate::repositories::EphemeralRecord;

/// メール確認待ちの仮登録
///
/// token_hash は送信したトークンの SHA256 ハッシュ。
/// 平文トークンはメールにのみ含まれ、ストアには保存しない。
#[derive(Debug, Clone)]
pub struct PendingRegistration {
    pub token_hash: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl PendingRegistration {
    /// 再送用に新しいトークンで作り直す（氏名・パスワード・ロールは引き継ぐ）
    pub fn reissued(&self, token_hash: String, now: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            token_hash,
            created_at: now,
            expires_at: now + ttl,
            ..self.clone()
        }
    }
}

impl EphemeralRecord for PendingRegistration {
    fn token(&self) -> &str {
        &self.token_hash
    }

    fn email(&self) -> &str {
        &self.email
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}
