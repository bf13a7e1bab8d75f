use time::{Duration, OffsetDateTime};

use crate::repositories::EphemeralRecord;

/// 一度きりのパスワードリセット要求
#[derive(Debug, Clone)]
pub struct PasswordResetRequest {
    pub token_hash: String,
    pub email: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl PasswordResetRequest {
    pub fn new(token_hash: String, email: String, now: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            token_hash,
            email,
            created_at: now,
            expires_at: now + ttl,
        }
    }
}

impl EphemeralRecord for PasswordResetRequest {
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
