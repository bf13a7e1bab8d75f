use axum::{Json, extract::State};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::handlers::validation::{not_blank, validate_request};
use crate::state::AppState;

// === リセットリクエスト ===

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[garde(email)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /api/v1/auth/forgot-password
///
/// # Security
/// 常に同じレスポンスを返す（ユーザー存在有無を漏洩しない）
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    validate_request(&request)?;

    state
        .password_reset_service
        .forgot_password(&request.email)
        .await?;

    Ok(Json(MessageResponse {
        message: "アカウントが存在する場合、パスワードリセット用のリンクを送信しました",
    }))
}

// === パスワードリセット実行 ===

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[garde(custom(not_blank))]
    pub token: String,
    #[garde(length(min = 8, max = 128))]
    pub new_password: String,
}

/// POST /api/v1/auth/reset-password
///
/// # Security
/// - token, new_password はログに出力しない
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    validate_request(&request)?;

    state
        .password_reset_service
        .reset_password(&request.token, &request.new_password)
        .await?;

    Ok(Json(MessageResponse {
        message: "パスワードが更新されました。ログインしてください",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_email() {
        let request = ForgotPasswordRequest {
            email: "".to_string(),
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_validate_valid_email() {
        let request = ForgotPasswordRequest {
            email: "test@gmail.com".to_string(),
        };
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn test_validate_empty_token() {
        let request = ResetPasswordRequest {
            token: "".to_string(),
            new_password: "password123".to_string(),
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_validate_short_password() {
        let request = ResetPasswordRequest {
            token: "valid-token".to_string(),
            new_password: "short".to_string(),
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_validate_too_long_password() {
        let request = ResetPasswordRequest {
            token: "valid-token".to_string(),
            new_password: "x".repeat(129),
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_validate_valid_reset_request() {
        let request = ResetPasswordRequest {
            token: "valid-token".to_string(),
            new_password: "password123".to_string(),
        };
        assert!(validate_request(&request).is_ok());
    }
}
