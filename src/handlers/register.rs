use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::handlers::validation::{not_blank, validate_request};
use crate::models::{Role, User};
use crate::services::NewRegistration;
use crate::state::AppState;

// === 仮登録 ===

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(email)]
    pub email: String,
    #[garde(custom(not_blank))]
    pub first_name: String,
    #[garde(custom(not_blank))]
    pub last_name: String,
    #[garde(length(min = 8, max = 128))]
    pub password: String, // SecretBox不要（Deserialize後すぐハッシュ化）
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: &'static str,
    pub email: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// POST /api/v1/auth/register
///
/// # Security
/// - パスワードはログに出力しない
/// - 確認トークンはメールでのみ届ける（レスポンスに含めない）
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    validate_request(&request)?;

    let receipt = state
        .registration_service
        .register(NewRegistration {
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            password: request.password,
        })
        .await?;

    Ok(Json(RegisterResponse {
        message: "確認メールを送信しました。24時間以内にリンクを開いてください",
        email: receipt.email,
        role: receipt.role,
        expires_at: receipt.expires_at,
    }))
}

// === メールアドレス確認 ===

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub message: &'static str,
    pub user: User,
}

/// GET /api/v1/auth/verify?token=...
///
/// 確認後のリダイレクト先が設定されていれば 302、なければ JSON を返す
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Response, AppError> {
    if query.token.trim().is_empty() {
        return Err(AppError::InvalidOrExpiredToken);
    }

    let user = state.registration_service.verify(&query.token).await?;

    if let Some(redirect) = &state.config.verified_redirect_url {
        return Ok((StatusCode::FOUND, [(header::LOCATION, redirect.clone())]).into_response());
    }

    Ok(Json(VerifyResponse {
        message: "メールアドレスを確認しました",
        user,
    })
    .into_response())
}

// === 確認メール再送 ===

#[derive(Debug, Deserialize, Validate)]
pub struct ResendVerificationRequest {
    #[garde(email)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ResendVerificationResponse {
    pub message: &'static str,
}

/// POST /api/v1/auth/resend-verification
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(request): Json<ResendVerificationRequest>,
) -> Result<Json<ResendVerificationResponse>, AppError> {
    validate_request(&request)?;

    state
        .registration_service
        .resend_verification(&request.email)
        .await?;

    Ok(Json(ResendVerificationResponse {
        message: "確認メールを再送しました",
    }))
}
