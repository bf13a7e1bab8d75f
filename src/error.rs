use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::repositories::StoreError;
use crate::services::email::NotifyError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("認証エラー: {0}")]
    Authentication(String),

    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),

    #[error("このメールアドレスは既に登録されています")]
    AlreadyRegistered,

    #[error("確認メールは既に送信されています")]
    VerificationPending,

    #[error("確認待ちの登録が見つかりません")]
    RegistrationNotFound,

    #[error("無効または期限切れのリンクです")]
    InvalidOrExpiredToken,

    #[error("この操作を行う権限がありません")]
    NotAuthorized,

    #[error("メール送信に失敗しました")]
    NotificationDeliveryFailed(#[source] NotifyError),

    #[error("リクエストが多すぎます")]
    RateLimitExceeded { retry_after_secs: u64 },
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Internal(anyhow::Error::new(e))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "メールアドレスまたはパスワードが正しくありません".to_string(),
            ),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::AlreadyRegistered => (
                StatusCode::CONFLICT,
                "このメールアドレスは既に登録されています".to_string(),
            ),
            Self::VerificationPending => (
                StatusCode::CONFLICT,
                "確認メールは既に送信されています。受信箱を確認してください".to_string(),
            ),
            Self::RegistrationNotFound => (
                StatusCode::NOT_FOUND,
                "確認待ちの登録が見つからないか、既に確認済みです".to_string(),
            ),
            Self::InvalidOrExpiredToken => (
                StatusCode::BAD_REQUEST,
                "無効または期限切れのリンクです".to_string(), // 存在有無の漏洩防止
            ),
            Self::NotAuthorized => (
                StatusCode::FORBIDDEN,
                "この操作を行う権限がありません".to_string(),
            ),
            Self::NotificationDeliveryFailed(e) => {
                tracing::error!(error = ?e, "メール送信エラー");
                (
                    StatusCode::BAD_GATEWAY,
                    "メールの送信に失敗しました".to_string(),
                )
            }
            Self::RateLimitExceeded { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorResponse {
                        error: "リクエストが多すぎます。しばらくしてから再試行してください"
                            .to_string(),
                    }),
                )
                    .into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(*retry_after_secs),
                );
                return response;
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
