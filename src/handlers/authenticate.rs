use axum::{Json, extract::State};
use garde::Validate;
use serde::Deserialize;

use crate::error::AppError;
use crate::handlers::validation::{not_blank, validate_request};
use crate::models::User;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AuthenticateRequest {
    #[garde(email)]
    pub email: String,
    #[garde(custom(not_blank))]
    pub password: String,
}

/// POST /api/v1/auth/authenticate
///
/// 認証に成功したユーザーのプロフィールを返す
pub async fn authenticate(
    State(state): State<AppState>,
    Json(request): Json<AuthenticateRequest>,
) -> Result<Json<User>, AppError> {
    validate_request(&request)?;

    let user = state
        .auth_service
        .authenticate(&request.email, &request.password)
        .await?;

    Ok(Json(user))
}
