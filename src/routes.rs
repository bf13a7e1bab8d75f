use axum::{
    Router, middleware,
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::middleware::rate_limit;
use crate::state::AppState;

/// Router の構築
///
/// `/api/v1/auth` 配下は全てレートリミットの後ろに置く。
/// 接続元アドレスを使うため `into_make_service_with_connect_info` で起動すること。
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/authenticate", post(handlers::authenticate))
        .route("/verify", get(handlers::verify_email))
        .route("/resend-verification", post(handlers::resend_verification))
        .route("/forgot-password", post(handlers::forgot_password))
        .route("/reset-password", post(handlers::reset_password))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let router = Router::new()
        .route("/api/health", get(handlers::health_check))
        .nest("/api/v1/auth", auth_routes);

    let router = match cors_layer(state.config.cors_allowed_origin.as_deref()) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

/// CORS 設定（許可オリジンが設定されている場合のみ）
fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
    let origin = origin?;
    match HeaderValue::from_str(origin) {
        Ok(origin) => Some(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        ),
        Err(e) => {
            tracing::warn!(error = ?e, origin = %origin, "CORS オリジンが不正なため無効化");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::{
        body::Body,
        extract::connect_info::MockConnectInfo,
        http::{Request, StatusCode},
    };
    use time::macros::datetime;
    use tower::ServiceExt;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::repositories::InMemoryUserRepository;
    use crate::services::email::RecordingNotifier;

    fn setup() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
        let state = AppState::from_parts(
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(RecordingNotifier::new()),
            clock.clone(),
            Config::for_tests(),
        );
        (state, clock)
    }

    fn app(state: &AppState, peer: &str) -> Router {
        let peer: SocketAddr = peer.parse().unwrap();
        create_router(state.clone()).layer(MockConnectInfo(peer))
    }

    fn forgot_password() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/auth/forgot-password")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":"ghost@gmail.com"}"#))
            .unwrap()
    }

    fn health() -> Request<Body> {
        Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_sixth_auth_request_is_rejected() {
        let (state, _clock) = setup();
        let app = app(&state, "192.0.2.10:40000");

        for _ in 0..5 {
            let response = app.clone().oneshot(forgot_password()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(forgot_password()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 0 && retry_after <= 600);
    }

    #[tokio::test]
    async fn test_limit_is_shared_across_auth_routes() {
        let (state, _clock) = setup();
        let app = app(&state, "192.0.2.10:40000");

        for _ in 0..5 {
            app.clone().oneshot(forgot_password()).await.unwrap();
        }

        // 状態遷移の前に拒否される（存在しないトークンでも 400 ではなく 429）
        let verify = Request::builder()
            .uri("/api/v1/auth/verify?token=no-such-token")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(verify).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_is_not_rate_limited() {
        let (state, _clock) = setup();
        let app = app(&state, "192.0.2.10:40000");

        for _ in 0..6 {
            app.clone().oneshot(forgot_password()).await.unwrap();
        }
        for _ in 0..10 {
            let response = app.clone().oneshot(health()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_clients_have_separate_buckets() {
        let (state, _clock) = setup();
        let first = app(&state, "192.0.2.10:40000");
        let second = app(&state, "192.0.2.20:40000");

        for _ in 0..6 {
            first.clone().oneshot(forgot_password()).await.unwrap();
        }

        let response = second.oneshot(forgot_password()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refill_after_window() {
        let (state, clock) = setup();
        let app = app(&state, "192.0.2.10:40000");

        for _ in 0..6 {
            app.clone().oneshot(forgot_password()).await.unwrap();
        }
        clock.advance(time::Duration::minutes(10));

        let response = app.oneshot(forgot_password()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_cors_layer_requires_valid_origin() {
        assert!(cors_layer(None).is_none());
        assert!(cors_layer(Some("https://app.example.com")).is_some());
        assert!(cors_layer(Some("bad\norigin")).is_none());
    }
}
