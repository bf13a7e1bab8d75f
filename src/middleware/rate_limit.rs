use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::RateLimitDecision;
use crate::state::AppState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// レートリミットミドルウェア
///
/// クライアント識別子ごとにトークンを1つ消費し、枯渇していれば 429 を返す。
/// 状態遷移を伴う処理より前に評価される。
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(request.headers(), peer, state.config.trust_forwarded_for);

    match state.rate_limiter.try_consume(&key).await {
        RateLimitDecision::Allowed { .. } => Ok(next.run(request).await),
        RateLimitDecision::Denied { retry_after } => {
            tracing::warn!(client = %key, path = %request.uri().path(), "レートリミット超過");
            Err(AppError::RateLimitExceeded {
                retry_after_secs: retry_after.whole_seconds().max(1) as u64,
            })
        }
    }
}

/// クライアント識別子を決める
///
/// プロキシ配下では X-Forwarded-For の先頭を使う（信頼設定時のみ）
pub fn client_key(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(client) = forwarded {
            return client.to_string();
        }
    }
    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.10:54321".parse().unwrap()
    }

    #[test]
    fn test_client_key_uses_peer_ip() {
        let headers = HeaderMap::new();
        assert_eq!(client_key(&headers, peer(), false), "192.0.2.10");
    }

    #[test]
    fn test_client_key_ignores_forwarded_when_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        assert_eq!(client_key(&headers, peer(), false), "192.0.2.10");
    }

    #[test]
    fn test_client_key_uses_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_key(&headers, peer(), true), "203.0.113.7");
    }

    #[test]
    fn test_client_key_falls_back_on_empty_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" "));
        assert_eq!(client_key(&headers, peer(), true), "192.0.2.10");
    }
}
