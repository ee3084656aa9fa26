// 認証ミドルウェア実装

use crate::api::error::AppError;
use crate::common::error::VaultError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

/// Authorizationヘッダーから "Bearer {token}" を抽出してJWT検証を行う
///
/// 検証済みのClaimsはrequestに格納し、監査ミドルウェアが参照できるよう
/// responseにも複製する。
///
/// # Returns
/// * `Ok(Response)` - 認証成功
/// * `Err(AppError)` - 認証失敗、401 Unauthorized
pub async fn jwt_auth_middleware(
    State(jwt_secret): State<String>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            VaultError::Authentication("Missing Authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        VaultError::Authentication("Invalid Authorization header format".to_string())
    })?;

    let claims = crate::auth::jwt::verify_jwt(token, &jwt_secret).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        e
    })?;

    request.extensions_mut().insert(claims.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(claims);
    Ok(response)
}
