//! 認証API
//!
//! ログイン、認証情報確認、パスワード変更

use crate::audit::types::{AuditAction, AuditContext, AuthFailureInfo};
use crate::auth::{claims_user_id, jwt, password};
use crate::common::auth::{Claims, User};
use crate::common::error::VaultError;
use crate::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension, Json,
};

use super::error::AppError;
use super::with_audit;
use serde::{Deserialize, Serialize};

/// ログインリクエスト
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// ユーザー名
    pub username: String,
    /// パスワード
    pub password: String,
}

/// ログインレスポンス
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// JWTトークン
    pub token: String,
    /// トークン有効期限（秒）
    pub expires_in: i64,
    /// ユーザー情報
    pub user: User,
}

/// パスワード変更リクエスト
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    /// 現在のパスワード
    pub current_password: String,
    /// 新しいパスワード
    pub new_password: String,
}

const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// 認証失敗レスポンス（監査用の失敗情報付き）
fn login_failure(username: &str, reason: &str) -> Response {
    let mut response =
        AppError(VaultError::Authentication(INVALID_CREDENTIALS.to_string())).into_response();
    response.extensions_mut().insert(AuthFailureInfo {
        attempted_username: Some(username.to_string()),
        reason: reason.to_string(),
    });
    response
}

/// POST /api/v1/auth/login - ログイン
///
/// ユーザー名とパスワードで認証し、JWTトークンを発行する。
/// 失敗時は理由を区別せず401を返し、理由は監査ログにのみ残す。
///
/// # Returns
/// * `200 OK` - ログイン成功（JWT token）
/// * `401 Unauthorized` - 認証失敗・無効ユーザー
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let Some(user) = crate::db::users::find_by_username(&state.db_pool, &request.username).await?
    else {
        return Ok(login_failure(&request.username, "unknown_user"));
    };

    if !password::verify_password(&request.password, &user.password_hash)? {
        return Ok(login_failure(&request.username, "invalid_password"));
    }
    if !user.active {
        return Ok(login_failure(&request.username, "account_disabled"));
    }

    if let Err(e) = crate::db::users::update_last_login(&state.db_pool, user.id).await {
        tracing::warn!("Failed to update last login: {}", e);
    }

    let token = jwt::create_jwt(
        &user.id.to_string(),
        &user.username,
        user.role,
        &state.jwt_secret,
    )?;
    let claims = jwt::verify_jwt(&token, &state.jwt_secret)?;
    tracing::info!(user_id = %user.id, username = %user.username, "User logged in");

    let context = AuditContext::resource("user", user.id).with_action(AuditAction::Login);
    let mut response = with_audit(
        Json(LoginResponse {
            token,
            expires_in: jwt::token_ttl_secs(),
            user,
        }),
        context,
    );
    // ログインしたユーザーを監査ログのアクターにする
    response.extensions_mut().insert(claims);
    Ok(response)
}

async fn current_user(state: &AppState, claims: &Claims) -> Result<User, VaultError> {
    let id = claims_user_id(claims)
        .ok_or_else(|| VaultError::Authentication("Invalid token subject".to_string()))?;
    crate::db::users::find_by_id(&state.db_pool, id)
        .await?
        .filter(|u| u.active)
        .ok_or_else(|| VaultError::Authentication("User no longer exists".to_string()))
}

/// GET /api/v1/auth/me - 認証情報確認
pub async fn me(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    Ok(Json(current_user(&state, &claims).await?))
}

/// PUT /api/v1/auth/password - 自分のパスワードを変更
///
/// 現在のパスワードの再入力を要求する。
pub async fn change_password(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Response, AppError> {
    let user = current_user(&state, &claims).await?;

    if !password::verify_password(&request.current_password, &user.password_hash)? {
        return Err(VaultError::Authentication("Current password is incorrect".to_string()).into());
    }
    password::validate_password(&request.new_password)?;
    let hash = password::hash_password(&request.new_password)?;

    crate::db::users::update(
        &state.db_pool,
        user.id,
        crate::db::users::UserUpdate {
            password_hash: Some(&hash),
            ..Default::default()
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(super::no_content(
        AuditContext::resource("user", user.id)
            .with_detail(serde_json::json!({ "field": "password" })),
    ))
}
