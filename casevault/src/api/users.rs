//! ユーザー管理API
//!
//! Admin専用のユーザーCRUD操作

use crate::audit::types::AuditContext;
use crate::auth::{claims_user_id, password, require_admin};
use crate::common::auth::{Claims, User, UserRole};
use crate::common::error::VaultError;
use crate::db::users::UserUpdate;
use crate::AppState;
use axum::{
    extract::{Path, State},
    response::Response,
    Extension, Json,
};
use once_cell::sync::Lazy;
use regex::Regex;

use super::error::AppError;
use super::{created, no_content, with_audit};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 生成パスワードの長さ
const GENERATED_PASSWORD_LEN: usize = 16;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{3,64}$").expect("valid username regex"));

/// ユーザー作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// ユーザー名
    pub username: String,
    /// パスワード（省略時は生成）
    pub password: Option<String>,
    /// ロール
    pub role: UserRole,
}

/// ユーザー作成レスポンス
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    /// ユーザー情報
    pub user: User,
    /// 自動生成されたパスワード（管理者に一度だけ表示）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

/// ユーザー更新リクエスト
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    /// ユーザー名
    pub username: Option<String>,
    /// パスワード
    pub password: Option<String>,
    /// ロール
    pub role: Option<UserRole>,
    /// 有効フラグ
    pub active: Option<bool>,
}

/// ユーザー名の形式を検証
fn validate_username(username: &str) -> Result<(), VaultError> {
    if !USERNAME_RE.is_match(username) {
        return Err(VaultError::validation(
            "username must be 3-64 characters of letters, digits, '_', '.' or '-'",
        ));
    }
    Ok(())
}

/// GET /api/v1/users - ユーザー一覧取得
pub async fn list_users(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, AppError> {
    require_admin(&claims)?;
    Ok(Json(crate::db::users::list(&state.db_pool).await?))
}

/// GET /api/v1/users/{id}
pub async fn get_user(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    require_admin(&claims)?;
    let user = crate::db::users::find_by_id(&state.db_pool, id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("user {}", id)))?;
    Ok(Json(user))
}

/// POST /api/v1/users - ユーザー作成
///
/// パスワードを省略した場合はランダムに生成し、レスポンスで一度だけ返す。
///
/// # Returns
/// * `201 Created` - 作成されたユーザー
/// * `400 Bad Request` - ユーザー名・パスワードの形式不正
/// * `403 Forbidden` - Admin権限なし
/// * `409 Conflict` - ユーザー名重複
pub async fn create_user(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    validate_username(&request.username)?;

    let (plain, generated) = match request.password {
        Some(p) => {
            password::validate_password(&p)?;
            (p, false)
        }
        None => (
            crate::auth::generate_random_token(GENERATED_PASSWORD_LEN),
            true,
        ),
    };
    let hash = password::hash_password(&plain)?;
    let user = crate::db::users::create(&state.db_pool, &request.username, &hash, request.role)
        .await?;

    tracing::info!(user_id = %user.id, username = %user.username, role = %user.role.as_str(), "User created");
    let context = AuditContext::resource("user", user.id)
        .with_detail(serde_json::json!({ "username": user.username, "role": user.role }));
    Ok(created(
        Json(CreateUserResponse {
            user,
            generated_password: generated.then_some(plain),
        }),
        context,
    ))
}

/// PUT /api/v1/users/{id} - ユーザー更新
///
/// 自分自身の降格・無効化はできない。最後の有効な管理者も降格・無効化できない。
pub async fn update_user(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;

    let removes_admin = request.role.is_some_and(|r| r != UserRole::Admin)
        || request.active == Some(false);
    if removes_admin {
        if claims_user_id(&claims) == Some(id) {
            return Err(VaultError::Conflict(
                "You cannot demote or deactivate your own account".to_string(),
            )
            .into());
        }
        if crate::db::users::is_last_active_admin(&state.db_pool, id).await? {
            return Err(VaultError::Conflict(
                "Cannot demote or deactivate the last active admin".to_string(),
            )
            .into());
        }
    }

    if let Some(username) = &request.username {
        validate_username(username)?;
    }
    let hash = match &request.password {
        Some(p) => {
            password::validate_password(p)?;
            Some(password::hash_password(p)?)
        }
        None => None,
    };

    let user = crate::db::users::update(
        &state.db_pool,
        id,
        UserUpdate {
            username: request.username.as_deref(),
            password_hash: hash.as_deref(),
            role: request.role,
            active: request.active,
        },
    )
    .await?;

    let context = AuditContext::resource("user", user.id).with_detail(serde_json::json!({
        "role": request.role,
        "active": request.active,
        "password_changed": request.password.is_some(),
    }));
    Ok(with_audit(Json(user), context))
}

/// DELETE /api/v1/users/{id} - ユーザー削除
///
/// # Returns
/// * `204 No Content` - 削除成功
/// * `403 Forbidden` - Admin権限なし
/// * `404 Not Found` - ユーザーが見つからない
/// * `409 Conflict` - 自分自身・最後の管理者
pub async fn delete_user(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;

    if claims_user_id(&claims) == Some(id) {
        return Err(VaultError::Conflict("You cannot delete your own account".to_string()).into());
    }
    if crate::db::users::is_last_active_admin(&state.db_pool, id).await? {
        return Err(VaultError::Conflict("Cannot delete the last active admin".to_string()).into());
    }

    crate::db::users::delete(&state.db_pool, id).await?;
    tracing::info!(user_id = %id, "User deleted");
    Ok(no_content(AuditContext::resource("user", id)))
}
