// ユーザーCRUD操作

use crate::common::auth::{User, UserRole};
use crate::common::error::VaultError;
use crate::db::{is_unique_violation, parse_enum, parse_ts, parse_ts_opt, parse_uuid, ts};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, password_hash, role, active, created_at, last_login";

/// ユーザー更新内容（Noneは変更なし）
#[derive(Debug, Default, Clone)]
pub struct UserUpdate<'a> {
    /// 新しいユーザー名
    pub username: Option<&'a str>,
    /// 新しいパスワードハッシュ
    pub password_hash: Option<&'a str>,
    /// 新しいロール
    pub role: Option<UserRole>,
    /// 有効フラグ
    pub active: Option<bool>,
}

/// ユーザーを作成
///
/// # Returns
/// * `Ok(User)` - 作成されたユーザー
/// * `Err(VaultError::Conflict)` - ユーザー名重複
pub async fn create(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    role: UserRole,
) -> Result<User, VaultError> {
    let id = Uuid::new_v4();
    let created_at = Utc::now();

    sqlx::query(
        "INSERT INTO users (id, username, password_hash, role, active, created_at, last_login)
         VALUES (?, ?, ?, ?, 1, ?, NULL)",
    )
    .bind(id.to_string())
    .bind(username)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(ts(&created_at))
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            VaultError::Conflict(format!("Username '{}' already exists", username))
        } else {
            VaultError::Database(format!("Failed to create user: {}", e))
        }
    })?;

    Ok(User {
        id,
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        role,
        active: true,
        created_at,
        last_login: None,
    })
}

/// ユーザー名でユーザーを検索
pub async fn find_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>, VaultError> {
    let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to find user: {}", e)))?;

    row.map(User::try_from).transpose()
}

/// IDでユーザーを検索
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<User>, VaultError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to find user: {}", e)))?;

    row.map(User::try_from).transpose()
}

/// すべてのユーザーを取得
pub async fn list(pool: &SqlitePool) -> Result<Vec<User>, VaultError> {
    let sql = format!("SELECT {} FROM users ORDER BY created_at DESC", USER_COLUMNS);
    let rows = sqlx::query_as::<_, UserRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to list users: {}", e)))?;

    rows.into_iter().map(User::try_from).collect()
}

/// ユーザーを更新
pub async fn update(pool: &SqlitePool, id: Uuid, changes: UserUpdate<'_>) -> Result<User, VaultError> {
    let current = find_by_id(pool, id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("user {}", id)))?;

    let new_username = changes.username.unwrap_or(&current.username);
    let new_password_hash = changes.password_hash.unwrap_or(&current.password_hash);
    let new_role = changes.role.unwrap_or(current.role);
    let new_active = changes.active.unwrap_or(current.active);

    sqlx::query(
        "UPDATE users SET username = ?, password_hash = ?, role = ?, active = ? WHERE id = ?",
    )
    .bind(new_username)
    .bind(new_password_hash)
    .bind(new_role.as_str())
    .bind(new_active as i64)
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            VaultError::Conflict(format!("Username '{}' already exists", new_username))
        } else {
            VaultError::Database(format!("Failed to update user: {}", e))
        }
    })?;

    Ok(User {
        id,
        username: new_username.to_string(),
        password_hash: new_password_hash.to_string(),
        role: new_role,
        active: new_active,
        created_at: current.created_at,
        last_login: current.last_login,
    })
}

/// 最終ログイン日時を更新
pub async fn update_last_login(pool: &SqlitePool, id: Uuid) -> Result<(), VaultError> {
    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(ts(&Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to update last login: {}", e)))?;

    Ok(())
}

/// ユーザーを削除
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), VaultError> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to delete user: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("user {}", id)));
    }
    Ok(())
}

/// 初回起動チェック（ユーザーが0人かどうか）
pub async fn is_first_boot(pool: &SqlitePool) -> Result<bool, VaultError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to check first boot: {}", e)))?;

    Ok(count == 0)
}

/// 最後の有効な管理者か（削除・降格・無効化前の検証用）
pub async fn is_last_active_admin(pool: &SqlitePool, user_id: Uuid) -> Result<bool, VaultError> {
    let user = find_by_id(pool, user_id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("user {}", user_id)))?;

    if user.role != UserRole::Admin || !user.active {
        return Ok(false);
    }

    let admin_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin' AND active = 1")
            .fetch_one(pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to count admins: {}", e)))?;

    Ok(admin_count <= 1)
}

// SQLiteからの行取得用の内部型
#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    password_hash: String,
    role: String,
    active: i64,
    created_at: String,
    last_login: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = VaultError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_uuid(&row.id)?,
            username: row.username,
            password_hash: row.password_hash,
            role: parse_enum::<UserRole>("role", &row.role)?,
            active: row.active != 0,
            created_at: parse_ts(&row.created_at)?,
            last_login: parse_ts_opt(row.last_login)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        crate::db::test_utils::test_db_pool().await
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let pool = setup_test_db().await;

        let user = create(&pool, "testuser", "hash123", UserRole::Investigator)
            .await
            .expect("Failed to create user");
        assert_eq!(user.username, "testuser");
        assert!(user.active);

        let found = find_by_username(&pool, "testuser").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, UserRole::Investigator);
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let pool = setup_test_db().await;
        create(&pool, "dup", "h", UserRole::Viewer).await.unwrap();
        let err = create(&pool, "dup", "h", UserRole::Viewer).await.unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_is_first_boot() {
        let pool = setup_test_db().await;
        assert!(is_first_boot(&pool).await.unwrap());
        create(&pool, "firstuser", "hash", UserRole::Admin).await.unwrap();
        assert!(!is_first_boot(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_last_active_admin() {
        let pool = setup_test_db().await;

        let admin = create(&pool, "admin", "hash", UserRole::Admin).await.unwrap();
        assert!(is_last_active_admin(&pool, admin.id).await.unwrap());

        let admin2 = create(&pool, "admin2", "hash", UserRole::Admin).await.unwrap();
        assert!(!is_last_active_admin(&pool, admin.id).await.unwrap());

        // 無効化された管理者は数えない
        update(
            &pool,
            admin2.id,
            UserUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(is_last_active_admin(&pool, admin.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let pool = setup_test_db().await;
        let user = create(&pool, "viewer", "hash", UserRole::Viewer).await.unwrap();

        let updated = update(
            &pool,
            user.id,
            UserUpdate {
                role: Some(UserRole::Investigator),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.role, UserRole::Investigator);
        assert_eq!(updated.username, "viewer");

        delete(&pool, user.id).await.unwrap();
        assert!(find_by_id(&pool, user.id).await.unwrap().is_none());
        assert!(matches!(
            delete(&pool, user.id).await,
            Err(VaultError::NotFound(_))
        ));
    }
}
