//! 認証関連のデータモデル

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ユーザーロール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// 管理者（ユーザー・設定・監査を含む全操作）
    Admin,
    /// 捜査員（事件データの書き込み可能）
    Investigator,
    /// 閲覧者（読み取りのみ）
    Viewer,
}

impl UserRole {
    /// 事件データを書き込めるか
    pub fn can_write(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Investigator)
    }

    /// 文字列表現（DB保存用）
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Investigator => "investigator",
            UserRole::Viewer => "viewer",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "investigator" => Ok(UserRole::Investigator),
            "viewer" => Ok(UserRole::Viewer),
            other => Err(format!("Invalid role: {}", other)),
        }
    }
}

/// ユーザー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// ユーザーID
    pub id: Uuid,
    /// ユーザー名
    pub username: String,
    /// パスワードハッシュ（bcrypt）
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// ユーザーロール
    pub role: UserRole,
    /// 有効フラグ（無効ユーザーはログイン不可）
    pub active: bool,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 最終ログイン日時
    pub last_login: Option<DateTime<Utc>>,
}

/// JWTクレーム
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// ユーザーID（JWT sub claim）
    pub sub: String,
    /// ユーザー名（監査ログ用）
    #[serde(default)]
    pub username: String,
    /// ユーザーロール
    pub role: UserRole,
    /// 有効期限（Unix timestamp、JWT exp claim）
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_through_str() {
        for role in [UserRole::Admin, UserRole::Investigator, UserRole::Viewer] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("root".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_write_permission() {
        assert!(UserRole::Admin.can_write());
        assert!(UserRole::Investigator.can_write());
        assert!(!UserRole::Viewer.can_write());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            password_hash: "$2b$12$secret".into(),
            role: UserRole::Viewer,
            active: true,
            created_at: Utc::now(),
            last_login: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
    }
}
