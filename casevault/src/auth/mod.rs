// 認証モジュール

use crate::common::auth::{Claims, UserRole};
use crate::common::error::{VaultError, VaultResult};

/// パスワードハッシュ化・検証（bcrypt）
pub mod password;

/// JWT生成・検証（jsonwebtoken）
pub mod jwt;

/// 認証ミドルウェア（JWT）
pub mod middleware;

/// 初回起動時の管理者アカウント作成
pub mod bootstrap;

/// Admin権限チェック
pub fn require_admin(claims: &Claims) -> VaultResult<()> {
    if claims.role != UserRole::Admin {
        return Err(VaultError::Authorization(
            "Admin access required".to_string(),
        ));
    }
    Ok(())
}

/// 書き込み権限チェック（admin / investigator）
pub fn require_write(claims: &Claims) -> VaultResult<()> {
    if !claims.role.can_write() {
        return Err(VaultError::Authorization(
            "Write access required".to_string(),
        ));
    }
    Ok(())
}

/// Claimsのユーザー IDをUUIDとして取り出す
pub fn claims_user_id(claims: &Claims) -> Option<uuid::Uuid> {
    uuid::Uuid::parse_str(&claims.sub).ok()
}

/// ランダムトークン生成
pub fn generate_random_token(length: usize) -> String {
    use rand::RngExt;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
