// パスワードハッシュ化と検証（bcrypt実装）

use crate::common::error::VaultError;
use bcrypt::{hash, verify};

/// パスワードハッシュ化のコスト（12推奨、200-300ms）
#[cfg(not(test))]
const HASH_COST: u32 = 12;
#[cfg(test)]
const HASH_COST: u32 = 4;

/// パスワードの最小長
pub const MIN_PASSWORD_LEN: usize = 8;

/// パスワードをbcryptでハッシュ化
///
/// # Returns
/// * `Ok(String)` - bcryptハッシュ文字列（$2b$で始まる）
/// * `Err(VaultError)` - ハッシュ化失敗
pub fn hash_password(password: &str) -> Result<String, VaultError> {
    hash(password, HASH_COST)
        .map_err(|e| VaultError::PasswordHash(format!("Failed to hash password: {}", e)))
}

/// パスワードを検証
///
/// # Returns
/// * `Ok(true)` - パスワード一致
/// * `Ok(false)` - パスワード不一致
/// * `Err(VaultError)` - 検証失敗
pub fn verify_password(password: &str, hash: &str) -> Result<bool, VaultError> {
    verify(password, hash)
        .map_err(|e| VaultError::PasswordHash(format!("Failed to verify password: {}", e)))
}

/// パスワード強度を検証
pub fn validate_password(password: &str) -> Result<(), VaultError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(VaultError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
