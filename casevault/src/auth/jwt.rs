// JWT発行と検証（HS256固定）

use crate::common::auth::{Claims, UserRole};
use crate::common::error::VaultError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

/// JWT有効期限（24時間）
pub const JWT_EXPIRATION_HOURS: i64 = 24;

/// 有効期限（秒）。ログインレスポンスの`expires_in`に使う
pub const fn token_ttl_secs() -> i64 {
    JWT_EXPIRATION_HOURS * 3600
}

/// 署名アルゴリズム。トークン側のヘッダーでは変更させない
const ALGORITHM: Algorithm = Algorithm::HS256;

fn validation() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation
}

/// アクセストークンを発行する
///
/// `username`は監査ログの`actor_username`として記録される。
pub fn create_jwt(
    user_id: &str,
    username: &str,
    role: UserRole,
    secret: &str,
) -> Result<String, VaultError> {
    let exp = Utc::now()
        .checked_add_signed(Duration::hours(JWT_EXPIRATION_HOURS))
        .ok_or_else(|| VaultError::Jwt("token expiry overflows".to_string()))?
        .timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        role,
        exp: exp as usize,
    };
    encode(
        &Header::new(ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| VaultError::Jwt(format!("Failed to sign token: {}", e)))
}

/// アクセストークンを検証しクレームを返す
///
/// 署名不一致・期限切れ・HS256以外のアルゴリズムはすべて`VaultError::Jwt`。
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, VaultError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation())
        .map(|data| data.claims)
        .map_err(|e| VaultError::Jwt(format!("Failed to verify token: {}", e)))
}
