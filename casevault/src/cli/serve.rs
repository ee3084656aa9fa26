//! serve サブコマンド
//!
//! APIサーバーを起動します。

use clap::Args;

/// 既定のデータベースURL
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/casevault.db";

/// serve サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen port
    #[arg(short, long, default_value = "8080", env = "CASEVAULT_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "CASEVAULT_HOST")]
    pub host: String,

    /// Database URL
    #[arg(long, default_value = DEFAULT_DATABASE_URL, env = "CASEVAULT_DATABASE_URL")]
    pub database_url: String,

    /// JWT signing key
    #[arg(long, env = "CASEVAULT_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,
}

impl ServeArgs {
    /// サブコマンド省略時の引数（環境変数のみ参照）
    pub fn from_env() -> Self {
        use crate::config::{get_env_with_fallback, get_env_with_fallback_or, get_env_with_fallback_parse};
        Self {
            port: get_env_with_fallback_parse("CASEVAULT_PORT", "PORT", 8080),
            host: get_env_with_fallback_or("CASEVAULT_HOST", "HOST", "0.0.0.0"),
            database_url: get_env_with_fallback_or(
                "CASEVAULT_DATABASE_URL",
                "DATABASE_URL",
                DEFAULT_DATABASE_URL,
            ),
            jwt_secret: get_env_with_fallback("CASEVAULT_JWT_SECRET", "JWT_SECRET"),
        }
    }

    /// バインドアドレス
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// JWT秘密鍵を解決する
    ///
    /// 未設定ならプロセスごとにランダム生成する（再起動でトークンは無効になる）。
    pub fn resolve_jwt_secret(&self) -> String {
        match self.jwt_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => secret.to_string(),
            _ => {
                tracing::warn!(
                    "CASEVAULT_JWT_SECRET not set, using a random secret; tokens will not survive a restart"
                );
                crate::auth::generate_random_token(64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(secret: Option<&str>) -> ServeArgs {
        ServeArgs {
            port: 8080,
            host: "127.0.0.1".to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            jwt_secret: secret.map(str::to_string),
        }
    }

    #[test]
    fn test_bind_addr() {
        assert_eq!(args(None).bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_resolve_jwt_secret() {
        assert_eq!(args(Some("s3cret")).resolve_jwt_secret(), "s3cret");
        assert_eq!(args(Some("   ")).resolve_jwt_secret().len(), 64);
        let a = args(None).resolve_jwt_secret();
        let b = args(None).resolve_jwt_secret();
        assert_ne!(a, b);
    }
}
