//! ロギング初期化
//!
//! 標準出力へのfmtレイヤーに加え、`CASEVAULT_LOG_DIR`が設定されていれば
//! 日次ローテーションのファイルにも書き出す。

use crate::config::{get_env_with_fallback, get_env_with_fallback_or};
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログファイル名の接頭辞
const LOG_FILE_PREFIX: &str = "casevault.log";

/// ファイル書き出しスレッドのガード（プロセス終了まで保持する）
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// ログレベル指定からEnvFilterを作る
///
/// `RUST_LOG`形式のディレクティブも受け付ける。
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// tracingサブスクライバを初期化する
///
/// 2回目以降の呼び出しはエラーを返す。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = get_env_with_fallback_or("CASEVAULT_LOG_LEVEL", "LOG_LEVEL", "info");
    let log_dir = get_env_with_fallback("CASEVAULT_LOG_DIR", "LOG_DIR");

    let stdout_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(build_filter(&level))
        .with(stdout_layer);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()?;
            let _ = FILE_GUARD.set(guard);
            tracing::info!(level = %level, log_dir = %dir, "Logging initialized");
        }
        None => {
            registry.try_init()?;
            tracing::info!(level = %level, "Logging initialized");
        }
    }
    Ok(())
}
