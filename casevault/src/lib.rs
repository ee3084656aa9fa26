//! casevault server
//!
//! デジタルフォレンジック事件管理のREST APIと、改ざん検知付き監査ログ

#![warn(missing_docs)]

#[macro_use]
mod macros;

/// 共通型定義（エラー・認証・ページング）
pub mod common;

/// REST APIハンドラー
pub mod api;

/// データベースアクセス
pub mod db;

/// メトリクス収集・管理
pub mod metrics;

/// ロギング初期化ユーティリティ
pub mod logging;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// 認証・認可機能
pub mod auth;

/// 監査ログシステム
pub mod audit;

/// CLIインターフェース
pub mod cli;

/// ドメイン型定義
pub mod types;

/// 保持ポリシーの実行
pub mod retention;

/// コンプライアンス検査とレポート
pub mod compliance;

/// 通知の配信
pub mod notify;

use std::sync::Arc;

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    /// データベース接続プール
    pub db_pool: sqlx::SqlitePool,
    /// JWT秘密鍵
    pub jwt_secret: String,
    /// 監査ログストレージ（追加ロックを共有する）
    pub audit_log_storage: Arc<db::audit_log::AuditLogStorage>,
    /// 監査ログライター
    pub audit_log_writer: audit::writer::AuditLogWriter,
    /// 監査ログアーカイブDB
    pub audit_archive_pool: Option<sqlx::SqlitePool>,
    /// 保持ジョブ実行サービス
    pub retention: retention::RetentionService,
    /// コンプライアンススキャナ
    pub scanner: compliance::ComplianceScanner,
    /// 設定ストレージ
    pub settings: db::settings::SettingsStorage,
}

impl AppState {
    /// 設定を明示してAppStateを構築する
    ///
    /// 監査ログライターのバックグラウンドタスクを起動するため、Tokioランタイム上で呼ぶこと。
    pub fn new(
        pool: sqlx::SqlitePool,
        jwt_secret: String,
        archive_pool: Option<sqlx::SqlitePool>,
        audit_config: config::AuditConfig,
        sla: config::SlaConfig,
    ) -> Self {
        let storage = db::audit_log::AuditLogStorage::new(pool.clone());
        let audit_log_writer = audit::writer::AuditLogWriter::new(storage.clone(), audit_config);
        let audit_log_storage = Arc::new(storage);

        Self {
            retention: retention::RetentionService::new(
                pool.clone(),
                audit_log_storage.clone(),
                archive_pool.clone(),
            ),
            scanner: compliance::ComplianceScanner::new(
                pool.clone(),
                audit_log_storage.clone(),
                sla,
            ),
            settings: db::settings::SettingsStorage::new(pool.clone()),
            audit_log_storage,
            audit_log_writer,
            audit_archive_pool: archive_pool,
            jwt_secret,
            db_pool: pool,
        }
    }

    /// 環境変数の設定でAppStateを構築する
    pub fn for_pool(
        pool: sqlx::SqlitePool,
        jwt_secret: String,
        archive_pool: Option<sqlx::SqlitePool>,
    ) -> Self {
        Self::new(
            pool,
            jwt_secret,
            archive_pool,
            config::AuditConfig::from_env(),
            config::SlaConfig::from_env(),
        )
    }
}
