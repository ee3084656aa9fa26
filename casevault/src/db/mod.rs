//! データベースアクセス層
//!
//! SQLiteベースのデータ永続化

use crate::common::error::{VaultError, VaultResult};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// データベースマイグレーション
pub mod migrations;

/// ユーザー管理
pub mod users;

/// 設定管理
pub mod settings;

/// ルックアップ値
pub mod lookups;

/// 事件・関係者
pub mod cases;

/// 証拠・保管履歴
pub mod evidence;

/// デバイス
pub mod devices;

/// 押収・法的文書
pub mod legal;

/// カレンダー
pub mod calendar;

/// 監査ログストレージ（ハッシュチェーン）
pub mod audit_log;

/// 保持ポリシー・ジョブ
pub mod retention;

/// コンプライアンス違反・レポート
pub mod compliance;

/// 通知キュー
pub mod notifications;

/// 日時をDB保存形式（RFC3339、マイクロ秒、Z）にする
///
/// 固定長のため文字列比較で範囲検索できる。
pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// DBの日時文字列を読み込む
pub fn parse_ts(s: &str) -> VaultResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VaultError::Database(format!("Failed to parse timestamp '{}': {}", s, e)))
}

/// 任意の日時文字列を読み込む
pub fn parse_ts_opt(s: Option<String>) -> VaultResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// DBのUUID文字列を読み込む
pub fn parse_uuid(s: &str) -> VaultResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| VaultError::Database(format!("Invalid UUID '{}': {}", s, e)))
}

/// 任意のUUID文字列を読み込む
pub fn parse_uuid_opt(s: Option<String>) -> VaultResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

/// DBの列挙値文字列を読み込む
pub fn parse_enum<T: std::str::FromStr>(column: &str, s: &str) -> VaultResult<T> {
    s.parse()
        .map_err(|_| VaultError::Database(format!("Invalid {} value '{}'", column, s)))
}

/// 一覧検索のWHERE句ビルダー
///
/// 条件とバインド値を順に積み、`where_clause()`でSQL断片を得る。
#[derive(Debug, Default)]
pub(crate) struct SqlFilter {
    conditions: Vec<String>,
    binds: Vec<String>,
}

impl SqlFilter {
    /// `column = ?`
    pub fn eq<T: ToString>(&mut self, column: &str, value: Option<T>) -> &mut Self {
        if let Some(v) = value {
            self.conditions.push(format!("{} = ?", column));
            self.binds.push(v.to_string());
        }
        self
    }

    /// 任意の条件式（プレースホルダ数とvaluesの数を一致させる）
    pub fn cond(&mut self, sql: &str, values: Vec<String>) -> &mut Self {
        self.conditions.push(sql.to_string());
        self.binds.extend(values);
        self
    }

    /// 複数列に対する部分一致検索
    pub fn search(&mut self, columns: &[&str], text: Option<&str>) -> &mut Self {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return self;
        };
        let pattern = format!("%{}%", escape_like(text));
        let ors = columns
            .iter()
            .map(|c| format!("{} LIKE ? ESCAPE '\\'", c))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.conditions.push(format!("({})", ors));
        for _ in columns {
            self.binds.push(pattern.clone());
        }
        self
    }

    /// WHERE句（条件がなければ空文字列）
    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// バインド値
    pub fn binds(&self) -> &[String] {
        &self.binds
    }
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// UNIQUE制約違反か
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    /// テスト用のインメモリSQLiteプールを作成し、マイグレーションを実行する
    ///
    /// `:memory:`は接続ごとに別DBになるため接続数は1に固定する。
    pub async fn test_db_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    /// テスト用AppStateを構築する
    pub async fn test_app_state() -> crate::AppState {
        let pool = test_db_pool().await;
        crate::AppState::for_pool(pool, "test-secret".to_string(), None)
    }
}
