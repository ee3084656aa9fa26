//! 監査ログの型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

str_enum! {
    /// アクター種別
    pub enum ActorType {
        /// JWT認証ユーザー
        User => "user",
        /// 未認証（認証失敗含む）
        Anonymous => "anonymous",
        /// システム（スケジューラ・CLI）
        System => "system",
    }
}

str_enum! {
    /// 監査アクション
    pub enum AuditAction {
        /// 作成
        Create => "create",
        /// 参照
        Read => "read",
        /// 更新
        Update => "update",
        /// 削除
        Delete => "delete",
        /// ログイン成功
        Login => "login",
        /// ログイン失敗
        LoginFailed => "login_failed",
        /// エクスポート
        Export => "export",
        /// チェーン検証
        Verify => "verify",
        /// システム処理
        System => "system",
    }
}

impl AuditAction {
    /// HTTPメソッドから既定のアクションを決める
    pub fn from_method(method: &str) -> Self {
        match method {
            "POST" => Self::Create,
            "PUT" | "PATCH" => Self::Update,
            "DELETE" => Self::Delete,
            _ => Self::Read,
        }
    }
}

/// 記録前の監査イベント
///
/// チェーンに追加されるときに連番・前ハッシュ・チェックサムが付与される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// タイムスタンプ（マイクロ秒精度）
    pub timestamp: DateTime<Utc>,
    /// HTTPメソッド
    pub http_method: String,
    /// リクエストパス
    pub request_path: String,
    /// HTTPステータスコード
    pub status_code: u16,
    /// アクター種別
    pub actor_type: ActorType,
    /// アクターID（user_id）
    pub actor_id: Option<String>,
    /// ユーザー名（表示用、ログイン失敗時は試行されたユーザー名）
    pub actor_username: Option<String>,
    /// クライアントIPアドレス
    pub client_ip: Option<String>,
    /// リクエスト処理時間（ミリ秒）
    pub duration_ms: Option<i64>,
    /// アクション
    pub action: AuditAction,
    /// 対象リソース種別
    pub resource_type: Option<String>,
    /// 対象リソースID
    pub resource_id: Option<String>,
    /// 操作の追加情報（JSON）
    pub detail: Option<String>,
}

impl AuditEvent {
    /// システム操作のイベントを作る（スケジューラ・CLI用）
    pub fn system(action: AuditAction, resource_type: &str, detail: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            http_method: "SYSTEM".to_string(),
            request_path: format!("system://{}", resource_type),
            status_code: 200,
            actor_type: ActorType::System,
            actor_id: None,
            actor_username: None,
            client_ip: None,
            duration_ms: None,
            action,
            resource_type: Some(resource_type.to_string()),
            resource_id: None,
            detail,
        }
    }
}

/// チェーンに記録済みの監査ログエントリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// レコードID
    pub id: i64,
    /// チェーン上の連番（1から連続）
    pub sequence_number: i64,
    /// 記録内容
    #[serde(flatten)]
    pub event: AuditEvent,
    /// 直前エントリのチェックサム
    pub previous_hash: String,
    /// このエントリのチェックサム
    pub checksum: String,
}

/// チェーン上の位置（連番とハッシュ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPoint {
    /// 連番
    pub sequence: i64,
    /// その連番のチェックサム
    pub hash: String,
}

/// チェーンの状態（アンカーとヘッド）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainState {
    /// アーカイブ済み末尾。未アーカイブならジェネシス(0, ゼロハッシュ)
    pub anchor: ChainPoint,
    /// 最新エントリ
    pub head: ChainPoint,
    /// 最終検証日時
    pub last_verified_at: Option<DateTime<Utc>>,
    /// 最終検証結果
    pub last_verification_valid: Option<bool>,
}

/// 監査ログフィルタ
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLogFilter {
    /// アクター種別でフィルタ
    pub actor_type: Option<String>,
    /// アクターIDでフィルタ
    pub actor_id: Option<String>,
    /// アクションでフィルタ
    pub action: Option<String>,
    /// リソース種別でフィルタ
    pub resource_type: Option<String>,
    /// リソースIDでフィルタ
    pub resource_id: Option<String>,
    /// HTTPメソッドでフィルタ
    pub http_method: Option<String>,
    /// ステータスコードでフィルタ
    pub status_code: Option<u16>,
    /// 開始日時
    pub time_from: Option<DateTime<Utc>>,
    /// 終了日時
    pub time_to: Option<DateTime<Utc>>,
    /// フリーテキスト検索（パス・ユーザー名・詳細）
    pub search_text: Option<String>,
    /// ページ番号（1始まり）
    pub page: Option<u32>,
    /// ページあたり件数
    pub per_page: Option<u32>,
    /// アーカイブを含むか
    pub include_archive: Option<bool>,
}

/// ハンドラーから監査ミドルウェアへ渡す操作情報
///
/// レスポンスのextensionに入れると、ミドルウェアがエントリに反映する。
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    /// 対象リソース種別
    pub resource_type: Option<String>,
    /// 対象リソースID
    pub resource_id: Option<String>,
    /// メソッドから決まるアクションの上書き
    pub action: Option<AuditAction>,
    /// 追加情報
    pub detail: Option<serde_json::Value>,
}

impl AuditContext {
    /// リソースを指定して作る
    pub fn resource(resource_type: &str, resource_id: impl ToString) -> Self {
        Self {
            resource_type: Some(resource_type.to_string()),
            resource_id: Some(resource_id.to_string()),
            ..Default::default()
        }
    }

    /// アクションを上書きする
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// 追加情報を付ける
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// 認証失敗情報（ログインハンドラーから監査ミドルウェアへの受け渡し用）
#[derive(Debug, Clone)]
pub struct AuthFailureInfo {
    /// 試行されたユーザー名
    pub attempted_username: Option<String>,
    /// 失敗理由
    pub reason: String,
}
